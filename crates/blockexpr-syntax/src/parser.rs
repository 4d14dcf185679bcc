//! Precedence-climbing parser for the algebraic expression form.
//!
//! Builds arena nodes bottom-up, so the earlier-children invariant holds
//! by construction. Identifier references are left unresolved
//! ([`NodeKind::Ident`]); calls are classified syntactically into `where`,
//! reductions, builtins, and named calls, with arity and type validation
//! deferred to the analyzer.
//!
//! Precedence, loosest to tightest: `or`, `and`, `not`, comparisons
//! (non-associative), `|`/`^`, `&`, shifts, additive, multiplicative,
//! unary sign/complement, `**` (right-associative), call, primary.

use blockexpr_core::{
    BinaryOp, CmpOp, CompileError, ExprArena, Literal, NodeId, NodeKind, ReduceOp, Span, UnaryOp,
};
use num_complex::Complex64;

use crate::lexer::{tokenize, Mode};
use crate::token::{SpannedToken, Token};

/// Cursor over a token stream, shared with the statement parser.
pub struct TokenCursor<'t> {
    toks: &'t [SpannedToken],
    pos: usize,
}

impl<'t> TokenCursor<'t> {
    pub fn new(toks: &'t [SpannedToken]) -> Self {
        Self { toks, pos: 0 }
    }

    pub fn peek(&self) -> &Token {
        &self.toks[self.pos.min(self.toks.len() - 1)].token
    }

    pub fn peek_span(&self) -> Span {
        self.toks[self.pos.min(self.toks.len() - 1)].span
    }

    pub fn advance(&mut self) -> SpannedToken {
        let t = self.toks[self.pos.min(self.toks.len() - 1)].clone();
        if self.pos < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    /// Consumes the next token if it equals `expected`.
    pub fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn expect(&mut self, expected: &Token) -> Result<Span, CompileError> {
        if self.peek() == expected {
            Ok(self.advance().span)
        } else {
            Err(unexpected(self.peek(), self.peek_span(), &expected.describe()))
        }
    }
}

pub(crate) fn unexpected(found: &Token, span: Span, wanted: &str) -> CompileError {
    CompileError::Parse {
        span,
        message: format!("expected {wanted}, found {}", found.describe()),
        line_col: None,
    }
}

/// Expression parser over a shared cursor; the statement parser embeds one
/// per expression position.
pub struct ExprParser<'t, 'c, 'a> {
    pub cur: &'c mut TokenCursor<'t>,
    pub arena: &'a mut ExprArena,
}

impl<'t, 'c, 'a> ExprParser<'t, 'c, 'a> {
    pub fn new(cur: &'c mut TokenCursor<'t>, arena: &'a mut ExprArena) -> Self {
        Self { cur, arena }
    }

    pub fn parse(&mut self) -> Result<NodeId, CompileError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<NodeId, CompileError> {
        let mut lhs = self.parse_and()?;
        while self.cur.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = self.binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<NodeId, CompileError> {
        let mut lhs = self.parse_not()?;
        while self.cur.eat(&Token::And) {
            let rhs = self.parse_not()?;
            lhs = self.binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<NodeId, CompileError> {
        if self.cur.peek() == &Token::Not {
            let span = self.cur.advance().span;
            let operand = self.parse_not()?;
            let span = span.merge(self.arena.get(operand).span);
            return Ok(self
                .arena
                .push(NodeKind::Unary(UnaryOp::Not), span, &[operand]));
        }
        self.parse_comparison()
    }

    fn comparison_op(tok: &Token) -> Option<CmpOp> {
        match tok {
            Token::Lt => Some(CmpOp::Lt),
            Token::Le => Some(CmpOp::Le),
            Token::EqEq => Some(CmpOp::Eq),
            Token::Ne => Some(CmpOp::Ne),
            Token::Ge => Some(CmpOp::Ge),
            Token::Gt => Some(CmpOp::Gt),
            _ => None,
        }
    }

    fn parse_comparison(&mut self) -> Result<NodeId, CompileError> {
        let lhs = self.parse_bitor()?;
        let Some(op) = Self::comparison_op(self.cur.peek()) else {
            return Ok(lhs);
        };
        self.cur.advance();
        let rhs = self.parse_bitor()?;

        // Comparisons are non-associative: `a < b < c` is a syntax error.
        if Self::comparison_op(self.cur.peek()).is_some() {
            return Err(CompileError::Parse {
                span: self.cur.peek_span(),
                message: "comparison operators cannot be chained".to_string(),
                line_col: None,
            });
        }

        let span = self.arena.get(lhs).span.merge(self.arena.get(rhs).span);
        Ok(self.arena.push(NodeKind::Compare(op), span, &[lhs, rhs]))
    }

    fn parse_bitor(&mut self) -> Result<NodeId, CompileError> {
        let mut lhs = self.parse_bitand()?;
        loop {
            let op = match self.cur.peek() {
                Token::Pipe => BinaryOp::BitOr,
                Token::Caret => BinaryOp::BitXor,
                _ => break,
            };
            self.cur.advance();
            let rhs = self.parse_bitand()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_bitand(&mut self) -> Result<NodeId, CompileError> {
        let mut lhs = self.parse_shift()?;
        while self.cur.peek() == &Token::Amp {
            self.cur.advance();
            let rhs = self.parse_shift()?;
            lhs = self.binary(BinaryOp::BitAnd, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<NodeId, CompileError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.cur.peek() {
                Token::Shl => BinaryOp::Shl,
                Token::Shr => BinaryOp::Shr,
                _ => break,
            };
            self.cur.advance();
            let rhs = self.parse_additive()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<NodeId, CompileError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.cur.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.cur.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<NodeId, CompileError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.cur.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.cur.advance();
            let rhs = self.parse_unary()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<NodeId, CompileError> {
        match self.cur.peek() {
            Token::Minus => {
                let span = self.cur.advance().span;
                let operand = self.parse_unary()?;
                let span = span.merge(self.arena.get(operand).span);
                Ok(self
                    .arena
                    .push(NodeKind::Unary(UnaryOp::Neg), span, &[operand]))
            }
            Token::Tilde => {
                let span = self.cur.advance().span;
                let operand = self.parse_unary()?;
                let span = span.merge(self.arena.get(operand).span);
                Ok(self
                    .arena
                    .push(NodeKind::Unary(UnaryOp::BitNot), span, &[operand]))
            }
            // Unary plus is accepted and is a no-op.
            Token::Plus => {
                self.cur.advance();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<NodeId, CompileError> {
        let base = self.parse_primary()?;
        if self.cur.eat(&Token::StarStar) {
            // Right-associative, and the exponent may carry a unary sign.
            let exp = self.parse_unary()?;
            return Ok(self.binary(BinaryOp::Pow, base, exp));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<NodeId, CompileError> {
        let t = self.cur.advance();
        match t.token {
            Token::Int(v) => Ok(self.arena.push(NodeKind::Literal(Literal::Int(v)), t.span, &[])),
            Token::Float(v) => Ok(self
                .arena
                .push(NodeKind::Literal(Literal::Float(v)), t.span, &[])),
            Token::Imag(v) => Ok(self.arena.push(
                NodeKind::Literal(Literal::Complex(Complex64::new(0.0, v))),
                t.span,
                &[],
            )),
            Token::Str(s) => Ok(self.arena.push(
                NodeKind::Literal(Literal::Str(s.into_bytes())),
                t.span,
                &[],
            )),
            Token::Ident(name) => {
                if self.cur.peek() == &Token::LParen {
                    self.parse_call(name, t.span)
                } else {
                    Ok(self.arena.push(NodeKind::Ident(name), t.span, &[]))
                }
            }
            Token::LParen => {
                let inner = self.parse()?;
                self.cur.expect(&Token::RParen)?;
                Ok(inner)
            }
            other => Err(unexpected(&other, t.span, "an expression")),
        }
    }

    fn parse_call(&mut self, name: String, name_span: Span) -> Result<NodeId, CompileError> {
        self.cur.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if self.cur.peek() != &Token::RParen {
            loop {
                args.push(self.parse()?);
                if !self.cur.eat(&Token::Comma) {
                    break;
                }
            }
        }
        let close = self.cur.expect(&Token::RParen)?;
        let span = name_span.merge(close);

        if name == "where" {
            if args.len() != 3 {
                return Err(CompileError::Parse {
                    span,
                    message: format!("where() takes 3 arguments, got {}", args.len()),
                    line_col: None,
                });
            }
            return Ok(self.arena.push(NodeKind::Where, span, &args));
        }
        if let Some(op) = ReduceOp::parse(&name) {
            if args.len() != 1 {
                return Err(CompileError::Parse {
                    span,
                    message: format!("{name}() takes 1 argument, got {}", args.len()),
                    line_col: None,
                });
            }
            return Ok(self.arena.push(
                NodeKind::Reduce {
                    op,
                    fused_predicate: false,
                },
                span,
                &args,
            ));
        }
        if let Some(b) = blockexpr_core::Builtin::parse(&name) {
            return Ok(self.arena.push(
                NodeKind::Call(blockexpr_core::CallTarget::Builtin(b)),
                span,
                &args,
            ));
        }
        Ok(self.arena.push(
            NodeKind::Call(blockexpr_core::CallTarget::Named(name)),
            span,
            &args,
        ))
    }

    fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        let span = self.arena.get(lhs).span.merge(self.arena.get(rhs).span);
        self.arena.push(NodeKind::Binary(op), span, &[lhs, rhs])
    }
}

/// Parses a single-line algebraic expression into a fresh arena.
pub fn parse_expression(src: &str) -> Result<(ExprArena, NodeId), CompileError> {
    let toks = tokenize(src, Mode::Expr)?;
    let mut arena = ExprArena::new();
    let mut cur = TokenCursor::new(&toks);
    let root = ExprParser::new(&mut cur, &mut arena).parse()?;
    cur.expect(&Token::Eof)?;
    Ok((arena, root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockexpr_core::CallTarget;

    fn parse(src: &str) -> (ExprArena, NodeId) {
        parse_expression(src).unwrap()
    }

    fn kind(arena: &ExprArena, id: NodeId) -> &NodeKind {
        &arena.get(id).kind
    }

    #[test]
    fn additive_is_left_associative() {
        let (arena, root) = parse("a - b - c");
        // ((a - b) - c)
        assert_eq!(kind(&arena, root), &NodeKind::Binary(BinaryOp::Sub));
        let lhs = arena.get(root).children[0];
        assert_eq!(kind(&arena, lhs), &NodeKind::Binary(BinaryOp::Sub));
    }

    #[test]
    fn power_is_right_associative() {
        let (arena, root) = parse("a ** b ** c");
        assert_eq!(kind(&arena, root), &NodeKind::Binary(BinaryOp::Pow));
        let rhs = arena.get(root).children[1];
        assert_eq!(kind(&arena, rhs), &NodeKind::Binary(BinaryOp::Pow));
    }

    #[test]
    fn unary_minus_binds_looser_than_power() {
        let (arena, root) = parse("-a ** 2");
        // -(a ** 2)
        assert_eq!(kind(&arena, root), &NodeKind::Unary(UnaryOp::Neg));
        let inner = arena.get(root).children[0];
        assert_eq!(kind(&arena, inner), &NodeKind::Binary(BinaryOp::Pow));
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let (arena, root) = parse("a + b*2");
        assert_eq!(kind(&arena, root), &NodeKind::Binary(BinaryOp::Add));
        let rhs = arena.get(root).children[1];
        assert_eq!(kind(&arena, rhs), &NodeKind::Binary(BinaryOp::Mul));
    }

    #[test]
    fn comparison_chain_is_a_syntax_error() {
        let err = parse_expression("a < b < c").unwrap_err();
        match err {
            CompileError::Parse { message, .. } => {
                assert!(message.contains("chained"), "{message}")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn logical_ladder() {
        let (arena, root) = parse("a < 1 and b > 2 or not c");
        assert_eq!(kind(&arena, root), &NodeKind::Binary(BinaryOp::Or));
        let lhs = arena.get(root).children[0];
        assert_eq!(kind(&arena, lhs), &NodeKind::Binary(BinaryOp::And));
        let rhs = arena.get(root).children[1];
        assert_eq!(kind(&arena, rhs), &NodeKind::Unary(UnaryOp::Not));
    }

    #[test]
    fn call_classification() {
        let (arena, root) = parse("sqrt(a*a + b*b)");
        match kind(&arena, root) {
            NodeKind::Call(CallTarget::Builtin(b)) => {
                assert_eq!(*b, blockexpr_core::Builtin::Sqrt)
            }
            other => panic!("unexpected {other:?}"),
        }

        let (arena, root) = parse("sum(x == 1)");
        match kind(&arena, root) {
            NodeKind::Reduce {
                op,
                fused_predicate,
            } => {
                assert_eq!(*op, ReduceOp::Sum);
                assert!(!fused_predicate);
            }
            other => panic!("unexpected {other:?}"),
        }

        let (arena, root) = parse("where(x < 0, 0, x)");
        assert_eq!(kind(&arena, root), &NodeKind::Where);

        let (arena, root) = parse("myfunc(a, b)");
        match kind(&arena, root) {
            NodeKind::Call(CallTarget::Named(n)) => assert_eq!(n, "myfunc"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn where_arity_is_checked_at_parse() {
        assert!(parse_expression("where(a, b)").is_err());
        assert!(parse_expression("sum(a, b)").is_err());
    }

    #[test]
    fn parenthesized_grouping() {
        let (arena, root) = parse("(a + b) * c");
        assert_eq!(kind(&arena, root), &NodeKind::Binary(BinaryOp::Mul));
        let lhs = arena.get(root).children[0];
        assert_eq!(kind(&arena, lhs), &NodeKind::Binary(BinaryOp::Add));
    }

    #[test]
    fn imaginary_literal_parses_to_complex() {
        let (arena, root) = parse("2.5j");
        match kind(&arena, root) {
            NodeKind::Literal(Literal::Complex(c)) => {
                assert_eq!(c.re, 0.0);
                assert_eq!(c.im, 2.5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert!(parse_expression("a + b )").is_err());
        assert!(parse_expression("").is_err());
    }

    #[test]
    fn spans_cover_subexpressions() {
        let (arena, root) = parse("ab + cd");
        let span = arena.get(root).span;
        assert_eq!(span.start, 0);
        assert_eq!(span.end, 7);
    }
}

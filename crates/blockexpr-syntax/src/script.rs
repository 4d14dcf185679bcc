//! Recursive-descent parser for the multi-statement kernel form.
//!
//! A program is exactly one top-level `def NAME(ARG, ...):` whose indented
//! body is the computation. Statements: assignment, `return`,
//! `if`/`elif`/`else`, `for NAME in range(expr):`, `break`,
//! `break if expr` (sugar for `if expr: break`), `continue`, and
//! `print(...)`. Expression positions reuse the precedence parser.
//!
//! `elif` chains desugar into nested `if` statements inside the else
//! block, so the analyzer and the runtime only ever see two-way branches.

use blockexpr_core::{CompileError, ExprArena, NodeId, NodeKind, Span, UNASSIGNED_SLOT};

use crate::lexer::{tokenize, Mode};
use crate::parser::{unexpected, ExprParser, TokenCursor};
use crate::token::Token;

/// Parses a kernel program. Returns the arena, the `KernelDef` root, and
/// the argument names in declaration order (they define the variable
/// descriptor order).
pub fn parse_script(src: &str) -> Result<(ExprArena, NodeId, Vec<String>), CompileError> {
    let toks = tokenize(src, Mode::Script)?;
    let mut parser = ScriptParser {
        cur: TokenCursor::new(&toks),
        arena: ExprArena::new(),
    };
    let (root, args) = parser.parse_program()?;
    Ok((parser.arena, root, args))
}

struct ScriptParser<'t> {
    cur: TokenCursor<'t>,
    arena: ExprArena,
}

impl<'t> ScriptParser<'t> {
    fn parse_program(&mut self) -> Result<(NodeId, Vec<String>), CompileError> {
        let def_span = self.cur.expect(&Token::Def)?;
        let name = self.expect_ident()?;
        self.cur.expect(&Token::LParen)?;

        let mut args = Vec::new();
        if self.cur.peek() != &Token::RParen {
            loop {
                args.push(self.expect_ident()?);
                if !self.cur.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.cur.expect(&Token::RParen)?;
        self.cur.expect(&Token::Colon)?;
        self.cur.expect(&Token::Newline)?;

        let body = self.parse_suite()?;

        // Exactly one def per program.
        if self.cur.peek() != &Token::Eof {
            return Err(unexpected(
                self.cur.peek(),
                self.cur.peek_span(),
                "end of program after the kernel body",
            ));
        }

        let span = def_span.merge(self.arena.get(body).span);
        let root = self.arena.push(
            NodeKind::KernelDef {
                name,
                args: args.clone(),
            },
            span,
            &[body],
        );
        Ok((root, args))
    }

    /// An indented statement block: INDENT stmt+ DEDENT.
    fn parse_suite(&mut self) -> Result<NodeId, CompileError> {
        let open = self.cur.expect(&Token::Indent)?;
        let mut stmts = Vec::new();
        while self.cur.peek() != &Token::Dedent && self.cur.peek() != &Token::Eof {
            stmts.push(self.parse_statement()?);
        }
        if stmts.is_empty() {
            return Err(unexpected(
                self.cur.peek(),
                self.cur.peek_span(),
                "at least one statement",
            ));
        }
        if self.cur.peek() == &Token::Dedent {
            self.cur.advance();
        }
        let span = stmts
            .iter()
            .fold(open, |acc, s| acc.merge(self.arena.get(*s).span));
        Ok(self.arena.push(NodeKind::Block, span, &stmts))
    }

    fn parse_statement(&mut self) -> Result<NodeId, CompileError> {
        match self.cur.peek().clone() {
            Token::Ident(_) => self.parse_assign(),
            Token::Return => self.parse_return(),
            Token::If => self.parse_if(),
            Token::For => self.parse_for(),
            Token::Break => self.parse_break(),
            Token::Continue => {
                let span = self.cur.advance().span;
                self.cur.expect(&Token::Newline)?;
                Ok(self.arena.push(NodeKind::Continue, span, &[]))
            }
            Token::Print => self.parse_print(),
            other => Err(unexpected(&other, self.cur.peek_span(), "a statement")),
        }
    }

    fn parse_assign(&mut self) -> Result<NodeId, CompileError> {
        let t = self.cur.advance();
        let (name, name_span) = match t.token {
            Token::Ident(n) => (n, t.span),
            other => return Err(unexpected(&other, t.span, "a name")),
        };
        self.cur.expect(&Token::Assign)?;
        let value = self.parse_expr()?;
        self.cur.expect(&Token::Newline)?;
        let span = name_span.merge(self.arena.get(value).span);
        Ok(self.arena.push(
            NodeKind::Assign {
                name,
                slot: UNASSIGNED_SLOT,
            },
            span,
            &[value],
        ))
    }

    fn parse_return(&mut self) -> Result<NodeId, CompileError> {
        let kw = self.cur.expect(&Token::Return)?;
        let value = self.parse_expr()?;
        self.cur.expect(&Token::Newline)?;
        let span = kw.merge(self.arena.get(value).span);
        Ok(self.arena.push(NodeKind::Return, span, &[value]))
    }

    fn parse_if(&mut self) -> Result<NodeId, CompileError> {
        let kw = self.cur.expect(&Token::If)?;
        self.parse_if_tail(kw)
    }

    /// Shared by `if` and desugared `elif`.
    fn parse_if_tail(&mut self, kw: Span) -> Result<NodeId, CompileError> {
        let cond = self.parse_expr()?;
        self.cur.expect(&Token::Colon)?;
        self.cur.expect(&Token::Newline)?;
        let then_block = self.parse_suite()?;

        let children: Vec<NodeId> = match self.cur.peek() {
            Token::Elif => {
                let elif_kw = self.cur.advance().span;
                let nested = self.parse_if_tail(elif_kw)?;
                let else_block =
                    self.arena
                        .push(NodeKind::Block, self.arena.get(nested).span, &[nested]);
                vec![cond, then_block, else_block]
            }
            Token::Else => {
                self.cur.advance();
                self.cur.expect(&Token::Colon)?;
                self.cur.expect(&Token::Newline)?;
                let else_block = self.parse_suite()?;
                vec![cond, then_block, else_block]
            }
            _ => vec![cond, then_block],
        };

        let span = children
            .iter()
            .fold(kw, |acc, c| acc.merge(self.arena.get(*c).span));
        Ok(self.arena.push(
            NodeKind::If {
                scalar: false,
                phis: Vec::new(),
            },
            span,
            &children,
        ))
    }

    fn parse_for(&mut self) -> Result<NodeId, CompileError> {
        let kw = self.cur.expect(&Token::For)?;
        let name = self.expect_ident()?;
        self.cur.expect(&Token::In)?;
        self.cur.expect(&Token::Range)?;
        self.cur.expect(&Token::LParen)?;
        let count = self.parse_expr()?;
        self.cur.expect(&Token::RParen)?;
        self.cur.expect(&Token::Colon)?;
        self.cur.expect(&Token::Newline)?;
        let body = self.parse_suite()?;

        let span = kw.merge(self.arena.get(body).span);
        Ok(self.arena.push(
            NodeKind::For {
                name,
                var_slot: UNASSIGNED_SLOT,
                carried: Vec::new(),
            },
            span,
            &[count, body],
        ))
    }

    fn parse_break(&mut self) -> Result<NodeId, CompileError> {
        let kw = self.cur.expect(&Token::Break)?;
        // `break if expr` sugar.
        let children: Vec<NodeId> = if self.cur.eat(&Token::If) {
            vec![self.parse_expr()?]
        } else {
            Vec::new()
        };
        self.cur.expect(&Token::Newline)?;
        let span = children
            .iter()
            .fold(kw, |acc, c| acc.merge(self.arena.get(*c).span));
        Ok(self.arena.push(NodeKind::Break, span, &children))
    }

    fn parse_print(&mut self) -> Result<NodeId, CompileError> {
        let kw = self.cur.expect(&Token::Print)?;
        self.cur.expect(&Token::LParen)?;

        let mut format = None;
        let mut args = Vec::new();
        if self.cur.peek() != &Token::RParen {
            // A leading string literal is the format; everything after it
            // fills the `{}` placeholders.
            if let Token::Str(s) = self.cur.peek().clone() {
                self.cur.advance();
                format = Some(s);
                while self.cur.eat(&Token::Comma) {
                    args.push(self.parse_expr()?);
                }
            } else {
                loop {
                    args.push(self.parse_expr()?);
                    if !self.cur.eat(&Token::Comma) {
                        break;
                    }
                }
            }
        }
        let close = self.cur.expect(&Token::RParen)?;
        self.cur.expect(&Token::Newline)?;

        let span = kw.merge(close);
        Ok(self.arena.push(NodeKind::Print { format }, span, &args))
    }

    fn parse_expr(&mut self) -> Result<NodeId, CompileError> {
        ExprParser::new(&mut self.cur, &mut self.arena).parse()
    }

    fn expect_ident(&mut self) -> Result<String, CompileError> {
        let t = self.cur.advance();
        match t.token {
            Token::Ident(name) => Ok(name),
            other => Err(unexpected(&other, t.span, "a name")),
        }
    }
}

/// Heuristic used by the public compile entry point: multi-statement
/// sources start with `def` (possibly after blank/comment lines).
pub fn looks_like_script(src: &str) -> bool {
    src.lines()
        .map(str::trim_start)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .is_some_and(|l| l.starts_with("def ") || l.starts_with("def("))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (ExprArena, NodeId, Vec<String>) {
        parse_script(src).unwrap()
    }

    #[test]
    fn minimal_kernel() {
        let (arena, root, args) = parse("def kernel(a, b):\n    return a + b\n");
        assert_eq!(args, vec!["a", "b"]);
        match &arena.get(root).kind {
            NodeKind::KernelDef { name, args } => {
                assert_eq!(name, "kernel");
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        let body = arena.get(root).children[0];
        assert_eq!(arena.get(body).kind, NodeKind::Block);
    }

    #[test]
    fn assignment_and_return() {
        let (arena, root, _) = parse("def f(x):\n    y = x * 2\n    return y\n");
        let body = arena.get(root).children[0];
        let stmts = &arena.get(body).children;
        assert_eq!(stmts.len(), 2);
        match &arena.get(stmts[0]).kind {
            NodeKind::Assign { name, slot } => {
                assert_eq!(name, "y");
                assert_eq!(*slot, UNASSIGNED_SLOT);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(arena.get(stmts[1]).kind, NodeKind::Return);
    }

    #[test]
    fn elif_desugars_to_nested_if() {
        let src = "def f(x):\n    if x > 1:\n        y = 1\n    elif x > 0:\n        y = 2\n    else:\n        y = 3\n    return y\n";
        let (arena, root, _) = parse(src);
        let body = arena.get(root).children[0];
        let if_stmt = arena.get(body).children[0];
        let children = &arena.get(if_stmt).children;
        assert_eq!(children.len(), 3, "if with else block");
        // The else block holds exactly one nested if.
        let else_block = children[2];
        let nested = arena.get(else_block).children[0];
        assert!(matches!(arena.get(nested).kind, NodeKind::If { .. }));
        assert_eq!(arena.get(nested).children.len(), 3);
    }

    #[test]
    fn for_loop_over_range() {
        let src = "def f(x):\n    acc = x\n    for i in range(10):\n        acc = acc + i\n    return acc\n";
        let (arena, root, _) = parse(src);
        let body = arena.get(root).children[0];
        let for_stmt = arena.get(body).children[1];
        match &arena.get(for_stmt).kind {
            NodeKind::For { name, .. } => assert_eq!(name, "i"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(arena.get(for_stmt).children.len(), 2);
    }

    #[test]
    fn break_if_sugar() {
        let src = "def f(x):\n    for i in range(8):\n        break if all(x > i)\n    return x\n";
        let (arena, root, _) = parse(src);
        let body = arena.get(root).children[0];
        let for_stmt = arena.get(body).children[0];
        let loop_body = arena.get(for_stmt).children[1];
        let brk = arena.get(loop_body).children[0];
        assert_eq!(arena.get(brk).kind, NodeKind::Break);
        assert_eq!(arena.get(brk).children.len(), 1, "condition attached");
    }

    #[test]
    fn print_with_format_string() {
        let src = "def f(x):\n    print('mean {}', sum(x))\n    return x\n";
        let (arena, root, _) = parse(src);
        let body = arena.get(root).children[0];
        let print = arena.get(body).children[0];
        match &arena.get(print).kind {
            NodeKind::Print { format } => assert_eq!(format.as_deref(), Some("mean {}")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(arena.get(print).children.len(), 1);
    }

    #[test]
    fn print_positional_arguments() {
        let src = "def f(x):\n    print(sum(x), max(x))\n    return x\n";
        let (arena, root, _) = parse(src);
        let body = arena.get(root).children[0];
        let print = arena.get(body).children[0];
        assert_eq!(arena.get(print).children.len(), 2);
    }

    #[test]
    fn program_must_be_a_single_def() {
        assert!(parse_script("x = 1\n").is_err());
        let two = "def f(x):\n    return x\ndef g(y):\n    return y\n";
        assert!(parse_script(two).is_err());
    }

    #[test]
    fn script_detection() {
        assert!(looks_like_script("def kernel(a):\n    return a\n"));
        assert!(looks_like_script("# comment\n\ndef kernel(a):\n    return a\n"));
        assert!(!looks_like_script("a + b"));
    }

    #[test]
    fn comments_and_blank_lines_anywhere() {
        let src = "# leading\ndef f(x):\n    # inner\n    y = x  # trailing\n\n    return y\n";
        let (_, _, args) = parse(src);
        assert_eq!(args, vec!["x"]);
    }
}

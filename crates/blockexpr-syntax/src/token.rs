//! Token vocabulary shared by the algebraic and multi-statement lexers.

use blockexpr_core::Span;

/// Atomic syntactic unit. `Indent`, `Dedent`, and `Newline` only appear in
/// the multi-statement mode.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Int(i64),
    Float(f64),
    /// Pure-imaginary literal: `1.5j` or `1.5I`.
    Imag(f64),
    /// Quoted string literal (print formats and string comparisons).
    Str(String),
    Ident(String),

    // Operators
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Lt,
    Le,
    EqEq,
    Ne,
    Ge,
    Gt,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    And,
    Or,
    Not,

    // Grouping and punctuation
    LParen,
    RParen,
    Comma,
    Colon,
    Assign,

    // Keywords (multi-statement mode only, except and/or/not above)
    Def,
    Return,
    For,
    In,
    Range,
    If,
    Elif,
    Else,
    Break,
    Continue,
    Print,

    // Layout (multi-statement mode only)
    Newline,
    Indent,
    Dedent,

    Eof,
}

impl Token {
    /// Display name used in "expected X, found Y" diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Token::Int(v) => format!("integer {v}"),
            Token::Float(v) => format!("float {v}"),
            Token::Imag(v) => format!("imaginary {v}j"),
            Token::Str(_) => "string literal".into(),
            Token::Ident(name) => format!("identifier '{name}'"),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::StarStar => "'**'".into(),
            Token::Slash => "'/'".into(),
            Token::Percent => "'%'".into(),
            Token::Lt => "'<'".into(),
            Token::Le => "'<='".into(),
            Token::EqEq => "'=='".into(),
            Token::Ne => "'!='".into(),
            Token::Ge => "'>='".into(),
            Token::Gt => "'>'".into(),
            Token::Amp => "'&'".into(),
            Token::Pipe => "'|'".into(),
            Token::Caret => "'^'".into(),
            Token::Tilde => "'~'".into(),
            Token::Shl => "'<<'".into(),
            Token::Shr => "'>>'".into(),
            Token::And => "'and'".into(),
            Token::Or => "'or'".into(),
            Token::Not => "'not'".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::Comma => "','".into(),
            Token::Colon => "':'".into(),
            Token::Assign => "'='".into(),
            Token::Def => "'def'".into(),
            Token::Return => "'return'".into(),
            Token::For => "'for'".into(),
            Token::In => "'in'".into(),
            Token::Range => "'range'".into(),
            Token::If => "'if'".into(),
            Token::Elif => "'elif'".into(),
            Token::Else => "'else'".into(),
            Token::Break => "'break'".into(),
            Token::Continue => "'continue'".into(),
            Token::Print => "'print'".into(),
            Token::Newline => "end of line".into(),
            Token::Indent => "indent".into(),
            Token::Dedent => "dedent".into(),
            Token::Eof => "end of input".into(),
        }
    }
}

/// A token with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

impl SpannedToken {
    pub fn new(token: Token, span: Span) -> Self {
        Self { token, span }
    }
}

//! Tokenizers for both grammars.
//!
//! [`Mode::Expr`] lexes the single-line algebraic form: whitespace is
//! insignificant and layout tokens are never produced. [`Mode::Script`]
//! additionally tracks statement layout: leading-whitespace changes at
//! statement boundaries become `Indent`/`Dedent` tokens, newlines become
//! statement terminators, `#` starts a comment to end of line, and the
//! statement keywords are recognized. Indentation must be
//! whitespace-homogeneous per source: the first indent character seen
//! (space or tab) is the only one accepted afterwards.
//!
//! All diagnostics carry byte offsets; script-mode diagnostics also carry
//! line/column.

use blockexpr_core::{CompileError, LineCol, Span};

use crate::token::{SpannedToken, Token};

/// Lexing mode, selected by the compile entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Expr,
    Script,
}

pub struct Lexer<'s> {
    src: &'s [u8],
    pos: usize,
    mode: Mode,
    tokens: Vec<SpannedToken>,
    /// Indentation widths of enclosing blocks; always starts with 0.
    indents: Vec<usize>,
    /// First indentation character seen (b' ' or b'\t').
    indent_char: Option<u8>,
    /// Byte offsets of line starts, for offset -> line/col mapping.
    line_starts: Vec<usize>,
}

impl<'s> Lexer<'s> {
    pub fn new(src: &'s str, mode: Mode) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            mode,
            tokens: Vec::new(),
            indents: vec![0],
            indent_char: None,
            line_starts: vec![0],
        }
    }

    /// Tokenizes the whole source, appending a final `Eof` token.
    pub fn tokenize(mut self) -> Result<Vec<SpannedToken>, CompileError> {
        match self.mode {
            Mode::Expr => self.tokenize_expr()?,
            Mode::Script => self.tokenize_script()?,
        }
        let end = self.src.len();
        self.tokens
            .push(SpannedToken::new(Token::Eof, Span::new(end, end)));
        Ok(self.tokens)
    }

    fn tokenize_expr(&mut self) -> Result<(), CompileError> {
        while self.pos < self.src.len() {
            let c = self.src[self.pos];
            if c.is_ascii_whitespace() {
                self.pos += 1;
                continue;
            }
            let tok = self.lex_token()?;
            self.tokens.push(tok);
        }
        Ok(())
    }

    fn tokenize_script(&mut self) -> Result<(), CompileError> {
        while self.pos < self.src.len() {
            self.lex_line()?;
        }
        // Close any open blocks.
        let end = self.src.len();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.tokens
                .push(SpannedToken::new(Token::Dedent, Span::new(end, end)));
        }
        Ok(())
    }

    /// Lexes one source line: indentation, tokens, terminator.
    fn lex_line(&mut self) -> Result<(), CompileError> {
        let line_start = self.pos;
        let seen_indent_char = self.indent_char;
        let width = self.measure_indent()?;

        // Blank or comment-only lines do not affect layout, and their
        // indentation does not commit the file to an indent character.
        if self.pos >= self.src.len() || self.src[self.pos] == b'\n' || self.src[self.pos] == b'#'
        {
            self.indent_char = seen_indent_char;
            self.skip_to_next_line();
            return Ok(());
        }

        self.apply_indent(width, line_start)?;

        let mut emitted = false;
        while self.pos < self.src.len() {
            let c = self.src[self.pos];
            if c == b'\n' {
                break;
            }
            if c == b'#' {
                self.skip_comment();
                break;
            }
            if c == b' ' || c == b'\t' || c == b'\r' {
                self.pos += 1;
                continue;
            }
            let tok = self.lex_token()?;
            self.tokens.push(tok);
            emitted = true;
        }
        if emitted {
            let p = self.pos.min(self.src.len());
            self.tokens
                .push(SpannedToken::new(Token::Newline, Span::new(p, p)));
        }
        self.skip_to_next_line();
        Ok(())
    }

    /// Measures leading whitespace, enforcing per-source homogeneity.
    fn measure_indent(&mut self) -> Result<usize, CompileError> {
        let mut width = 0usize;
        while self.pos < self.src.len() {
            let c = self.src[self.pos];
            if c != b' ' && c != b'\t' {
                break;
            }
            match self.indent_char {
                None => self.indent_char = Some(c),
                Some(first) if first != c => {
                    return Err(self.error(
                        self.pos,
                        "indentation mixes tabs and spaces".to_string(),
                    ));
                }
                _ => {}
            }
            width += 1;
            self.pos += 1;
        }
        Ok(width)
    }

    fn apply_indent(&mut self, width: usize, at: usize) -> Result<(), CompileError> {
        let current = *self.indents.last().unwrap();
        if width > current {
            self.indents.push(width);
            self.tokens
                .push(SpannedToken::new(Token::Indent, Span::new(at, at + width)));
        } else if width < current {
            while *self.indents.last().unwrap() > width {
                self.indents.pop();
                self.tokens
                    .push(SpannedToken::new(Token::Dedent, Span::new(at, at + width)));
            }
            if *self.indents.last().unwrap() != width {
                return Err(self.error(at, "dedent to an unknown indentation level".to_string()));
            }
        }
        Ok(())
    }

    fn skip_comment(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos] != b'\n' {
            self.pos += 1;
        }
    }

    fn skip_to_next_line(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos] != b'\n' {
            self.pos += 1;
        }
        if self.pos < self.src.len() {
            self.pos += 1; // consume '\n'
            self.line_starts.push(self.pos);
        }
    }

    /// Lexes one token starting at a non-whitespace byte.
    fn lex_token(&mut self) -> Result<SpannedToken, CompileError> {
        let start = self.pos;
        let c = self.src[self.pos];

        if c.is_ascii_digit() || (c == b'.' && self.peek(1).is_some_and(|d| d.is_ascii_digit())) {
            return self.lex_number();
        }
        if c == b'_' || c.is_ascii_alphabetic() {
            return Ok(self.lex_ident());
        }
        if c == b'"' || c == b'\'' {
            return self.lex_string(c);
        }

        self.pos += 1;
        let token = match c {
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => {
                if self.peek(0) == Some(b'*') {
                    self.pos += 1;
                    Token::StarStar
                } else {
                    Token::Star
                }
            }
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b',' => Token::Comma,
            b':' => Token::Colon,
            b'~' => Token::Tilde,
            b'&' => Token::Amp,
            b'|' => Token::Pipe,
            b'^' => Token::Caret,
            b'<' => match self.peek(0) {
                Some(b'=') => {
                    self.pos += 1;
                    Token::Le
                }
                Some(b'<') => {
                    self.pos += 1;
                    Token::Shl
                }
                _ => Token::Lt,
            },
            b'>' => match self.peek(0) {
                Some(b'=') => {
                    self.pos += 1;
                    Token::Ge
                }
                Some(b'>') => {
                    self.pos += 1;
                    Token::Shr
                }
                _ => Token::Gt,
            },
            b'=' => {
                if self.peek(0) == Some(b'=') {
                    self.pos += 1;
                    Token::EqEq
                } else {
                    Token::Assign
                }
            }
            b'!' => {
                if self.peek(0) == Some(b'=') {
                    self.pos += 1;
                    Token::Ne
                } else {
                    return Err(self.error(start, "unexpected character '!'".to_string()));
                }
            }
            other => {
                return Err(self.error(
                    start,
                    format!("unknown character '{}'", other as char),
                ));
            }
        };
        Ok(SpannedToken::new(token, Span::new(start, self.pos)))
    }

    fn lex_number(&mut self) -> Result<SpannedToken, CompileError> {
        let start = self.pos;

        // Hex integer.
        if self.src[self.pos] == b'0'
            && matches!(self.peek(1), Some(b'x') | Some(b'X'))
            && self.peek(2).is_some_and(|d| d.is_ascii_hexdigit())
        {
            self.pos += 2;
            while self.pos < self.src.len() && self.src[self.pos].is_ascii_hexdigit() {
                self.pos += 1;
            }
            let text = std::str::from_utf8(&self.src[start + 2..self.pos]).unwrap();
            let value = i64::from_str_radix(text, 16).map_err(|_| {
                self.error(start, "hex integer literal out of range".to_string())
            })?;
            return Ok(SpannedToken::new(
                Token::Int(value),
                Span::new(start, self.pos),
            ));
        }

        let mut is_float = false;
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if self.pos < self.src.len() && self.src[self.pos] == b'.' {
            is_float = true;
            self.pos += 1;
            while self.pos < self.src.len() && self.src[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
        }
        if self.pos < self.src.len() && matches!(self.src[self.pos], b'e' | b'E') {
            let mut look = self.pos + 1;
            if look < self.src.len() && matches!(self.src[look], b'+' | b'-') {
                look += 1;
            }
            if look < self.src.len() && self.src[look].is_ascii_digit() {
                is_float = true;
                self.pos = look;
                while self.pos < self.src.len() && self.src[self.pos].is_ascii_digit() {
                    self.pos += 1;
                }
            }
        }

        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();

        // Imaginary suffix.
        if self.pos < self.src.len() && matches!(self.src[self.pos], b'j' | b'I') {
            self.pos += 1;
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(start, "malformed imaginary literal".to_string()))?;
            return Ok(SpannedToken::new(
                Token::Imag(value),
                Span::new(start, self.pos),
            ));
        }

        let token = if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(start, "malformed float literal".to_string()))?;
            Token::Float(value)
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| self.error(start, "integer literal out of range".to_string()))?;
            Token::Int(value)
        };
        Ok(SpannedToken::new(token, Span::new(start, self.pos)))
    }

    fn lex_ident(&mut self) -> SpannedToken {
        let start = self.pos;
        while self.pos < self.src.len()
            && (self.src[self.pos] == b'_' || self.src[self.pos].is_ascii_alphanumeric())
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();

        // and/or/not are operators in both modes; the statement keywords
        // only exist in script mode.
        let token = match text {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            _ if self.mode == Mode::Script => match text {
                "def" => Token::Def,
                "return" => Token::Return,
                "for" => Token::For,
                "in" => Token::In,
                "range" => Token::Range,
                "if" => Token::If,
                "elif" => Token::Elif,
                "else" => Token::Else,
                "break" => Token::Break,
                "continue" => Token::Continue,
                "print" => Token::Print,
                _ => Token::Ident(text.to_string()),
            },
            _ => Token::Ident(text.to_string()),
        };
        SpannedToken::new(token, Span::new(start, self.pos))
    }

    fn lex_string(&mut self, quote: u8) -> Result<SpannedToken, CompileError> {
        let start = self.pos;
        self.pos += 1;
        let content_start = self.pos;
        while self.pos < self.src.len() && self.src[self.pos] != quote {
            if self.src[self.pos] == b'\n' {
                break;
            }
            self.pos += 1;
        }
        if self.pos >= self.src.len() || self.src[self.pos] != quote {
            return Err(self.error(start, "unterminated string literal".to_string()));
        }
        let text = std::str::from_utf8(&self.src[content_start..self.pos])
            .map_err(|_| self.error(start, "string literal is not valid UTF-8".to_string()))?
            .to_string();
        self.pos += 1;
        Ok(SpannedToken::new(
            Token::Str(text),
            Span::new(start, self.pos),
        ))
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.pos + ahead).copied()
    }

    fn line_col(&self, offset: usize) -> LineCol {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        LineCol::new(
            (line + 1) as u32,
            (offset - self.line_starts[line] + 1) as u32,
        )
    }

    fn error(&self, at: usize, message: String) -> CompileError {
        CompileError::Parse {
            span: Span::new(at, at + 1),
            message,
            line_col: if self.mode == Mode::Script {
                Some(self.line_col(at))
            } else {
                None
            },
        }
    }
}

/// Tokenizes `src` in the given mode.
pub fn tokenize(src: &str, mode: Mode) -> Result<Vec<SpannedToken>, CompileError> {
    Lexer::new(src, mode).tokenize()
}

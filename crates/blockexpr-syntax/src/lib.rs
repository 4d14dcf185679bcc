pub mod lexer;
pub mod parser;
pub mod script;
pub mod token;

pub use lexer::{tokenize, Lexer, Mode};
pub use parser::{parse_expression, ExprParser, TokenCursor};
pub use script::{looks_like_script, parse_script};
pub use token::{SpannedToken, Token};

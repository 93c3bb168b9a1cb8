//! Key statements: `SET KEY`, `REKEY`, `CLEAR KEY` and the cipher pragmas.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::*;
pub use lexer::Lexer;
pub use parser::Parser;
pub use token::Token;

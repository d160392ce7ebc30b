// Brim parser -- token stream to AST.

pub mod ast;
mod parser;

use brim_common::error::Result;
use brim_common::token::Token;
use brim_lexer::Lexer;

use ast::Module;

/// Parse a token stream into a module.
pub fn parse_tokens(tokens: Vec<Token>) -> Result<Module> {
    parser::parse_module(tokens)
}

/// Lex and parse a source file.
pub fn parse(source: &str) -> Result<Module> {
    parse_tokens(Lexer::tokenize(source)?)
}

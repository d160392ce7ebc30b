// Brim common -- shared leaf types for the Brim compiler.

pub mod error;
pub mod paths;
pub mod span;
pub mod token;

pub use error::{Diagnostic, Result, Stage};
pub use span::Pos;
pub use token::{Token, TokenKind};

use std::fmt;

use serde::Serialize;

/// A source position: 1-based line and column.
///
/// Brim diagnostics are line/column based; every token and AST node carries
/// the position of its first character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    /// Position used when no better one is available (start of file).
    pub const START: Pos = Pos { line: 1, col: 1 };
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_line_colon_col() {
        assert_eq!(Pos::new(3, 14).to_string(), "3:14");
    }
}

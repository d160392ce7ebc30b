use brim_common::span::Pos;

/// Character-level source iterator for the Brim lexer.
///
/// Wraps the source text and provides character-by-character iteration with
/// line/column tracking. Columns count characters, 1-based; a newline resets
/// the column and bumps the line.
#[derive(Clone)]
pub struct Cursor<'src> {
    chars: std::str::Chars<'src>,
    line: u32,
    col: u32,
}

impl<'src> Cursor<'src> {
    /// Create a new cursor at the start of the source text.
    pub fn new(source: &'src str) -> Self {
        Self {
            chars: source.chars(),
            line: 1,
            col: 1,
        }
    }

    /// Look at the current character without consuming it.
    pub fn peek(&self) -> Option<char> {
        self.chars.clone().next()
    }

    /// Look at the character after the current one without consuming anything.
    pub fn peek_next(&self) -> Option<char> {
        let mut iter = self.chars.clone();
        iter.next();
        iter.next()
    }

    /// Consume the current character.
    ///
    /// Returns the consumed character, or `None` at end of input.
    pub fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    /// Position of the current (not yet consumed) character.
    pub fn pos(&self) -> Pos {
        Pos::new(self.line, self.col)
    }

    /// Whether there are no more characters to consume.
    pub fn is_eof(&self) -> bool {
        self.peek().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_cursor_starts_at_one_one() {
        let cursor = Cursor::new("hi");
        assert_eq!(cursor.pos(), Pos::new(1, 1));
        assert!(!cursor.is_eof());
    }

    #[test]
    fn peek_does_not_advance() {
        let cursor = Cursor::new("ab");
        assert_eq!(cursor.peek(), Some('a'));
        assert_eq!(cursor.peek(), Some('a'));
        assert_eq!(cursor.pos(), Pos::new(1, 1));
    }

    #[test]
    fn peek_next_looks_ahead() {
        let cursor = Cursor::new("ab");
        assert_eq!(cursor.peek_next(), Some('b'));
        assert_eq!(cursor.pos(), Pos::new(1, 1));
    }

    #[test]
    fn advance_tracks_lines_and_columns() {
        let mut cursor = Cursor::new("a\nbc");
        assert_eq!(cursor.advance(), Some('a'));
        assert_eq!(cursor.pos(), Pos::new(1, 2));
        assert_eq!(cursor.advance(), Some('\n'));
        assert_eq!(cursor.pos(), Pos::new(2, 1));
        assert_eq!(cursor.advance(), Some('b'));
        assert_eq!(cursor.pos(), Pos::new(2, 2));
        assert_eq!(cursor.advance(), Some('c'));
        assert_eq!(cursor.advance(), None);
        assert!(cursor.is_eof());
    }
}

// Brim lexer -- tokenizer for the Brim programming language.

mod cursor;

use brim_common::error::{Diagnostic, Result, Stage};
use brim_common::span::Pos;
use brim_common::token::{keyword_from_str, Token, TokenKind};
use cursor::Cursor;

/// The Brim lexer. Converts source text into a stream of tokens.
///
/// Brim is indentation-sensitive, so the lexer tracks two pieces of layout
/// state alongside the character cursor: the number of leading spaces since
/// the most recent newline (`indent`) and whether the next token is the
/// first of its physical line (`on_new_line`). Both are stamped onto the
/// token that consumes them.
pub struct Lexer<'src> {
    cursor: Cursor<'src>,
    indent: u32,
    on_new_line: bool,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source text.
    pub fn new(source: &'src str) -> Self {
        Self {
            cursor: Cursor::new(source),
            indent: 0,
            on_new_line: true,
        }
    }

    /// Tokenize the entire source.
    ///
    /// The first lexical error aborts with a diagnostic. No end-of-file
    /// token is appended.
    pub fn tokenize(source: &str) -> Result<Vec<Token>> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();

        while let Some(tok) = lexer.next_token()? {
            tokens.push(tok);
        }

        Ok(tokens)
    }

    fn err(&self, message: impl Into<String>, pos: Pos) -> Diagnostic {
        Diagnostic::new(Stage::Lex, message, pos)
    }

    // ── Layout state ───────────────────────────────────────────────────

    /// Stamp the pending layout state onto a freshly built token.
    fn make_tok(&mut self, kind: TokenKind, text: impl Into<String>, pos: Pos) -> Token {
        let mut tok = Token::new(kind, text, pos);
        tok.indent = std::mem::take(&mut self.indent);
        tok.is_on_new_line = std::mem::replace(&mut self.on_new_line, false);
        tok
    }

    /// Skip whitespace, comments and line continuations, maintaining the
    /// indent/new-line state.
    fn skip(&mut self) -> Result<()> {
        let mut in_comment = false;

        loop {
            let Some(c) = self.cursor.peek() else {
                return Ok(());
            };

            if in_comment && c != '\n' {
                self.cursor.advance();
                continue;
            }

            match c {
                '\n' => {
                    self.cursor.advance();
                    self.indent = 0;
                    self.on_new_line = true;
                    in_comment = false;
                }
                ' ' => {
                    self.cursor.advance();
                    self.indent += 1;
                }
                '\t' => return Err(self.err("tab illegal", self.cursor.pos())),
                '\\' => self.skip_line_continuation()?,
                '-' if self.cursor.peek_next() == Some('-') => {
                    in_comment = true;
                    self.cursor.advance();
                }
                _ => return Ok(()),
            }
        }
    }

    /// `\` joins the next line to the current one: the newline is consumed
    /// and the continuation's tokens are not `on_new_line`.
    fn skip_line_continuation(&mut self) -> Result<()> {
        let pos = self.cursor.pos();

        if self.on_new_line {
            return Err(self.err("token `\\` can only be used as last character of the line", pos));
        }

        self.cursor.advance();

        while matches!(self.cursor.peek(), Some(' ') | Some('\t')) {
            self.cursor.advance();
        }

        if self.cursor.peek() != Some('\n') {
            return Err(self.err("expected token on new line after `\\`", self.cursor.pos()));
        }

        self.cursor.advance();
        self.indent = 0;
        self.on_new_line = false;
        Ok(())
    }

    // ── Token producers ────────────────────────────────────────────────

    fn next_token(&mut self) -> Result<Option<Token>> {
        self.skip()?;

        let Some(c) = self.cursor.peek() else {
            return Ok(None);
        };

        let tok = if c.is_ascii_digit() {
            self.collect_number()?
        } else if c.is_ascii_alphabetic() || c == '_' {
            self.collect_ident()
        } else if c == '\'' || c == '`' {
            self.collect_str_or_chr()?
        } else {
            self.collect_punctuation()?
        };

        Ok(Some(tok))
    }

    fn collect_ident(&mut self) -> Token {
        let pos = self.cursor.pos();
        let mut word = String::new();

        while let Some(c) = self.cursor.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.cursor.advance();
            } else {
                break;
            }
        }

        let kind = keyword_from_str(&word).unwrap_or(TokenKind::Id);
        self.make_tok(kind, word, pos)
    }

    /// Numbers: decimal digits with `'` separators (stripped) and at most
    /// one `.`. A trailing `.` or `'` is not part of the number and stays in
    /// the stream.
    fn collect_number(&mut self) -> Result<Token> {
        let pos = self.cursor.pos();

        // Scan ahead on a clone to find the token extent.
        let mut probe = self.cursor.clone();
        let mut raw = String::new();
        while let Some(c) = probe.peek() {
            if c.is_ascii_digit() || c == '.' || c == '\'' {
                raw.push(c);
                probe.advance();
            } else {
                break;
            }
        }

        // A trailing `.`/`'` run is stripped from the value; the last such
        // character is left unconsumed for the next token.
        let value_str = raw.trim_end_matches(['.', '\'']);
        let consume = if value_str.len() < raw.len() {
            raw.len() - 1
        } else {
            raw.len()
        };
        for _ in 0..consume {
            self.cursor.advance();
        }

        let digits: String = value_str.chars().filter(|&c| c != '\'').collect();
        let dots = digits.matches('.').count();

        if digits.is_empty() || dots > 1 {
            return Err(self.err("malformed num", pos));
        }

        if dots == 1 {
            if digits.parse::<f64>().is_err() {
                return Err(self.err("malformed num", pos));
            }
            Ok(self.make_tok(TokenKind::FNum, digits, pos))
        } else {
            if digits.parse::<i128>().is_err() {
                return Err(self.err("malformed num", pos));
            }
            Ok(self.make_tok(TokenKind::Num, digits, pos))
        }
    }

    fn escaped_char_value(&self, c: char, pos: Pos) -> Result<char> {
        match c {
            'n' => Ok('\n'),
            'r' => Ok('\r'),
            't' => Ok('\t'),
            '0' => Ok('\0'),
            '\'' => Ok('\''),
            '`' => Ok('`'),
            _ => Err(self.err("unknown escaped char", pos)),
        }
    }

    /// String literals `'…'` and character literals `` `x` ``.
    fn collect_str_or_chr(&mut self) -> Result<Token> {
        let pos = self.cursor.pos();
        let apex = self.cursor.advance().expect("caller peeked the quote");
        let is_str = apex == '\'';
        let kind_name = if is_str { "str" } else { "chr" };
        let mut value = String::new();

        loop {
            match self.cursor.peek() {
                None => return Err(self.err(format!("malformed {kind_name}"), pos)),
                Some(c) if c == apex => {
                    self.cursor.advance();
                    break;
                }
                Some('\\') => {
                    self.cursor.advance();
                    let esc_pos = self.cursor.pos();
                    let Some(esc) = self.cursor.advance() else {
                        return Err(self.err(format!("malformed {kind_name}"), pos));
                    };
                    value.push(self.escaped_char_value(esc, esc_pos)?);
                }
                Some(c) => {
                    value.push(c);
                    self.cursor.advance();
                }
            }
        }

        if !is_str && value.chars().count() != 1 {
            return Err(self.err("malformed chr (1 character expected)", pos));
        }

        let kind = if is_str { TokenKind::Str } else { TokenKind::Chr };
        Ok(self.make_tok(kind, value, pos))
    }

    fn collect_punctuation(&mut self) -> Result<Token> {
        let pos = self.cursor.pos();
        let c = self.cursor.advance().expect("caller peeked a char");

        let two = match (c, self.cursor.peek()) {
            ('=', Some('=')) => Some(TokenKind::EqEq),
            ('-', Some('>')) => Some(TokenKind::Arrow),
            ('.', Some('.')) => Some(TokenKind::DotDot),
            ('+', Some('=')) => Some(TokenKind::PlusEq),
            ('-', Some('=')) => Some(TokenKind::MinusEq),
            ('*', Some('=')) => Some(TokenKind::StarEq),
            ('!', Some('=')) => Some(TokenKind::NotEq),
            ('<', Some('=')) => Some(TokenKind::LtEq),
            ('>', Some('=')) => Some(TokenKind::GtEq),
            _ => None,
        };

        if let Some(kind) = two {
            self.cursor.advance();
            return Ok(self.make_tok(kind, kind.as_str(), pos));
        }

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '=' => TokenKind::Eq,
            '|' => TokenKind::Pipe,
            '!' => TokenKind::Bang,
            _ => return Err(self.err(format!("unexpected character `{c}`"), pos)),
        };

        Ok(self.make_tok(kind, kind.as_str(), pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            kinds("fn main x"),
            vec![TokenKind::KwFn, TokenKind::Id, TokenKind::Id]
        );
    }

    #[test]
    fn numbers_with_separators() {
        let toks = Lexer::tokenize("1'000 3.14").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Num);
        assert_eq!(toks[0].text, "1000");
        assert_eq!(toks[1].kind, TokenKind::FNum);
        assert_eq!(toks[1].text, "3.14");
    }

    #[test]
    fn trailing_dot_stays_in_stream() {
        let toks = Lexer::tokenize("5.x").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Num);
        assert_eq!(toks[0].text, "5");
        assert_eq!(toks[1].kind, TokenKind::Dot);
        assert_eq!(toks[2].kind, TokenKind::Id);
    }

    #[test]
    fn two_dots_in_number_is_fatal() {
        assert!(Lexer::tokenize("1.2.3").is_err());
    }

    #[test]
    fn double_punctuation() {
        assert_eq!(
            kinds("== -> .. += -= *= != <= >="),
            vec![
                TokenKind::EqEq,
                TokenKind::Arrow,
                TokenKind::DotDot,
                TokenKind::PlusEq,
                TokenKind::MinusEq,
                TokenKind::StarEq,
                TokenKind::NotEq,
                TokenKind::LtEq,
                TokenKind::GtEq,
            ]
        );
    }

    #[test]
    fn string_and_char_literals() {
        let toks = Lexer::tokenize(r"'hi\n' `a` `\0`").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Str);
        assert_eq!(toks[0].text, "hi\n");
        assert_eq!(toks[1].kind, TokenKind::Chr);
        assert_eq!(toks[1].text, "a");
        assert_eq!(toks[2].text, "\0");
    }

    #[test]
    fn char_literal_must_hold_one_char() {
        assert!(Lexer::tokenize("`ab`").is_err());
    }

    #[test]
    fn unterminated_string_is_fatal() {
        assert!(Lexer::tokenize("'oops").is_err());
    }

    #[test]
    fn unknown_escape_is_fatal() {
        assert!(Lexer::tokenize(r"'\q'").is_err());
    }

    #[test]
    fn tab_is_fatal() {
        let err = Lexer::tokenize("fn\tmain").unwrap_err();
        assert_eq!(err.message, "tab illegal");
    }

    #[test]
    fn comments_run_to_end_of_line() {
        let toks = Lexer::tokenize("a -- rest ignored\nb").unwrap();
        assert_eq!(toks.len(), 2);
        assert!(toks[1].is_on_new_line);
        assert_eq!(toks[1].pos, Pos::new(2, 1));
    }

    #[test]
    fn minus_is_not_a_comment() {
        assert_eq!(kinds("a - b"), vec![TokenKind::Id, TokenKind::Minus, TokenKind::Id]);
    }

    #[test]
    fn indent_and_new_line_tracking() {
        let toks = Lexer::tokenize("fn f:\n  pass\n").unwrap();
        assert!(toks[0].is_on_new_line);
        assert_eq!(toks[0].indent, 0);
        assert!(!toks[1].is_on_new_line);
        let pass = toks.iter().find(|t| t.kind == TokenKind::KwPass).unwrap();
        assert!(pass.is_on_new_line);
        assert_eq!(pass.indent, 2);
    }

    #[test]
    fn line_continuation_joins_lines() {
        let toks = Lexer::tokenize("a \\\n  b").unwrap();
        assert_eq!(toks.len(), 2);
        assert!(!toks[1].is_on_new_line);
        assert_eq!(toks[1].pos.line, 2);
    }

    #[test]
    fn stray_continuation_at_line_start_is_fatal() {
        assert!(Lexer::tokenize("\\\nx").is_err());
    }

    #[test]
    fn continuation_must_end_the_line() {
        assert!(Lexer::tokenize("a \\ b\nc").is_err());
    }

    #[test]
    fn positions_are_one_based() {
        let toks = Lexer::tokenize("ab cd").unwrap();
        assert_eq!(toks[0].pos, Pos::new(1, 1));
        assert_eq!(toks[1].pos, Pos::new(1, 4));
    }
}

use std::fmt;

use serde::Serialize;

use crate::span::Pos;

/// The kind of a Brim token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    // Literals and identifiers
    Id,
    Num,
    FNum,
    Str,
    Chr,

    // Keywords
    KwFn,
    KwPass,
    KwIf,
    KwElif,
    KwElse,
    KwReturn,
    KwUndefined,
    KwTrue,
    KwFalse,
    KwNone,
    KwType,
    KwWhile,
    KwBreak,
    KwContinue,
    KwMut,
    KwFor,
    KwImport,
    KwAnd,
    KwOr,
    KwNot,
    KwTry,
    KwOut,
    KwFrom,
    KwDefer,
    KwTest,
    KwMatch,
    KwCase,
    KwCast,
    KwRef,

    // Two-character punctuation
    EqEq,
    Arrow,
    DotDot,
    PlusEq,
    MinusEq,
    StarEq,
    NotEq,
    LtEq,
    GtEq,

    // Single-character punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    Lt,
    Gt,
    Comma,
    Colon,
    Dot,
    Star,
    Slash,
    Percent,
    Plus,
    Minus,
    Eq,
    Pipe,
    Bang,
}

impl TokenKind {
    /// The surface spelling of the token kind, used in diagnostics and when
    /// rendering a token stream back to text.
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Id => "id",
            TokenKind::Num => "num",
            TokenKind::FNum => "fnum",
            TokenKind::Str => "str",
            TokenKind::Chr => "chr",
            TokenKind::KwFn => "fn",
            TokenKind::KwPass => "pass",
            TokenKind::KwIf => "if",
            TokenKind::KwElif => "elif",
            TokenKind::KwElse => "else",
            TokenKind::KwReturn => "return",
            TokenKind::KwUndefined => "Undefined",
            TokenKind::KwTrue => "True",
            TokenKind::KwFalse => "False",
            TokenKind::KwNone => "None",
            TokenKind::KwType => "type",
            TokenKind::KwWhile => "while",
            TokenKind::KwBreak => "break",
            TokenKind::KwContinue => "continue",
            TokenKind::KwMut => "mut",
            TokenKind::KwFor => "for",
            TokenKind::KwImport => "import",
            TokenKind::KwAnd => "and",
            TokenKind::KwOr => "or",
            TokenKind::KwNot => "not",
            TokenKind::KwTry => "try",
            TokenKind::KwOut => "out",
            TokenKind::KwFrom => "from",
            TokenKind::KwDefer => "defer",
            TokenKind::KwTest => "test",
            TokenKind::KwMatch => "match",
            TokenKind::KwCase => "case",
            TokenKind::KwCast => "cast",
            TokenKind::KwRef => "ref",
            TokenKind::EqEq => "==",
            TokenKind::Arrow => "->",
            TokenKind::DotDot => "..",
            TokenKind::PlusEq => "+=",
            TokenKind::MinusEq => "-=",
            TokenKind::StarEq => "*=",
            TokenKind::NotEq => "!=",
            TokenKind::LtEq => "<=",
            TokenKind::GtEq => ">=",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Dot => ".",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Eq => "=",
            TokenKind::Pipe => "|",
            TokenKind::Bang => "!",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an identifier lexeme to its keyword kind, if it is one.
pub fn keyword_from_str(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "fn" => TokenKind::KwFn,
        "pass" => TokenKind::KwPass,
        "if" => TokenKind::KwIf,
        "elif" => TokenKind::KwElif,
        "else" => TokenKind::KwElse,
        "return" => TokenKind::KwReturn,
        "Undefined" => TokenKind::KwUndefined,
        "True" => TokenKind::KwTrue,
        "False" => TokenKind::KwFalse,
        "None" => TokenKind::KwNone,
        "type" => TokenKind::KwType,
        "while" => TokenKind::KwWhile,
        "break" => TokenKind::KwBreak,
        "continue" => TokenKind::KwContinue,
        "mut" => TokenKind::KwMut,
        "for" => TokenKind::KwFor,
        "import" => TokenKind::KwImport,
        "and" => TokenKind::KwAnd,
        "or" => TokenKind::KwOr,
        "not" => TokenKind::KwNot,
        "try" => TokenKind::KwTry,
        "out" => TokenKind::KwOut,
        "from" => TokenKind::KwFrom,
        "defer" => TokenKind::KwDefer,
        "test" => TokenKind::KwTest,
        "match" => TokenKind::KwMatch,
        "case" => TokenKind::KwCase,
        "cast" => TokenKind::KwCast,
        "ref" => TokenKind::KwRef,
        _ => return None,
    };
    Some(kind)
}

/// A Brim token.
///
/// `indent` is the number of leading spaces accumulated since the most
/// recent newline at the point the token starts; `is_on_new_line` is true
/// only for the first token of a physical line. Both are consumed by the
/// parser's indentation-sensitive block rules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    /// The token's value: the identifier/number lexeme, or the decoded
    /// contents of a string/char literal. For keywords and punctuation this
    /// equals `kind.as_str()`.
    pub text: String,
    pub pos: Pos,
    pub indent: u32,
    pub is_on_new_line: bool,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, pos: Pos) -> Self {
        Self {
            kind,
            text: text.into(),
            pos,
            indent: 0,
            is_on_new_line: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_resolve() {
        assert_eq!(keyword_from_str("fn"), Some(TokenKind::KwFn));
        assert_eq!(keyword_from_str("cast"), Some(TokenKind::KwCast));
        assert_eq!(keyword_from_str("main"), None);
    }

    #[test]
    fn kind_spelling_round_trips_for_keywords() {
        for word in ["fn", "pass", "defer", "match", "Undefined", "ref"] {
            let kind = keyword_from_str(word).unwrap();
            assert_eq!(kind.as_str(), word);
        }
    }
}

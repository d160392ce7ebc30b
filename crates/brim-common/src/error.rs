use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::span::Pos;

/// The compilation phase a diagnostic originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Lex,
    Parse,
    Map,
    Type,
    Sem,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Lex => "lex",
            Stage::Parse => "parse",
            Stage::Map => "map",
            Stage::Type => "type",
            Stage::Sem => "semantic",
        };
        f.write_str(s)
    }
}

/// A fatal compiler diagnostic.
///
/// Brim compilation is one-message-and-stop: the first diagnostic aborts the
/// whole run, so this type doubles as the error of every phase's `Result`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub stage: Stage,
    pub message: String,
    /// Path of the module the diagnostic points into. Attached by whichever
    /// layer knows it (the module loader or the generator).
    pub path: Option<PathBuf>,
    pub pos: Pos,
}

impl Diagnostic {
    pub fn new(stage: Stage, message: impl Into<String>, pos: Pos) -> Self {
        Self {
            stage,
            message: message.into(),
            path: None,
            pos,
        }
    }

    /// Attach a module path, unless one is already set.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(
                f,
                "{}:{}: {} error: {}",
                path.display(),
                self.pos,
                self.stage,
                self.message
            ),
            None => write!(f, "{}: {} error: {}", self.pos, self.stage, self.message),
        }
    }
}

impl std::error::Error for Diagnostic {}

pub type Result<T> = std::result::Result<T, Diagnostic>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_path() {
        let d = Diagnostic::new(Stage::Lex, "tab illegal", Pos::new(2, 5));
        assert_eq!(d.to_string(), "2:5: lex error: tab illegal");
    }

    #[test]
    fn display_with_path() {
        let d = Diagnostic::new(Stage::Sem, "symbol `x` not declared", Pos::new(7, 1))
            .with_path("src/main.brim");
        assert_eq!(
            d.to_string(),
            "src/main.brim:7:1: semantic error: symbol `x` not declared"
        );
    }

    #[test]
    fn with_path_keeps_first_path() {
        let d = Diagnostic::new(Stage::Map, "dup", Pos::START)
            .with_path("a.brim")
            .with_path("b.brim");
        assert_eq!(d.path, Some(PathBuf::from("a.brim")));
    }
}

//! Lexer integration tests, including the render/re-lex round-trip law:
//! rendering a token stream back to text and lexing it again preserves every
//! token's kind, value and layout.

use brim_common::token::{Token, TokenKind};
use brim_lexer::Lexer;

/// Render a token stream back to source text.
///
/// Line structure and indentation are reproduced exactly; tokens within a
/// line are separated by single spaces.
fn render(tokens: &[Token]) -> String {
    let mut out = String::new();

    for (i, tok) in tokens.iter().enumerate() {
        if tok.is_on_new_line {
            if i > 0 {
                out.push('\n');
            }
            for _ in 0..tok.indent {
                out.push(' ');
            }
        } else if i > 0 {
            out.push(' ');
        }

        match tok.kind {
            TokenKind::Str => {
                out.push('\'');
                out.push_str(&escape(&tok.text));
                out.push('\'');
            }
            TokenKind::Chr => {
                out.push('`');
                out.push_str(&escape(&tok.text));
                out.push('`');
            }
            _ => out.push_str(&tok.text),
        }
    }

    out
}

fn escape(value: &str) -> String {
    let mut out = String::new();
    for c in value.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            '\'' => out.push_str("\\'"),
            '`' => out.push_str("\\`"),
            c => out.push(c),
        }
    }
    out
}

/// The layout-relevant projection of a token: kind, value, line structure.
/// Mid-line spacing is not significant, so `indent` only counts for tokens
/// that open a line.
fn fingerprint(tokens: &[Token]) -> Vec<(TokenKind, String, bool, u32)> {
    tokens
        .iter()
        .map(|t| {
            (
                t.kind,
                t.text.clone(),
                t.is_on_new_line,
                if t.is_on_new_line { t.indent } else { 0 },
            )
        })
        .collect()
}

fn assert_round_trip(source: &str) {
    let first = Lexer::tokenize(source).expect("source must lex");
    let rendered = render(&first);
    let second = Lexer::tokenize(&rendered).expect("rendered source must lex");
    assert_eq!(fingerprint(&first), fingerprint(&second), "render:\n{rendered}");
}

#[test]
fn round_trip_function() {
    assert_round_trip(
        "fn main(argc: u32, argv: *(*u8)) -> i32:\n  x: i32 = 2 + 3 * 4\n  return x\n",
    );
}

#[test]
fn round_trip_control_flow() {
    assert_round_trip(
        "fn f(n: i32) -> i32:\n  while n > 0:\n    n -= 1\n    if n == 5:\n      break\n  return n\n",
    );
}

#[test]
fn round_trip_literals() {
    assert_round_trip("greeting: *u8 = 'hello\\nworld'\nLETTER: u8 = `x`\nPI: f64 = 3.14'15\n");
}

#[test]
fn round_trip_imports_and_types() {
    assert_round_trip(
        "from 'util' import [log -> trace, min]\ntype Node = (next: *Node, v: i32)\n",
    );
}

#[test]
fn round_trip_generics_and_internal_calls() {
    assert_round_trip(
        "fn id(|T| x: T) -> T:\n  return x\nfn main() -> i32:\n  return cast(i32) ptr2int!(|i64| id(|*u8| None))\n",
    );
}

#[test]
fn line_positions_survive_round_trip() {
    let source = "a: i32 = 1\nb: i32 = 2\n";
    let first = Lexer::tokenize(source).unwrap();
    let second = Lexer::tokenize(&render(&first)).unwrap();
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.pos.line, b.pos.line);
    }
}

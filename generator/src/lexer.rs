// Lexer for .sop stage description files.
//
// Tokenizes a stage description (settings, stages, taps, output formats and
// node overrides). Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Stage description tokens.
///
/// Keywords and symbols are matched as fixed strings. Numbers carry their
/// parsed value; identifiers carry no value, so use the span to retrieve the
/// text from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("set")]
    Set,
    #[token("stage")]
    Stage,
    #[token("tap")]
    Tap,
    #[token("output")]
    Output,
    #[token("node")]
    Node,
    #[token("register")]
    Register,
    #[token("mantissa")]
    Mantissa,
    #[token("guard")]
    Guard,
    #[token("policy")]
    Policy,
    #[token("tolerance")]
    Tolerance,
    #[token("nonzero")]
    Nonzero,
    #[token("width")]
    Width,

    // ── Symbols ──
    #[token(":")]
    Colon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    // ── Literals ──
    /// Numeric literal (int, float, exponent, negative).
    #[regex(r"-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", parse_number)]
    Number(f64),

    // ── Identifier ──
    //
    // Placed after keywords: logos prioritises fixed `#[token]` matches
    // over regex for the same length, so `tap` matches Tap, not Ident.
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    // ── Structure ──
    /// One or more newlines (clause terminator).
    #[regex(r"\n+")]
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Set => write!(f, "set"),
            Token::Stage => write!(f, "stage"),
            Token::Tap => write!(f, "tap"),
            Token::Output => write!(f, "output"),
            Token::Node => write!(f, "node"),
            Token::Register => write!(f, "register"),
            Token::Mantissa => write!(f, "mantissa"),
            Token::Guard => write!(f, "guard"),
            Token::Policy => write!(f, "policy"),
            Token::Tolerance => write!(f, "tolerance"),
            Token::Nonzero => write!(f, "nonzero"),
            Token::Width => write!(f, "width"),
            Token::Colon => write!(f, ":"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Number(v) => write!(f, "{v}"),
            Token::Ident => write!(f, "<ident>"),
            Token::Newline => write!(f, "<newline>"),
        }
    }
}

// ── Callbacks ──

fn parse_number(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

// ── Public API ──

/// Lex a stage description into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: lex and assert no errors, return token list.
    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords() {
        let tokens = lex_ok(
            "set stage tap output node register mantissa guard policy tolerance nonzero width",
        );
        assert_eq!(
            tokens,
            vec![
                Token::Set,
                Token::Stage,
                Token::Tap,
                Token::Output,
                Token::Node,
                Token::Register,
                Token::Mantissa,
                Token::Guard,
                Token::Policy,
                Token::Tolerance,
                Token::Nonzero,
                Token::Width,
            ]
        );
    }

    #[test]
    fn keyword_vs_ident() {
        // `taps` is an identifier, not keyword `tap` + `s`
        let tokens = lex_ok("tap taps stage1");
        assert_eq!(tokens, vec![Token::Tap, Token::Ident, Token::Ident]);
    }

    #[test]
    fn symbols() {
        let tokens = lex_ok(": ( ) { } , = < >");
        assert_eq!(
            tokens,
            vec![
                Token::Colon,
                Token::LParen,
                Token::RParen,
                Token::LBrace,
                Token::RBrace,
                Token::Comma,
                Token::Equals,
                Token::Lt,
                Token::Gt,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(lex_ok("42"), vec![Token::Number(42.0)]);
        assert_eq!(lex_ok("-1.5"), vec![Token::Number(-1.5)]);
        assert_eq!(lex_ok("1e-3"), vec![Token::Number(0.001)]);
        assert_eq!(
            lex_ok("0.12245845794677734375"),
            vec![Token::Number(0.12245845794677734375)]
        );
    }

    #[test]
    fn tap_clause() {
        let tokens = lex_ok("tap v0 = 0.5 : <16, 1, signed> mantissa 18");
        assert_eq!(
            tokens,
            vec![
                Token::Tap,
                Token::Ident,
                Token::Equals,
                Token::Number(0.5),
                Token::Colon,
                Token::Lt,
                Token::Number(16.0),
                Token::Comma,
                Token::Number(1.0),
                Token::Comma,
                Token::Ident,
                Token::Gt,
                Token::Mantissa,
                Token::Number(18.0),
            ]
        );
    }

    #[test]
    fn comments_and_newlines() {
        let tokens = lex_ok("# header\nstage s { # trailing\n\n}\n");
        assert_eq!(
            tokens,
            vec![
                Token::Newline,
                Token::Stage,
                Token::Ident,
                Token::LBrace,
                Token::Newline,
                Token::RBrace,
                Token::Newline,
            ]
        );
    }

    #[test]
    fn bad_character_is_non_fatal() {
        let result = lex("tap ! v0");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, Span { start: 4, end: 5 });
        assert_eq!(result.tokens.len(), 2);
    }

    #[test]
    fn spans_are_byte_offsets() {
        let result = lex("stage lgs");
        assert_eq!(result.tokens[1].1, Span { start: 6, end: 9 });
    }
}

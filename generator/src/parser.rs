// Parser for .sop stage description files.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators.
//
// Grammar:
//   file     := item (NL+ item)*
//   item     := 'set' key '=' value | 'stage' IDENT '{' clause (NL+ clause)* '}'
//   clause   := 'tap' IDENT '=' NUMBER ':' format ('mantissa' NUMBER)?
//             | 'output' format
//             | 'node' '(' NUMBER ',' NUMBER ')' ('width' NUMBER)? ('policy' IDENT)?
//             | key value
//   format   := '<' NUMBER ',' NUMBER (',' IDENT)? '>'
//   key      := 'register' | 'mantissa' | 'guard' | 'policy' | 'tolerance' | 'nonzero'
//   value    := NUMBER | IDENT
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub file: Option<SourceFile>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a stage description. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = file_parser(source);
    let (file, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        file,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `file_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn file_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, SourceFile, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Newlines ──

    let nl = just(Token::Newline).repeated().ignored();

    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // ── Number ──

    let number = select! {
        Token::Number(n) = e => (n, e.span()),
    };

    // ── Settings ──

    let setting_key = select! {
        Token::Register => SettingKey::Register,
        Token::Mantissa => SettingKey::Mantissa,
        Token::Guard => SettingKey::Guard,
        Token::Policy => SettingKey::Policy,
        Token::Tolerance => SettingKey::Tolerance,
        Token::Nonzero => SettingKey::Nonzero,
    }
    .map_with(|key, e| (key, e.span()));

    let setting_value = select! {
        Token::Number(n) = e => SettingValue::Number(n, e.span()),
    }
    .or(ident.clone().map(SettingValue::Ident));

    // ── Format literal: '<' W ',' I (',' signedness)? '>' ──

    let format_lit = just(Token::Lt)
        .ignore_then(number.clone())
        .then_ignore(just(Token::Comma))
        .then(number.clone())
        .then(just(Token::Comma).ignore_then(ident.clone()).or_not())
        .then_ignore(just(Token::Gt))
        .map_with(|((width, int_bits), signedness), e| FormatLit {
            width,
            int_bits,
            signedness,
            span: e.span(),
        });

    // ── Clauses ──

    let tap_clause = just(Token::Tap)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Equals))
        .then(number.clone())
        .then_ignore(just(Token::Colon))
        .then(format_lit.clone())
        .then(just(Token::Mantissa).ignore_then(number.clone()).or_not())
        .map(|(((name, coefficient), format), mantissa)| {
            ClauseKind::Tap(TapDecl {
                name,
                coefficient,
                format,
                mantissa,
            })
        });

    let output_clause = just(Token::Output)
        .ignore_then(format_lit)
        .map(ClauseKind::Output);

    let node_clause = just(Token::Node)
        .ignore_then(
            number
                .clone()
                .then_ignore(just(Token::Comma))
                .then(number.clone())
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then(just(Token::Width).ignore_then(number.clone()).or_not())
        .then(just(Token::Policy).ignore_then(ident.clone()).or_not())
        .map(|(((level, index), width), policy)| {
            ClauseKind::Node(NodeDecl {
                level,
                index,
                width,
                policy,
            })
        });

    let setting_clause = setting_key
        .clone()
        .then(setting_value.clone())
        .map(|((key, key_span), value)| {
            ClauseKind::Setting(Setting {
                key,
                key_span,
                value,
            })
        });

    let clause = choice((tap_clause, output_clause, node_clause, setting_clause)).map_with(
        |kind, e| Clause {
            kind,
            span: e.span(),
        },
    );

    // ── Stage body: newline-separated clauses ──

    let stage_body = nl
        .clone()
        .ignore_then(
            clause
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl.clone());

    // ── Items ──

    let set_stmt = just(Token::Set)
        .ignore_then(setting_key)
        .then_ignore(just(Token::Equals))
        .then(setting_value)
        .map(|((key, key_span), value)| {
            ItemKind::Set(Setting {
                key,
                key_span,
                value,
            })
        });

    let stage_stmt = just(Token::Stage)
        .ignore_then(ident)
        .then(stage_body.delimited_by(just(Token::LBrace), just(Token::RBrace)))
        .map(|(name, clauses)| ItemKind::Stage(StageDecl { name, clauses }));

    let item = choice((set_stmt, stage_stmt)).map_with(|kind, e| Item {
        kind,
        span: e.span(),
    });

    // ── File ──

    nl.clone()
        .ignore_then(
            item.separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map_with(move |items, e| SourceFile {
            items,
            span: e.span(),
        })
}

// ── Tests ──

// AST node types for .sop stage description files.
//
// Every node carries a `SimpleSpan` for error reporting in downstream passes.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

/// Span used for items built programmatically rather than parsed.
pub fn synthetic_span() -> Span {
    (0..0).into()
}

// ── Root ──

/// A complete stage description file: file-wide settings and stages.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub kind: ItemKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    /// `set KEY = VALUE`
    Set(Setting),
    /// `stage NAME { clauses }`
    Stage(StageDecl),
}

// ── Settings ──

/// Keys accepted by `set` statements and stage setting clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    Register,
    Mantissa,
    Guard,
    Policy,
    Tolerance,
    Nonzero,
}

impl SettingKey {
    pub fn name(&self) -> &'static str {
        match self {
            SettingKey::Register => "register",
            SettingKey::Mantissa => "mantissa",
            SettingKey::Guard => "guard",
            SettingKey::Policy => "policy",
            SettingKey::Tolerance => "tolerance",
            SettingKey::Nonzero => "nonzero",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    pub key: SettingKey,
    pub key_span: Span,
    pub value: SettingValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Number(f64, Span),
    Ident(Ident),
}

impl SettingValue {
    pub fn span(&self) -> Span {
        match self {
            SettingValue::Number(_, s) => *s,
            SettingValue::Ident(id) => id.span,
        }
    }
}

// ── Stage ──

#[derive(Debug, Clone, PartialEq)]
pub struct StageDecl {
    pub name: Ident,
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub kind: ClauseKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClauseKind {
    Tap(TapDecl),
    Output(FormatLit),
    Setting(Setting),
    Node(NodeDecl),
}

/// `tap NAME = COEFF : <W, I[, signedness]> [mantissa B]`
#[derive(Debug, Clone, PartialEq)]
pub struct TapDecl {
    pub name: Ident,
    pub coefficient: (f64, Span),
    pub format: FormatLit,
    pub mantissa: Option<(f64, Span)>,
}

/// `<W, I[, signed|unsigned]>`
#[derive(Debug, Clone, PartialEq)]
pub struct FormatLit {
    pub width: (f64, Span),
    pub int_bits: (f64, Span),
    pub signedness: Option<Ident>,
    pub span: Span,
}

/// `node (LEVEL, INDEX) [width W] [policy P]`
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDecl {
    pub level: (f64, Span),
    pub index: (f64, Span),
    pub width: Option<(f64, Span)>,
    pub policy: Option<Ident>,
}

// ── Identifier ──

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

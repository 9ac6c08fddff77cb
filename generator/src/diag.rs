// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used by every generator pass, the
// stable code table, and the mapping from codes to error classes.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0201`, `W0500`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable code table. The hundreds digit selects the error class.
pub mod codes {
    use super::DiagCode;

    // E00xx: lexing / parsing
    pub const E0001: DiagCode = DiagCode("E0001");

    // E01xx: stage description
    pub const E0101: DiagCode = DiagCode("E0101"); // invalid literal
    pub const E0102: DiagCode = DiagCode("E0102"); // unknown setting value
    pub const E0103: DiagCode = DiagCode("E0103"); // duplicate name
    pub const E0104: DiagCode = DiagCode("E0104"); // missing output format
    pub const E0105: DiagCode = DiagCode("E0105"); // stage without taps

    // E02xx: precision budget
    pub const E0201: DiagCode = DiagCode("E0201"); // zero coefficient
    pub const E0202: DiagCode = DiagCode("E0202"); // budget out of range
    pub const E0203: DiagCode = DiagCode("E0203"); // integer part overflow
    pub const E0204: DiagCode = DiagCode("E0204"); // tolerance exceeded
    pub const E0205: DiagCode = DiagCode("E0205"); // non-finite coefficient
    pub const E0206: DiagCode = DiagCode("E0206"); // coefficient below smallest multiplier

    // E03xx: width overflow
    pub const E0301: DiagCode = DiagCode("E0301"); // node overflow, no policy
    pub const E0302: DiagCode = DiagCode("E0302"); // halving cannot resolve
    pub const E0303: DiagCode = DiagCode("E0303"); // wrap discards output bits
    pub const E0304: DiagCode = DiagCode("E0304"); // product exceeds container
    pub const E0305: DiagCode = DiagCode("E0305"); // override names no node
    pub const E0306: DiagCode = DiagCode("E0306"); // leaf exceeds its width

    // E04xx: format incompatibility
    pub const E0401: DiagCode = DiagCode("E0401"); // output cannot host range
    pub const W0402: DiagCode = DiagCode("W0402"); // output range asserted by wraps
    pub const E0403: DiagCode = DiagCode("E0403"); // too few guard bits below the register

    // W05xx: external calls
    pub const W0500: DiagCode = DiagCode("W0500"); // WCPG oracle failed

    // E06xx: self-verification
    pub const E0601: DiagCode = DiagCode("E0601"); // certificate failed
    pub const E0602: DiagCode = DiagCode("E0602"); // backends disagree
}

// ── Error class ──────────────────────────────────────────────────────────

/// Failure taxonomy shared by all passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Input,
    PrecisionBudget,
    WidthOverflow,
    FormatIncompatibility,
    ExternalCall,
    Verification,
}

impl DiagCode {
    /// Error class encoded in the code's hundreds digit.
    pub fn class(&self) -> ErrorClass {
        match self.0.as_bytes().get(2) {
            Some(b'2') => ErrorClass::PrecisionBudget,
            Some(b'3') => ErrorClass::WidthOverflow,
            Some(b'4') => ErrorClass::FormatIncompatibility,
            Some(b'5') => ErrorClass::ExternalCall,
            Some(b'6') => ErrorClass::Verification,
            _ => ErrorClass::Input,
        }
    }
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any generator pass.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related spans.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    pub fn error(span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, span, message)
    }

    pub fn warning(span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, span, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    pub fn class(&self) -> ErrorClass {
        self.code.map(|c| c.class()).unwrap_or(ErrorClass::Input)
    }
}

/// True if any diagnostic is error-level.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

/// 1-based line and column of a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let col = before.rfind('\n').map_or(before.len(), |nl| before.len() - nl - 1) + 1;
    (line, col)
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

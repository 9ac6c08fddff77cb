// resolve.rs — Validation and settings layering for .sop stage descriptions
//
// Walks the parsed AST, layers settings (caller defaults, then file-wide
// `set` statements, then stage clauses, then tap and node clauses), checks
// every literal against its allowed range, and builds one `StageSpec` per
// stage declaration.
//
// Preconditions: `file` is a well-formed AST from the parser.
// Postconditions: returns the stages that validated cleanly plus all
//   accumulated diagnostics. A stage with any error is not returned.
// Failure modes: invalid literals (E0101), unknown setting values (E0102),
//   duplicate names or clauses (E0103), missing output (E0104), stages
//   without taps (E0105). Resolution continues past errors.
// Side effects: none.

use std::collections::HashMap;

use crate::ast::*;
use crate::diag::{codes, DiagCode, Diagnostic};
use crate::format::QFormat;
use crate::quantize::{MAX_MANTISSA_BITS, MIN_MANTISSA_BITS};
use crate::stage::{NodeOverride, StageConfig, StageSpec, Tap};
use crate::id::TapId;
use crate::tree::NormalizationPolicy;

/// Accumulator widths the `int64_t` container supports with headroom for a
/// wrapped add.
pub const MIN_REGISTER_WIDTH: u32 = 2;
pub const MAX_REGISTER_WIDTH: u32 = 62;
pub const MAX_INPUT_WIDTH: u32 = 32;
pub const MAX_OUTPUT_WIDTH: u32 = 64;
pub const MAX_GUARD_BITS: u32 = 32;
/// Integer bits of any format stay within this magnitude.
pub const MAX_INT_BITS: i32 = 128;

// ── Public types ────────────────────────────────────────────────────────────

/// Result of resolution.
#[derive(Debug)]
pub struct ResolveResult {
    pub stages: Vec<StageSpec>,
    /// Settings after all `set` statements, before stage clauses.
    pub file_config: StageConfig,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Resolve a parsed stage description on top of `defaults`.
pub fn resolve(file: &SourceFile, defaults: &StageConfig) -> ResolveResult {
    let mut ctx = ResolveCtx::new();

    // Pass 1: file-wide settings (position-independent)
    let file_config = ctx.collect_settings(file, defaults);

    // Pass 2: stages
    let mut seen: HashMap<String, Span> = HashMap::new();
    let mut stages = Vec::new();
    for item in &file.items {
        if let ItemKind::Stage(decl) = &item.kind {
            if let Some(first) = seen.get(&decl.name.name) {
                let first = *first;
                ctx.push(
                    Diagnostic::error(
                        decl.name.span,
                        format!("duplicate stage '{}'", decl.name.name),
                    )
                    .with_code(codes::E0103)
                    .with_related(first, "first defined here"),
                );
                continue;
            }
            seen.insert(decl.name.name.clone(), decl.name.span);
            if let Some(spec) = ctx.resolve_stage(decl, item.span, &file_config) {
                stages.push(spec);
            }
        }
    }

    ResolveResult {
        stages,
        file_config,
        diagnostics: ctx.diagnostics,
    }
}

// ── Internal context ────────────────────────────────────────────────────────

struct ResolveCtx {
    diagnostics: Vec<Diagnostic>,
}

impl ResolveCtx {
    fn new() -> Self {
        ResolveCtx {
            diagnostics: Vec::new(),
        }
    }

    fn push(&mut self, diag: Diagnostic) {
        self.diagnostics.push(diag);
    }

    fn error(&mut self, code: DiagCode, span: Span, message: String) {
        self.push(Diagnostic::error(span, message).with_code(code));
    }

    fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.level == crate::diag::DiagLevel::Error)
            .count()
    }

    // ── Pass 1: file settings ───────────────────────────────────────────

    fn collect_settings(&mut self, file: &SourceFile, defaults: &StageConfig) -> StageConfig {
        let mut config = *defaults;
        let mut seen: HashMap<SettingKey, Span> = HashMap::new();
        for item in &file.items {
            if let ItemKind::Set(setting) = &item.kind {
                self.apply_setting(&mut config, setting, &mut seen, "set");
            }
        }
        config
    }

    fn apply_setting(
        &mut self,
        config: &mut StageConfig,
        setting: &Setting,
        seen: &mut HashMap<SettingKey, Span>,
        context: &str,
    ) {
        let key = setting.key.name();
        if let Some(first) = seen.get(&setting.key) {
            let first = *first;
            self.push(
                Diagnostic::error(
                    setting.key_span,
                    format!("duplicate {context} '{key}'"),
                )
                .with_code(codes::E0103)
                .with_related(first, "first set here"),
            );
            return;
        }
        seen.insert(setting.key, setting.key_span);

        match setting.key {
            SettingKey::Register => {
                if let Some(v) = self.number_in(
                    &setting.value,
                    key,
                    MIN_REGISTER_WIDTH as f64,
                    MAX_REGISTER_WIDTH as f64,
                ) {
                    config.register_width = v as u32;
                }
            }
            SettingKey::Mantissa => {
                if let Some(v) = self.number_in(
                    &setting.value,
                    key,
                    MIN_MANTISSA_BITS as f64,
                    MAX_MANTISSA_BITS as f64,
                ) {
                    config.mantissa_bits = v as u32;
                }
            }
            SettingKey::Guard => {
                if let Some(v) = self.number_in(&setting.value, key, 0.0, MAX_GUARD_BITS as f64) {
                    config.guard_bits = Some(v as u32);
                }
            }
            SettingKey::Policy => {
                if let Some(p) = self.policy_value(&setting.value) {
                    config.policy = p;
                }
            }
            SettingKey::Tolerance => match &setting.value {
                SettingValue::Number(v, _) if v.is_finite() && *v > 0.0 => {
                    config.tolerance = Some(*v);
                }
                other => self.error(
                    codes::E0101,
                    other.span(),
                    "tolerance must be a positive number".to_string(),
                ),
            },
            SettingKey::Nonzero => match &setting.value {
                SettingValue::Number(v, _) if *v == 0.0 || *v == 1.0 => {
                    config.require_nonzero = *v == 1.0;
                }
                SettingValue::Ident(id) if id.name == "true" || id.name == "false" => {
                    config.require_nonzero = id.name == "true";
                }
                other => self.error(
                    codes::E0102,
                    other.span(),
                    "nonzero expects 0, 1, true or false".to_string(),
                ),
            },
        }
    }

    /// Integer literal within `[lo, hi]`.
    fn integer(&mut self, (value, span): (f64, Span), what: &str, lo: f64, hi: f64) -> Option<f64> {
        if value.fract() != 0.0 || !value.is_finite() || value < lo || value > hi {
            self.error(
                codes::E0101,
                span,
                format!("{what} must be an integer in {lo}..={hi}, found {value}"),
            );
            return None;
        }
        Some(value)
    }

    fn number_in(&mut self, value: &SettingValue, what: &str, lo: f64, hi: f64) -> Option<f64> {
        match value {
            SettingValue::Number(v, span) => self.integer((*v, *span), what, lo, hi),
            SettingValue::Ident(id) => {
                self.error(
                    codes::E0101,
                    id.span,
                    format!("{what} expects a number, found '{}'", id.name),
                );
                None
            }
        }
    }

    fn policy_value(&mut self, value: &SettingValue) -> Option<NormalizationPolicy> {
        match value {
            SettingValue::Ident(id) => self.policy_name(id),
            SettingValue::Number(_, span) => {
                self.error(
                    codes::E0102,
                    *span,
                    "policy expects one of strict, halve, wrap".to_string(),
                );
                None
            }
        }
    }

    fn policy_name(&mut self, id: &Ident) -> Option<NormalizationPolicy> {
        let policy = NormalizationPolicy::from_name(&id.name);
        if policy.is_none() {
            self.push(
                Diagnostic::error(id.span, format!("unknown policy '{}'", id.name))
                    .with_code(codes::E0102)
                    .with_hint("expected one of strict, halve, wrap"),
            );
        }
        policy
    }

    fn format(&mut self, lit: &FormatLit, max_width: u32, what: &str) -> Option<QFormat> {
        let width = self.integer(lit.width, &format!("{what} width"), 1.0, max_width as f64);
        let int_bits = self.integer(
            lit.int_bits,
            &format!("{what} integer bits"),
            -(MAX_INT_BITS as f64),
            MAX_INT_BITS as f64,
        );
        let signed = match &lit.signedness {
            None => Some(true),
            Some(id) if id.name == "signed" => Some(true),
            Some(id) if id.name == "unsigned" => Some(false),
            Some(id) => {
                self.error(
                    codes::E0102,
                    id.span,
                    format!("expected `signed` or `unsigned`, found '{}'", id.name),
                );
                None
            }
        };
        let (width, int_bits, signed) = (width?, int_bits?, signed?);
        Some(if signed {
            QFormat::signed(width as u32, int_bits as i32)
        } else {
            QFormat::unsigned(width as u32, int_bits as i32)
        })
    }

    // ── Pass 2: stages ──────────────────────────────────────────────────

    fn resolve_stage(
        &mut self,
        decl: &StageDecl,
        span: Span,
        file_config: &StageConfig,
    ) -> Option<StageSpec> {
        let errors_before = self.error_count();
        let name = &decl.name.name;

        // Settings first: they apply regardless of clause order.
        let mut config = *file_config;
        let mut seen_settings = HashMap::new();
        for clause in &decl.clauses {
            if let ClauseKind::Setting(setting) = &clause.kind {
                self.apply_setting(&mut config, setting, &mut seen_settings, "stage setting");
            }
        }

        let mut output: Option<(QFormat, Span)> = None;
        let mut taps: Vec<Tap> = Vec::new();
        let mut tap_names: HashMap<String, Span> = HashMap::new();
        let mut overrides: Vec<NodeOverride> = Vec::new();

        for clause in &decl.clauses {
            match &clause.kind {
                ClauseKind::Setting(_) => {}
                ClauseKind::Output(lit) => {
                    if let Some((_, first)) = output {
                        self.push(
                            Diagnostic::error(clause.span, format!("stage '{name}' declares output twice"))
                                .with_code(codes::E0103)
                                .with_related(first, "first declared here"),
                        );
                        continue;
                    }
                    if let Some(format) = self.format(lit, MAX_OUTPUT_WIDTH, "output") {
                        if !format.signed {
                            self.error(
                                codes::E0101,
                                lit.span,
                                "output format must be signed".to_string(),
                            );
                        }
                        output = Some((format, clause.span));
                    }
                }
                ClauseKind::Tap(tap) => {
                    if let Some(t) =
                        self.resolve_tap(tap, clause.span, &config, taps.len(), &mut tap_names)
                    {
                        taps.push(t);
                    }
                }
                ClauseKind::Node(node) => {
                    if let Some(o) = self.resolve_node(node, clause.span, &overrides) {
                        overrides.push(o);
                    }
                }
            }
        }

        let Some((output, _)) = output else {
            self.push(
                Diagnostic::error(decl.name.span, format!("stage '{name}' has no output format"))
                    .with_code(codes::E0104)
                    .with_hint("add `output <W, I>`"),
            );
            return None;
        };
        if taps.is_empty() && self.error_count() == errors_before {
            self.push(
                Diagnostic::error(decl.name.span, format!("stage '{name}' has no taps"))
                    .with_code(codes::E0105),
            );
        }
        if self.error_count() > errors_before {
            return None;
        }

        Some(StageSpec {
            name: name.clone(),
            taps,
            output,
            config,
            overrides,
            span,
        })
    }

    fn resolve_tap(
        &mut self,
        tap: &TapDecl,
        span: Span,
        config: &StageConfig,
        index: usize,
        names: &mut HashMap<String, Span>,
    ) -> Option<Tap> {
        let name = &tap.name.name;
        if let Some(first) = names.get(name) {
            let first = *first;
            self.push(
                Diagnostic::error(tap.name.span, format!("duplicate tap '{name}'"))
                    .with_code(codes::E0103)
                    .with_related(first, "first defined here"),
            );
            return None;
        }
        names.insert(name.clone(), tap.name.span);
        if is_generated_name(name) {
            self.push(
                Diagnostic::error(
                    tap.name.span,
                    format!("tap name '{name}' collides with a generated temporary"),
                )
                .with_code(codes::E0103)
                .with_hint("generated code uses t<N> and c<N>; rename the tap"),
            );
            return None;
        }

        let (coefficient, coeff_span) = tap.coefficient;
        if !coefficient.is_finite() {
            self.error(
                codes::E0101,
                coeff_span,
                format!("coefficient of tap '{name}' is not a finite number"),
            );
            return None;
        }
        let format = self.format(&tap.format, MAX_INPUT_WIDTH, "input")?;
        let mantissa_bits = match tap.mantissa {
            Some(m) => self.integer(
                m,
                "mantissa",
                MIN_MANTISSA_BITS as f64,
                MAX_MANTISSA_BITS as f64,
            )? as u32,
            None => config.mantissa_bits,
        };

        Some(Tap {
            id: TapId(index as u32),
            name: name.clone(),
            coefficient,
            format,
            mantissa_bits,
            span,
        })
    }

    fn resolve_node(
        &mut self,
        node: &NodeDecl,
        span: Span,
        existing: &[NodeOverride],
    ) -> Option<NodeOverride> {
        let level = self.integer(node.level, "node level", 0.0, u32::MAX as f64);
        let index = self.integer(node.index, "node index", 0.0, u32::MAX as f64);
        let width = match node.width {
            Some(w) => Some(self.integer(
                w,
                "node width",
                MIN_REGISTER_WIDTH as f64,
                MAX_REGISTER_WIDTH as f64,
            )?),
            None => None,
        };
        let policy = match &node.policy {
            Some(id) => Some(self.policy_name(id)?),
            None => None,
        };
        let (level, index) = (level? as u32, index? as u32);

        if let Some(first) = existing
            .iter()
            .find(|o| o.level == level && o.index == index)
        {
            self.push(
                Diagnostic::error(span, format!("duplicate override for node ({level}, {index})"))
                    .with_code(codes::E0103)
                    .with_related(first.span, "first override here"),
            );
            return None;
        }

        Some(NodeOverride {
            level,
            index,
            width: width.map(|w| w as u32),
            policy,
            span,
        })
    }
}

/// `t<digits>` and `c<digits>` are reserved for generated temporaries.
fn is_generated_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some('t') | Some('c'))
        && name.len() > 1
        && chars.all(|c| c.is_ascii_digit())
}

// ── Tests ───────────────────────────────────────────────────────────────────

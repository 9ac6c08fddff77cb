// stage.rs — Stage descriptions and the synthesized stage aggregate
//
// `StageSpec` is the resolved, validated description of one filter stage:
// ordered taps, output format, settings and per-node overrides. `Stage`
// bundles everything derived from it (multipliers, products, accumulation
// tree, fixed-point plan); backends render from a `Stage` only.
//
// Preconditions: specs come from `resolve` or from the builder methods below.
// Postconditions: `Stage::synthesize` either returns a complete stage or the
//   diagnostic of the first failing step.
// Failure modes: see `quantize`, `multiplier`, `tree`, `width_infer`.
// Side effects: none.

use crate::ast::{synthetic_span, Span};
use crate::diag::Diagnostic;
use crate::format::QFormat;
use crate::id::TapId;
use crate::multiplier::{self, Product};
use crate::quantize::{self, QuantizeOptions, QuantizedMultiplier};
use crate::tree::{self, AccTree, NormalizationPolicy};
use crate::width_infer::{self, FixedPlan};

pub const DEFAULT_REGISTER_WIDTH: u32 = 32;
pub const DEFAULT_MANTISSA_BITS: u32 = 16;

// ── Description ───────────────────────────────────────────────────────────

/// One input of the weighted sum.
#[derive(Debug, Clone, PartialEq)]
pub struct Tap {
    pub id: TapId,
    pub name: String,
    pub coefficient: f64,
    pub format: QFormat,
    pub mantissa_bits: u32,
    pub span: Span,
}

/// Effective settings of a stage after layering CLI, file and stage values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageConfig {
    /// Declared width of every accumulator node without a width override.
    pub register_width: u32,
    /// Default mantissa budget for taps without their own.
    pub mantissa_bits: u32,
    /// Extra fractional bits kept above the output fraction during
    /// accumulation; `None` means `ceil(log2(taps))`.
    pub guard_bits: Option<u32>,
    pub policy: NormalizationPolicy,
    pub tolerance: Option<f64>,
    pub require_nonzero: bool,
}

impl Default for StageConfig {
    fn default() -> Self {
        StageConfig {
            register_width: DEFAULT_REGISTER_WIDTH,
            mantissa_bits: DEFAULT_MANTISSA_BITS,
            guard_bits: None,
            policy: NormalizationPolicy::Strict,
            tolerance: None,
            require_nonzero: false,
        }
    }
}

impl StageConfig {
    /// Guard bits for a stage of `taps` inputs.
    pub fn guard_for(&self, taps: usize) -> u32 {
        self.guard_bits.unwrap_or_else(|| ceil_log2(taps))
    }
}

/// `ceil(log2(n))`, zero for `n <= 1`.
pub fn ceil_log2(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

/// Per-node override addressed by tree level and position within the level.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOverride {
    pub level: u32,
    pub index: u32,
    pub width: Option<u32>,
    pub policy: Option<NormalizationPolicy>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub name: String,
    pub taps: Vec<Tap>,
    pub output: QFormat,
    pub config: StageConfig,
    pub overrides: Vec<NodeOverride>,
    pub span: Span,
}

impl StageSpec {
    /// Empty stage with default settings (for programmatic construction).
    pub fn new(name: impl Into<String>, output: QFormat) -> Self {
        StageSpec {
            name: name.into(),
            taps: Vec::new(),
            output,
            config: StageConfig::default(),
            overrides: Vec::new(),
            span: synthetic_span(),
        }
    }

    /// Append a tap using the stage's default mantissa budget.
    pub fn with_tap(mut self, coefficient: f64, format: QFormat) -> Self {
        let bits = self.config.mantissa_bits;
        self.push_tap(coefficient, format, bits);
        self
    }

    pub fn with_config(mut self, config: StageConfig) -> Self {
        for tap in &mut self.taps {
            if tap.mantissa_bits == self.config.mantissa_bits {
                tap.mantissa_bits = config.mantissa_bits;
            }
        }
        self.config = config;
        self
    }

    pub fn with_override(
        mut self,
        level: u32,
        index: u32,
        width: Option<u32>,
        policy: Option<NormalizationPolicy>,
    ) -> Self {
        self.overrides.push(NodeOverride {
            level,
            index,
            width,
            policy,
            span: synthetic_span(),
        });
        self
    }

    pub fn push_tap(&mut self, coefficient: f64, format: QFormat, mantissa_bits: u32) {
        let id = TapId(self.taps.len() as u32);
        self.taps.push(Tap {
            id,
            name: format!("v{}", id.0),
            coefficient,
            format,
            mantissa_bits,
            span: synthetic_span(),
        });
    }

    pub fn override_for(&self, level: u32, index: u32) -> Option<&NodeOverride> {
        self.overrides
            .iter()
            .find(|o| o.level == level && o.index == index)
    }

    pub fn quantize_options(&self, tap: &Tap) -> QuantizeOptions {
        QuantizeOptions {
            bits: tap.mantissa_bits,
            tolerance: self.config.tolerance,
            require_nonzero: self.config.require_nonzero,
        }
    }
}

// ── Synthesized stage ─────────────────────────────────────────────────────

/// A fully synthesized stage; the single input of every backend.
#[derive(Debug, Clone)]
pub struct Stage {
    pub spec: StageSpec,
    pub multipliers: Vec<QuantizedMultiplier>,
    pub products: Vec<Product>,
    pub tree: AccTree,
    pub fixed: FixedPlan,
}

impl Stage {
    /// Run quantize → synthesize → build tree → infer widths.
    pub fn synthesize(spec: StageSpec) -> Result<Stage, Diagnostic> {
        let multipliers = quantize_taps(&spec)?;
        let products = synthesize_products(&spec, &multipliers)?;
        let tree = tree::build_tree(&spec, &products).map_err(|e| e.to_diagnostic(&spec))?;
        let fixed = width_infer::infer_widths(&spec, &products, &tree)
            .map_err(|e| e.to_diagnostic(&spec))?;
        Ok(Stage {
            spec,
            multipliers,
            products,
            tree,
            fixed,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn output(&self) -> QFormat {
        self.spec.output
    }
}

/// Quantize every tap's coefficient; stops at the first failure.
pub fn quantize_taps(spec: &StageSpec) -> Result<Vec<QuantizedMultiplier>, Diagnostic> {
    spec.taps
        .iter()
        .map(|tap| {
            quantize::quantize(tap.coefficient, &spec.quantize_options(tap))
                .map_err(|e| e.to_diagnostic(tap))
        })
        .collect()
}

/// Build the per-tap products from quantized multipliers.
pub fn synthesize_products(
    spec: &StageSpec,
    multipliers: &[QuantizedMultiplier],
) -> Result<Vec<Product>, Diagnostic> {
    spec.taps
        .iter()
        .zip(multipliers)
        .map(|(tap, q)| multiplier::synthesize(tap, *q).map_err(|e| e.to_diagnostic(tap)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_log2_values() {
        assert_eq!(ceil_log2(0), 0);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(4), 2);
        assert_eq!(ceil_log2(5), 3);
    }

    #[test]
    fn builder_numbers_taps_in_order() {
        let spec = StageSpec::new("s", QFormat::signed(16, 2))
            .with_tap(0.5, QFormat::signed(16, 1))
            .with_tap(-0.25, QFormat::signed(16, 1));
        assert_eq!(spec.taps[1].id, TapId(1));
        assert_eq!(spec.taps[1].name, "v1");
        assert_eq!(spec.taps[1].mantissa_bits, DEFAULT_MANTISSA_BITS);
        assert_eq!(spec.config.guard_for(spec.taps.len()), 1);
    }

    #[test]
    fn with_config_updates_default_budgets() {
        let spec = StageSpec::new("s", QFormat::signed(16, 2))
            .with_tap(0.5, QFormat::signed(16, 1))
            .with_config(StageConfig {
                mantissa_bits: 12,
                ..StageConfig::default()
            });
        assert_eq!(spec.taps[0].mantissa_bits, 12);
    }

    #[test]
    fn synthesize_reports_first_failure() {
        let spec = StageSpec::new("s", QFormat::signed(16, 2))
            .with_tap(0.5, QFormat::signed(16, 1))
            .with_tap(0.0, QFormat::signed(16, 1))
            .with_config(StageConfig {
                require_nonzero: true,
                ..StageConfig::default()
            });
        let err = Stage::synthesize(spec).unwrap_err();
        assert_eq!(err.code, Some(crate::diag::codes::E0201));
    }
}

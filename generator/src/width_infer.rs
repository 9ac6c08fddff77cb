// width_infer.rs — Bit-width inference for the ac_fixed backend
//
// Mirrors the accumulation tree bottom-up and assigns every operand an
// exact fixed-point format: leaves hold the full product of constant and
// input, sums grow by at most one integer bit, and nothing is shifted. The
// only rounding is the truncating conversion to the output format.
//
// Preconditions: `tree` was built from `products` for `spec`.
// Postconditions: every node format holds its exact value range; the output
//   format hosts the stage's range, or the tree wraps and the output range
//   is recorded as asserted.
// Failure modes: output integer width smaller than the stage's range.
// Side effects: none.

use std::fmt;

use crate::diag::{codes, Diagnostic};
use crate::format::{add_format, int_bits_for, narrow_int_bits, FixedFormat};
use crate::multiplier::Product;
use crate::stage::StageSpec;
use crate::tree::{AccTree, NodeKind};

/// Formats of every operand of the ac_fixed implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedPlan {
    /// Per tap: input and constant formats.
    pub inputs: Vec<FixedFormat>,
    pub constants: Vec<FixedFormat>,
    /// Per node (arena order): format of the exact node value.
    pub nodes: Vec<FixedFormat>,
    /// Per node: exact magnitude bound (no truncation anywhere).
    pub bounds: Vec<f64>,
    pub output: FixedFormat,
    /// Integer bits the output would need, when the output is narrower and
    /// the wrapping tree makes the declared output an asserted range.
    pub asserted_range: Option<i32>,
}

impl FixedPlan {
    pub fn root_bound(&self) -> f64 {
        self.bounds.last().copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WidthError {
    OutputRange { required: i32, available: i32 },
}

impl fmt::Display for WidthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WidthError::OutputRange {
                required,
                available,
            } => write!(
                f,
                "output needs {required} integer bits to host the stage's range, format has {available}"
            ),
        }
    }
}

impl WidthError {
    pub fn to_diagnostic(&self, spec: &StageSpec) -> Diagnostic {
        let WidthError::OutputRange { required, .. } = self;
        Diagnostic::error(spec.span, format!("stage `{}`: {}", spec.name, self))
            .with_code(codes::E0401)
            .with_hint(format!(
                "declare `output <{}, {}>`",
                spec.output.width as i32 + required - spec.output.int_bits,
                required
            ))
    }
}

/// Diagnostic for a wrapping tree whose output range is asserted, not proven.
pub fn asserted_range_warning(spec: &StageSpec, required: i32) -> Diagnostic {
    Diagnostic::warning(
        spec.span,
        format!(
            "stage `{}`: output {} has {} integer bits, the stage's range needs {}; results wrap",
            spec.name, spec.output, spec.output.int_bits, required
        ),
    )
    .with_code(codes::W0402)
}

/// Infer the ac_fixed format of every operand.
pub fn infer_widths(
    spec: &StageSpec,
    products: &[Product],
    tree: &AccTree,
) -> Result<FixedPlan, WidthError> {
    let mut nodes = Vec::with_capacity(tree.nodes.len());
    let mut bounds: Vec<f64> = Vec::with_capacity(tree.nodes.len());

    // Children always precede their parent in the arena.
    for node in &tree.nodes {
        let (format, bound) = match node.kind {
            NodeKind::Leaf { tap, .. } => {
                let product = &products[tap.index()];
                if product.is_zero() {
                    (FixedFormat::zero(), 0.0)
                } else {
                    let format =
                        narrow_int_bits(product.product_format, int_bits_for(product.bound));
                    (format, product.bound)
                }
            }
            NodeKind::Sum { left, right, .. } => {
                let bound = bounds[left.index()] + bounds[right.index()];
                let exact = add_format(nodes[left.index()], nodes[right.index()]);
                (narrow_int_bits(exact, int_bits_for(bound)), bound)
            }
        };
        nodes.push(format);
        bounds.push(bound);
    }

    let out_frac = spec.output.frac_bits();
    let root_bound = bounds[tree.root.index()].max(tree.output_value_bound(out_frac));
    let required = int_bits_for(root_bound);
    let available = spec.output.int_bits;
    let mut asserted_range = None;
    if required > available {
        if !tree.has_wraps {
            return Err(WidthError::OutputRange {
                required,
                available,
            });
        }
        asserted_range = Some(required);
    }

    Ok(FixedPlan {
        inputs: spec.taps.iter().map(|t| FixedFormat::from(t.format)).collect(),
        constants: products.iter().map(|p| p.constant_format).collect(),
        nodes,
        bounds,
        output: FixedFormat::from(spec.output),
        asserted_range,
    })
}

// verify.rs — Stage self-verification
//
// Checks a synthesized stage before its code is handed out: structural
// postconditions of the accumulation tree and the fixed-point plan (V1-V5),
// a bit-exact simulation of the integer and ac_fixed backends on corner
// and pseudo-random vectors compared against the float reference (V6), and
// the quantizer's bound on every multiplier (V7).
//
// Preconditions: the stage was produced by `Stage::synthesize`.
// Postconditions: a `StageCertificate` with one flag per obligation, and
//   the per-vector evidence.
// Failure modes: reported through the certificate; `verification_diagnostics`
//   turns failed obligations into E0601 (structure) and E0602 (vectors).
// Side effects: none.

use serde::Serialize;

use crate::diag::{codes, Diagnostic};
use crate::eval;
use crate::format::int_bits_for;
use crate::id::NodeId;
use crate::pass::PassCert;
use crate::quantize;
use crate::stage::Stage;
use crate::tree::{Decision, NodeKind};

/// Pseudo-random vectors simulated per stage (after the corner vectors).
pub const RANDOM_VECTORS: usize = 64;
pub const VECTOR_SEED: u64 = 0x5eed_0f_5095;

// ── Certificate ─────────────────────────────────────────────────────────────

/// Machine-checkable evidence for the stage postconditions (V1-V7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageCertificate {
    /// V1: Leaf `i` is node `i` and applies tap `i`.
    pub v1_leaves_in_tap_order: bool,
    /// V2: Every node is assigned once and consumed once (root excepted).
    pub v2_single_assignment: bool,
    /// V3: Non-wrapping nodes hold their range within the declared width.
    pub v3_widths_hold: bool,
    /// V4: The output word is determined by the exact low bits of the root.
    pub v4_output_determined: bool,
    /// V5: Every ac_fixed operand format hosts its exact range.
    pub v5_formats_hold: bool,
    /// V6: The simulated backends agree on every vector.
    pub v6_vectors_agree: bool,
    /// V7: Every multiplier fits its mantissa budget and stays within the
    /// quantization bound of its coefficient.
    pub v7_multipliers_in_budget: bool,
}

impl PassCert for StageCertificate {
    fn all_pass(&self) -> bool {
        self.v1_leaves_in_tap_order
            && self.v2_single_assignment
            && self.v3_widths_hold
            && self.v4_output_determined
            && self.v5_formats_hold
            && self.v6_vectors_agree
            && self.v7_multipliers_in_budget
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("V1_leaves_in_tap_order", self.v1_leaves_in_tap_order),
            ("V2_single_assignment", self.v2_single_assignment),
            ("V3_widths_hold", self.v3_widths_hold),
            ("V4_output_determined", self.v4_output_determined),
            ("V5_formats_hold", self.v5_formats_hold),
            ("V6_vectors_agree", self.v6_vectors_agree),
            ("V7_multipliers_in_budget", self.v7_multipliers_in_budget),
        ]
    }
}

/// Outcome of one simulated input vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorCheck {
    pub inputs: Vec<i64>,
    pub float: f64,
    pub int: i64,
    pub fixed: Option<i64>,
    /// `None` when the float value can leave the (asserted) output range.
    pub float_ok: Option<bool>,
    pub fixed_ok: bool,
}

impl VectorCheck {
    pub fn passed(&self) -> bool {
        self.fixed_ok && self.float_ok.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    pub certificate: StageCertificate,
    pub error_budget: f64,
    pub fixed_int_ulp_bound: i64,
    pub vectors: Vec<VectorCheck>,
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Verify a stage with the default vector set.
pub fn verify_stage(stage: &Stage) -> Verification {
    verify_stage_with(stage, RANDOM_VECTORS, VECTOR_SEED)
}

pub fn verify_stage_with(stage: &Stage, random: usize, seed: u64) -> Verification {
    let vectors: Vec<VectorCheck> = eval::test_vectors(&stage.spec, random, seed)
        .into_iter()
        .map(|raw| check_vector(stage, raw))
        .collect();

    let certificate = StageCertificate {
        v1_leaves_in_tap_order: verify_v1_leaves_in_tap_order(stage),
        v2_single_assignment: verify_v2_single_assignment(stage),
        v3_widths_hold: verify_v3_widths_hold(stage),
        v4_output_determined: verify_v4_output_determined(stage),
        v5_formats_hold: verify_v5_formats_hold(stage),
        v6_vectors_agree: vectors.iter().all(VectorCheck::passed),
        v7_multipliers_in_budget: verify_v7_multipliers_in_budget(stage),
    };

    Verification {
        certificate,
        error_budget: eval::error_budget(stage),
        fixed_int_ulp_bound: eval::fixed_int_ulp_bound(stage),
        vectors,
    }
}

/// Diagnostics for every failed obligation.
pub fn verification_diagnostics(stage: &Stage, verification: &Verification) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    let failed: Vec<&str> = verification
        .certificate
        .obligations()
        .into_iter()
        .filter(|(name, ok)| !ok && !name.starts_with("V6"))
        .map(|(name, _)| name)
        .collect();
    if !failed.is_empty() {
        diags.push(
            Diagnostic::error(
                stage.spec.span,
                format!(
                    "stage `{}`: verification failed: {}",
                    stage.name(),
                    failed.join(", ")
                ),
            )
            .with_code(codes::E0601),
        );
    }
    if let Some(bad) = verification.vectors.iter().find(|v| !v.passed()) {
        diags.push(
            Diagnostic::error(
                stage.spec.span,
                format!(
                    "stage `{}`: backends disagree on inputs {:?}: float {}, int {}, ac_fixed {}",
                    stage.name(),
                    bad.inputs,
                    bad.float,
                    bad.int,
                    bad.fixed
                        .map_or_else(|| "overflow".to_string(), |f| f.to_string())
                ),
            )
            .with_code(codes::E0602)
            .with_hint(format!(
                "error budget {:e}, ac_fixed/int bound {} ulp",
                verification.error_budget, verification.fixed_int_ulp_bound
            )),
        );
    }
    diags
}

// ── Vector simulation ───────────────────────────────────────────────────────

fn check_vector(stage: &Stage, raw: Vec<i64>) -> VectorCheck {
    let spec = &stage.spec;
    let out_width = spec.output.width;
    let float = eval::eval_float(spec, &eval::inputs_to_real(spec, &raw));
    let int = eval::eval_int(stage, &raw);
    let fixed = eval::eval_fixed(stage, &raw);

    // fixed - int, taken modulo 2^W_out when the tree wraps.
    let fixed_ok = fixed.is_some_and(|f| {
        let diff = f.wrapping_sub(int);
        let diff = if stage.tree.has_wraps {
            eval::wrap_to(diff, out_width)
        } else {
            diff
        };
        (0..=eval::fixed_int_ulp_bound(stage)).contains(&diff)
    });

    let budget = eval::error_budget(stage) + eval::float_slack(stage);
    let (lo, hi) = spec.output.raw_range();
    let in_range = float - budget >= spec.output.to_real(lo)
        && float + budget <= spec.output.to_real(hi);
    let float_ok = if stage.tree.has_wraps && !in_range {
        None
    } else {
        Some((float - spec.output.to_real(int)).abs() <= budget)
    };

    VectorCheck {
        inputs: raw,
        float,
        int,
        fixed,
        float_ok,
        fixed_ok,
    }
}

// ── Structural obligations ──────────────────────────────────────────────────

/// V1: the first `N` arena slots are the leaves, in tap order.
fn verify_v1_leaves_in_tap_order(stage: &Stage) -> bool {
    let nodes = &stage.tree.nodes;
    let n = stage.spec.taps.len();
    nodes.len() == 2 * n - 1
        && nodes.iter().take(n).enumerate().all(|(i, node)| {
            node.level == 0
                && node.index as usize == i
                && matches!(node.kind, NodeKind::Leaf { tap, .. } if tap.index() == i)
        })
}

/// V2: ids match arena slots, children precede parents, and every node but
/// the root feeds exactly one sum.
fn verify_v2_single_assignment(stage: &Stage) -> bool {
    let tree = &stage.tree;
    let mut uses = vec![0u32; tree.nodes.len()];
    for (i, node) in tree.nodes.iter().enumerate() {
        if node.id != NodeId(i as u32) {
            return false;
        }
        if let NodeKind::Sum { left, right, .. } = node.kind {
            for child in [left, right] {
                if child.index() >= i {
                    return false;
                }
                uses[child.index()] += 1;
            }
        }
    }
    uses.iter()
        .enumerate()
        .all(|(i, &u)| u == if i == tree.root.index() { 0 } else { 1 })
}

/// V3: `Fits` and `Halve` nodes (and nonzero leaves) hold their required
/// width; `Wrap` nodes wrap both children at the recorded width.
fn verify_v3_widths_hold(stage: &Stage) -> bool {
    stage.tree.nodes.iter().all(|node| match node.kind {
        NodeKind::Leaf { tap, .. } => {
            stage.multipliers[tap.index()].is_zero()
                || node.required_width() <= node.width as i32
        }
        NodeKind::Sum {
            left_adjust,
            right_adjust,
            decision,
            ..
        } => match decision {
            Decision::Fits | Decision::Halve => {
                node.required_width() <= node.width as i32
                    && left_adjust.wrap.is_none()
                    && right_adjust.wrap.is_none()
            }
            Decision::Wrap { bits } => {
                left_adjust.wrap == Some(bits) && right_adjust.wrap == Some(bits)
            }
        },
    })
}

/// V4: after the final shift, every output bit is exact.
fn verify_v4_output_determined(stage: &Stage) -> bool {
    match stage.tree.output_exact_bits() {
        None => !stage.tree.has_wraps,
        Some(bits) => stage.tree.has_wraps && bits >= stage.spec.output.width as i32,
    }
}

/// V5: each format holds its exact bound; sums keep the finer fraction.
fn verify_v5_formats_hold(stage: &Stage) -> bool {
    let plan = &stage.fixed;
    stage.tree.nodes.iter().all(|node| {
        let i = node.id.index();
        let format = plan.nodes[i];
        let holds = plan.bounds[i] == 0.0 || int_bits_for(plan.bounds[i]) <= format.int_bits;
        let fraction = match node.kind {
            NodeKind::Leaf { .. } => true,
            NodeKind::Sum { left, right, .. } => {
                format.frac_bits()
                    == plan.nodes[left.index()]
                        .frac_bits()
                        .max(plan.nodes[right.index()].frac_bits())
            }
        };
        holds && fraction
    })
}

/// V7: each multiplier is one `quantize` could have produced for its tap.
fn verify_v7_multipliers_in_budget(stage: &Stage) -> bool {
    stage.multipliers.len() == stage.spec.taps.len()
        && stage
            .spec
            .taps
            .iter()
            .zip(&stage.multipliers)
            .all(|(t, q)| quantize::within_budget(t.coefficient, t.mantissa_bits, q))
}

// ── Tests ───────────────────────────────────────────────────────────────────

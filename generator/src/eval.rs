// eval.rs — Bit-exact models of the generated implementations
//
// Evaluates a stage the way each generated function computes it: the float
// reference in f64, the integer implementation with `int64_t` semantics
// (arithmetic right shifts, wrapping left shifts, SOP_WRAP), and the ac_fixed
// implementation with exact arithmetic and one truncating, wrapping
// conversion at the end. Also derives the per-stage error bounds relating
// the three.
//
// Preconditions: raw inputs lie inside each tap's format range.
// Postconditions: `eval_int` matches the rendered integer code bit for bit.
// Failure modes: `eval_fixed` returns `None` if an exact intermediate does
//   not fit 128 bits.
// Side effects: none.

use crate::format::pow2;
use crate::multiplier::LeafShift;
use crate::quantize;
use crate::stage::{Stage, StageSpec};
use crate::tree::NodeKind;

// ── Word helpers ────────────────────────────────────────────────────────────

/// Sign-extending reduction modulo `2^bits` (the `SOP_WRAP` macro).
pub fn wrap_to(x: i64, bits: u32) -> i64 {
    if bits >= 64 {
        return x;
    }
    let s = 64 - bits;
    (((x as u64) << s) as i64) >> s
}

fn wrap_to_i128(x: i128, bits: u32) -> i128 {
    if bits >= 128 {
        return x;
    }
    let s = 128 - bits;
    (((x as u128) << s) as i128) >> s
}

/// `SOP_SHL`: left shift through `uint64_t`.
fn shl(x: i64, k: u32) -> i64 {
    if k >= 64 {
        0
    } else {
        ((x as u64) << k) as i64
    }
}

fn apply_shift(x: i64, shift: LeafShift) -> i64 {
    match shift {
        LeafShift::None => x,
        LeafShift::Right(k) => x >> k.min(63),
        LeafShift::Left(k) => shl(x, k),
    }
}

/// Real value of each raw input word.
pub fn inputs_to_real(spec: &StageSpec, raw: &[i64]) -> Vec<f64> {
    spec.taps
        .iter()
        .zip(raw)
        .map(|(t, &r)| t.format.to_real(r))
        .collect()
}

// ── Models ──────────────────────────────────────────────────────────────────

/// Float reference: the weighted sum in tap order with real coefficients.
pub fn eval_float(spec: &StageSpec, inputs: &[f64]) -> f64 {
    spec.taps
        .iter()
        .zip(inputs)
        .fold(0.0, |acc, (t, &x)| acc + t.coefficient * x)
}

/// Raw output word of the integer implementation.
pub fn eval_int(stage: &Stage, raw: &[i64]) -> i64 {
    let tree = &stage.tree;
    let mut values: Vec<i64> = Vec::with_capacity(tree.nodes.len());
    for node in &tree.nodes {
        let v = match node.kind {
            NodeKind::Leaf { tap, shift } => {
                let q = stage.multipliers[tap.index()];
                if q.is_zero() {
                    0
                } else {
                    apply_shift(q.mantissa.wrapping_mul(raw[tap.index()]), shift)
                }
            }
            NodeKind::Sum {
                left,
                right,
                left_adjust,
                right_adjust,
                ..
            } => {
                let operand = |id: crate::id::NodeId, adj: crate::tree::ChildAdjust| {
                    let shifted = values[id.index()] >> adj.shift.min(63);
                    match adj.wrap {
                        Some(bits) => wrap_to(shifted, bits),
                        None => shifted,
                    }
                };
                operand(left, left_adjust).wrapping_add(operand(right, right_adjust))
            }
        };
        values.push(v);
    }
    let out = apply_shift(values[tree.root.index()], tree.final_shift);
    if tree.has_wraps {
        wrap_to(out, stage.spec.output.width)
    } else {
        out
    }
}

/// Raw output word of the ac_fixed implementation.
pub fn eval_fixed(stage: &Stage, raw: &[i64]) -> Option<i64> {
    let plan = &stage.fixed;
    let tree = &stage.tree;
    let mut values: Vec<(i128, i32)> = Vec::with_capacity(tree.nodes.len());
    for node in &tree.nodes {
        let frac = plan.nodes[node.id.index()].frac_bits();
        let v = match node.kind {
            NodeKind::Leaf { tap, .. } => {
                let q = stage.multipliers[tap.index()];
                (q.mantissa as i128 * raw[tap.index()] as i128, frac)
            }
            NodeKind::Sum { left, right, .. } => {
                let a = align(values[left.index()], frac)?;
                let b = align(values[right.index()], frac)?;
                (a.checked_add(b)?, frac)
            }
        };
        values.push(v);
    }
    let (root, root_frac) = values[tree.root.index()];
    let out_frac = stage.spec.output.frac_bits();
    let out = if root_frac >= out_frac {
        root >> (root_frac - out_frac).min(127)
    } else {
        align((root, root_frac), out_frac)?
    };
    Some(wrap_to_i128(out, stage.spec.output.width) as i64)
}

/// Raise `(x, from)` to fraction `to >= from` exactly.
fn align((x, from): (i128, i32), to: i32) -> Option<i128> {
    let d = (to - from) as u32;
    if d == 0 {
        return Some(x);
    }
    if d >= 127 {
        return if x == 0 { Some(0) } else { None };
    }
    x.checked_mul(1i128 << d)
}

// ── Error bounds ────────────────────────────────────────────────────────────

/// `sum |c - m 2^-s| * max|x|` over taps.
pub fn quantization_error(stage: &Stage) -> f64 {
    stage
        .spec
        .taps
        .iter()
        .zip(&stage.multipliers)
        .map(|(t, q)| (t.coefficient - q.value()).abs() * t.format.max_magnitude())
        .sum()
}

/// `sum |c| 2^-(b-2) * max|x|` over taps: the most any multiplier inside its
/// budget can contribute. Depends only on the description, never on the
/// multipliers being checked.
pub fn quantization_bound(spec: &StageSpec) -> f64 {
    spec.taps
        .iter()
        .map(|t| {
            quantize::error_bound(t.coefficient, t.mantissa_bits) * t.format.max_magnitude()
        })
        .sum()
}

/// Error of the truncating shifts inside the tree (leaf alignment and
/// child shifts): one ulp of the destination fraction per shift.
pub fn accumulation_truncation(stage: &Stage) -> f64 {
    let tree = &stage.tree;
    let mut total = 0.0;
    for node in &tree.nodes {
        match node.kind {
            NodeKind::Leaf { shift, .. } => {
                if shift.truncates() {
                    total += pow2(-tree.leaf_frac);
                }
            }
            NodeKind::Sum {
                left_adjust,
                right_adjust,
                ..
            } => {
                for adj in [left_adjust, right_adjust] {
                    if adj.shift > 0 {
                        total += pow2(-node.frac);
                    }
                }
            }
        }
    }
    total
}

/// Total error of all truncating shifts, the final one included.
pub fn truncation_error(stage: &Stage) -> f64 {
    let mut total = accumulation_truncation(stage);
    if stage.tree.final_shift.truncates() {
        total += pow2(-stage.spec.output.frac_bits());
    }
    total
}

/// Bound on `|float - int|` in real units.
pub fn error_budget(stage: &Stage) -> f64 {
    quantization_bound(&stage.spec) + truncation_error(stage)
}

/// Bound on `fixed - int` in output ulps (the integer result never exceeds
/// the ac_fixed one).
///
/// Both results floor the same exact sum to the output fraction; the
/// integer one has already lost less than `accumulation_truncation` on the
/// way, so they differ by at most its ceiling. Guard bits keep that at one
/// ulp for trees without `Halve` nodes.
pub fn fixed_int_ulp_bound(stage: &Stage) -> i64 {
    let ulps = accumulation_truncation(stage) * pow2(stage.spec.output.frac_bits());
    (ulps.ceil() as i64).max(1)
}

/// Slack for f64 rounding in the float reference and in the comparison.
pub fn float_slack(stage: &Stage) -> f64 {
    let scale: f64 = stage
        .spec
        .taps
        .iter()
        .map(|t| t.coefficient.abs() * t.format.max_magnitude())
        .sum();
    1e-9 * (1.0 + scale)
}

// ── Test vectors ────────────────────────────────────────────────────────────

/// Deterministic input vectors: corners first, then `random` pseudo-random
/// vectors from an xorshift64* stream seeded with `seed`.
pub fn test_vectors(spec: &StageSpec, random: usize, seed: u64) -> Vec<Vec<i64>> {
    let ranges: Vec<(i64, i64)> = spec.taps.iter().map(|t| t.format.raw_range()).collect();
    let pick = |positive: bool| -> Vec<i64> {
        spec.taps
            .iter()
            .zip(&ranges)
            .map(|(t, &(lo, hi))| {
                if (t.coefficient >= 0.0) == positive {
                    hi
                } else {
                    lo
                }
            })
            .collect()
    };

    let mut vectors = vec![
        vec![0; ranges.len()],
        ranges.iter().map(|r| r.1).collect(),
        ranges.iter().map(|r| r.0).collect(),
        pick(true),
        pick(false),
    ];

    let mut rng = XorShift::new(seed);
    for _ in 0..random {
        vectors.push(
            ranges
                .iter()
                .map(|&(lo, hi)| {
                    let span = (hi as i128 - lo as i128 + 1) as u128;
                    (lo as i128 + (rng.next() as u128 % span) as i128) as i64
                })
                .collect(),
        );
    }
    vectors
}

/// xorshift64* generator (deterministic across platforms).
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        XorShift(if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed })
    }

    pub fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::QFormat;

    fn scenario() -> Stage {
        let input = QFormat::signed(16, 1);
        Stage::synthesize(
            StageSpec::new("lgs30", QFormat::signed(16, 2))
                .with_tap(0.795928955078125, input)
                .with_tap(1.0, input)
                .with_tap(0.023296356201171875, input)
                .with_tap(0.12245845794677734375, input),
        )
        .unwrap()
    }

    #[test]
    fn wrap_to_sign_extends() {
        assert_eq!(wrap_to(0x7fff, 16), 0x7fff);
        assert_eq!(wrap_to(0x8000, 16), -0x8000);
        assert_eq!(wrap_to(-1, 8), -1);
        assert_eq!(wrap_to(0x1ff, 8), -1);
        assert_eq!(wrap_to(i64::MIN, 64), i64::MIN);
    }

    #[test]
    fn scenario_vector() {
        let stage = scenario();
        let raw = [100, -50, 200, 10];
        assert_eq!(eval_int(&stage, &raw), 17);
        assert_eq!(eval_fixed(&stage, &raw), Some(17));

        let float = eval_float(&stage.spec, &inputs_to_real(&stage.spec, &raw));
        let int = stage.spec.output.to_real(17);
        assert!((float - int).abs() <= error_budget(&stage));
        assert!((float - 0.0010826645302586257).abs() < 1e-15);
    }

    #[test]
    fn scenario_budget() {
        let stage = scenario();
        // Quantization: only the last coefficient is inexact.
        let q = quantization_error(&stage);
        assert!((q - 9.5367431640625e-7).abs() < 1e-12);
        // Four truncating leaves at F_L = 16 and the final >> 2 at F_out = 14.
        assert_eq!(accumulation_truncation(&stage), 4.0 * pow2(-16));
        assert_eq!(truncation_error(&stage), 4.0 * pow2(-16) + pow2(-14));
        assert_eq!(fixed_int_ulp_bound(&stage), 1);
        // Budget from the 16-bit mantissa bound, not from the multipliers.
        let bound = quantization_bound(&stage.spec);
        assert!(bound >= q);
        assert_eq!(error_budget(&stage), bound + truncation_error(&stage));
    }

    #[test]
    fn budget_ignores_the_multipliers_it_checks() {
        let stage = scenario();
        let mut tampered = stage.clone();
        tampered.multipliers[0].mantissa += 1000;
        assert_eq!(error_budget(&tampered), error_budget(&stage));
        assert!(quantization_error(&tampered) > error_budget(&stage));
    }

    #[test]
    fn fits_only_tree_agrees_within_one_ulp() {
        // Register-limited: F_L = W - I_leaf = 17 = F_out + 2.
        let input = QFormat::signed(16, 1);
        let stage = Stage::synthesize(
            StageSpec::new("g", QFormat::signed(16, 1))
                .with_tap(0.6, input)
                .with_tap(0.1, input)
                .with_tap(0.1, input)
                .with_tap(0.1, input)
                .with_config(crate::stage::StageConfig {
                    register_width: 18,
                    ..crate::stage::StageConfig::default()
                }),
        )
        .unwrap();
        assert_eq!(stage.tree.leaf_frac, 17);
        assert_eq!(fixed_int_ulp_bound(&stage), 1);

        let mut vectors = test_vectors(&stage.spec, 2048, 3);
        vectors.push(vec![-24645, -26481, 417, 967]);
        for raw in vectors {
            let int = eval_int(&stage, &raw);
            let fixed = eval_fixed(&stage, &raw).unwrap();
            assert!((0..=1).contains(&(fixed - int)), "{raw:?}: {fixed} vs {int}");
        }
    }

    #[test]
    fn corner_vectors_come_first() {
        let spec = scenario().spec;
        let v = test_vectors(&spec, 3, 1);
        assert_eq!(v.len(), 8);
        assert_eq!(v[0], vec![0; 4]);
        assert_eq!(v[1], vec![32767; 4]);
        assert_eq!(v[2], vec![-32768; 4]);
        for vector in &v[5..] {
            assert!(vector.iter().all(|&x| (-32768..=32767).contains(&x)));
        }
        assert_eq!(test_vectors(&spec, 3, 1), v);
    }

    #[test]
    fn seed_selects_the_random_stream() {
        // A zero state would stay zero forever.
        assert_ne!(XorShift::new(0).next(), 0);
        let spec = scenario().spec;
        let a = test_vectors(&spec, 3, 1);
        let b = test_vectors(&spec, 3, 2);
        assert_eq!(a[..5], b[..5]);
        assert_ne!(a[5..], b[5..]);
    }

    #[test]
    fn fixed_never_below_int_on_vectors() {
        let stage = scenario();
        let bound = fixed_int_ulp_bound(&stage);
        for raw in test_vectors(&stage.spec, 64, 7) {
            let int = eval_int(&stage, &raw);
            let fixed = eval_fixed(&stage, &raw).unwrap();
            assert!(fixed >= int && fixed - int <= bound, "{raw:?}: {fixed} vs {int}");
        }
    }
}

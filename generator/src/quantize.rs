// quantize.rs — Coefficient quantization
//
// Converts a real coefficient into an integer mantissa and a shift so that
// `m * 2^-s` approximates the coefficient within the mantissa bit budget.
//
// Preconditions: the coefficient is a finite f64.
// Postconditions: `|m| < 2^(b-1)`; `m * 2^-s` is the nearest value of that
//   shape to the coefficient; re-quantizing `m * 2^-s` with the same budget
//   returns the same pair.
// Failure modes: zero coefficient when a nonzero multiplier is required,
//   budget out of range, integer part not representable, coefficient too
//   small for the largest shift, tolerance exceeded.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::diag::{codes, DiagCode, Diagnostic};
use crate::format::{pow2, FixedFormat};
use crate::stage::Tap;

/// Smallest and largest supported mantissa budgets.
pub const MIN_MANTISSA_BITS: u32 = 2;
pub const MAX_MANTISSA_BITS: u32 = 53;

/// Largest multiplier shift. Products keep `shift + F_in` fractional bits
/// and the exact models hold them in 128-bit words.
pub const MAX_MULTIPLIER_SHIFT: i32 = 126;

/// Quantized multiplier: `mantissa * 2^-shift`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuantizedMultiplier {
    pub mantissa: i64,
    pub shift: i32,
    /// Mantissa bit budget (two's complement, sign included).
    pub bits: u32,
}

impl QuantizedMultiplier {
    pub fn zero(bits: u32) -> Self {
        QuantizedMultiplier {
            mantissa: 0,
            shift: 0,
            bits,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    /// Real value `m * 2^-s` (exact in f64 for budgets up to 53 bits).
    pub fn value(&self) -> f64 {
        self.mantissa as f64 * pow2(-self.shift)
    }

    /// ac_fixed format holding the constant exactly.
    pub fn fixed_format(&self) -> FixedFormat {
        if self.is_zero() {
            return FixedFormat::zero();
        }
        FixedFormat::new(self.bits, self.bits as i32 - self.shift, true)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuantizeOptions {
    pub bits: u32,
    /// Maximum accepted relative error `|c - q| / |c|`.
    pub tolerance: Option<f64>,
    /// Reject zero coefficients instead of producing a zero multiplier.
    pub require_nonzero: bool,
}

impl QuantizeOptions {
    pub fn with_bits(bits: u32) -> Self {
        QuantizeOptions {
            bits,
            tolerance: None,
            require_nonzero: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuantizeError {
    ZeroCoefficient,
    NotFinite(f64),
    BudgetOutOfRange {
        bits: u32,
    },
    IntegerPartOverflow {
        coefficient: f64,
        bits: u32,
    },
    Underflow {
        coefficient: f64,
        bits: u32,
        shift: i32,
    },
    ToleranceExceeded {
        coefficient: f64,
        rel_error: f64,
        tolerance: f64,
    },
}

impl fmt::Display for QuantizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantizeError::ZeroCoefficient => {
                write!(f, "coefficient is zero but a nonzero multiplier is required")
            }
            QuantizeError::NotFinite(c) => write!(f, "coefficient {c} is not finite"),
            QuantizeError::BudgetOutOfRange { bits } => write!(
                f,
                "mantissa budget of {bits} bits is outside {MIN_MANTISSA_BITS}..={MAX_MANTISSA_BITS}"
            ),
            QuantizeError::IntegerPartOverflow { coefficient, bits } => write!(
                f,
                "integer part of {coefficient} does not fit a {bits}-bit signed mantissa"
            ),
            QuantizeError::Underflow {
                coefficient,
                bits,
                shift,
            } => write!(
                f,
                "coefficient {coefficient:e} needs a shift of {shift} for a {bits}-bit mantissa, above the limit of {MAX_MULTIPLIER_SHIFT}"
            ),
            QuantizeError::ToleranceExceeded {
                coefficient,
                rel_error,
                tolerance,
            } => write!(
                f,
                "coefficient {coefficient} quantizes with relative error {rel_error:e}, above tolerance {tolerance:e}"
            ),
        }
    }
}

impl QuantizeError {
    pub fn code(&self) -> DiagCode {
        match self {
            QuantizeError::ZeroCoefficient => codes::E0201,
            QuantizeError::BudgetOutOfRange { .. } => codes::E0202,
            QuantizeError::IntegerPartOverflow { .. } => codes::E0203,
            QuantizeError::ToleranceExceeded { .. } => codes::E0204,
            QuantizeError::NotFinite(_) => codes::E0205,
            QuantizeError::Underflow { .. } => codes::E0206,
        }
    }

    pub fn to_diagnostic(&self, tap: &Tap) -> Diagnostic {
        let diag = Diagnostic::error(tap.span, format!("tap `{}`: {}", tap.name, self))
            .with_code(self.code());
        match self {
            QuantizeError::ZeroCoefficient => {
                diag.with_hint("drop the tap or allow zero multipliers with `nonzero 0`")
            }
            QuantizeError::IntegerPartOverflow { .. } | QuantizeError::ToleranceExceeded { .. } => {
                diag.with_hint("raise the tap's `mantissa` budget")
            }
            QuantizeError::Underflow { .. } => {
                diag.with_hint("write the coefficient as 0 or lower the `mantissa` budget")
            }
            _ => diag,
        }
    }
}

/// Quantize `c` into `m * 2^-s` with `|m| < 2^(bits-1)`.
///
/// `s` is the largest shift keeping the rounded mantissa inside the budget,
/// so the mantissa uses the full budget: `2^(b-2) <= |m| < 2^(b-1)`.
pub fn quantize(c: f64, opts: &QuantizeOptions) -> Result<QuantizedMultiplier, QuantizeError> {
    let bits = opts.bits;
    if !(MIN_MANTISSA_BITS..=MAX_MANTISSA_BITS).contains(&bits) {
        return Err(QuantizeError::BudgetOutOfRange { bits });
    }
    if !c.is_finite() {
        return Err(QuantizeError::NotFinite(c));
    }
    if c == 0.0 {
        if opts.require_nonzero {
            return Err(QuantizeError::ZeroCoefficient);
        }
        return Ok(QuantizedMultiplier::zero(bits));
    }

    let limit = pow2(bits as i32 - 1);
    if c.abs().trunc() >= limit {
        return Err(QuantizeError::IntegerPartOverflow {
            coefficient: c,
            bits,
        });
    }

    let mut shift = bits as i32 - 2 - exponent_of(c);
    if shift > MAX_MULTIPLIER_SHIFT {
        return Err(QuantizeError::Underflow {
            coefficient: c,
            bits,
            shift,
        });
    }
    let mut mantissa = (c * pow2(shift)).round();
    if mantissa.abs() >= limit {
        // Rounded up to the next power of two; give the mantissa one bit back.
        shift -= 1;
        mantissa = (c * pow2(shift)).round();
    }

    let q = QuantizedMultiplier {
        mantissa: mantissa as i64,
        shift,
        bits,
    };

    if let Some(tolerance) = opts.tolerance {
        let rel_error = relative_error(c, &q);
        if rel_error > tolerance {
            return Err(QuantizeError::ToleranceExceeded {
                coefficient: c,
                rel_error,
                tolerance,
            });
        }
    }

    Ok(q)
}

/// Largest `|c - m 2^-s|` that `quantize` can leave at budget `bits`.
///
/// The mantissa keeps at least `b - 2` bits below its leading one after
/// rounding, so the rounding error stays under `|c| 2^-(b-2)`.
pub fn error_bound(c: f64, bits: u32) -> f64 {
    c.abs() * pow2(2 - bits as i32)
}

/// Whether `q` is an admissible quantization of `c` at budget `bits`:
/// same budget, mantissa inside it, error inside `error_bound`.
pub fn within_budget(c: f64, bits: u32, q: &QuantizedMultiplier) -> bool {
    if q.bits != bits || !(MIN_MANTISSA_BITS..=MAX_MANTISSA_BITS).contains(&bits) {
        return false;
    }
    q.mantissa.unsigned_abs() < 1u64 << (bits - 1)
        && q.shift <= MAX_MULTIPLIER_SHIFT
        && (c - q.value()).abs() <= error_bound(c, bits)
}

/// `|c - q| / |c|` (zero for a zero coefficient).
pub fn relative_error(c: f64, q: &QuantizedMultiplier) -> f64 {
    if c == 0.0 {
        return 0.0;
    }
    (c - q.value()).abs() / c.abs()
}

/// `e` with `2^e <= |c| < 2^(e+1)`.
fn exponent_of(c: f64) -> i32 {
    let a = c.abs();
    let mut e = a.log2().floor() as i32;
    while pow2(e) > a {
        e -= 1;
    }
    while pow2(e + 1) <= a {
        e += 1;
    }
    e
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q16(c: f64) -> QuantizedMultiplier {
        quantize(c, &QuantizeOptions::with_bits(16)).unwrap()
    }

    #[test]
    fn one_is_exact_at_full_scale() {
        let q = q16(1.0);
        assert_eq!(q.mantissa, 16384);
        assert_eq!(q.shift, 14);
        assert_eq!(q.value(), 1.0);
        assert_eq!(relative_error(1.0, &q), 0.0);
    }

    #[test]
    fn scenario_coefficients() {
        let q = q16(0.795928955078125);
        assert_eq!((q.mantissa, q.shift), (26081, 15));
        assert_eq!(q.value(), 0.795928955078125);

        let q = q16(0.023296356201171875);
        assert_eq!((q.mantissa, q.shift), (24428, 20));

        let q = q16(0.12245845794677734375);
        assert_eq!((q.mantissa, q.shift), (32102, 18));
        assert!(relative_error(0.12245845794677734375, &q) < pow2(-14));
    }

    #[test]
    fn negative_coefficients_round_symmetrically() {
        let p = q16(0.3147125244140625);
        let n = q16(-0.3147125244140625);
        assert_eq!(p.mantissa, -n.mantissa);
        assert_eq!(p.shift, n.shift);
    }

    #[test]
    fn mantissa_uses_full_budget() {
        for &c in &[0.001, 0.3, 0.99, 1.5, 3.75, -7.2, 100.0] {
            let q = q16(c);
            let m = q.mantissa.abs();
            assert!(m >= 1 << 14 && m < 1 << 15, "{c}: mantissa {m}");
        }
    }

    #[test]
    fn rounding_up_to_power_of_two_drops_one_shift() {
        // 0.99999 * 2^15 rounds to 32768, which overflows 16 bits.
        let q = q16(0.99999);
        assert_eq!(q.mantissa, 16384);
        assert_eq!(q.shift, 14);
    }

    #[test]
    fn requantizing_is_idempotent() {
        for &c in &[0.795928955078125, -0.61952972412109375, 0.99999, 1.0e-3, 12.34] {
            let q = q16(c);
            let again = q16(q.value());
            assert_eq!(q, again);
        }
    }

    #[test]
    fn zero_coefficient() {
        let q = q16(0.0);
        assert!(q.is_zero());
        assert_eq!(q.fixed_format(), FixedFormat::zero());

        let opts = QuantizeOptions {
            require_nonzero: true,
            ..QuantizeOptions::with_bits(16)
        };
        assert_eq!(quantize(0.0, &opts), Err(QuantizeError::ZeroCoefficient));
    }

    #[test]
    fn budget_errors() {
        assert_eq!(
            quantize(0.5, &QuantizeOptions::with_bits(1)),
            Err(QuantizeError::BudgetOutOfRange { bits: 1 })
        );
        assert!(matches!(
            quantize(200.0, &QuantizeOptions::with_bits(8)),
            Err(QuantizeError::IntegerPartOverflow { bits: 8, .. })
        ));
        assert!(matches!(
            quantize(f64::NAN, &QuantizeOptions::with_bits(8)),
            Err(QuantizeError::NotFinite(_))
        ));
    }

    #[test]
    fn mantissa_ties_round_away_from_zero() {
        // 0.5625 * 2^3 = 4.5 at a 4-bit budget.
        let opts = QuantizeOptions::with_bits(4);
        let q = quantize(0.5625, &opts).unwrap();
        assert_eq!((q.mantissa, q.shift), (5, 3));
        let q = quantize(-0.5625, &opts).unwrap();
        assert_eq!((q.mantissa, q.shift), (-5, 3));
        // 4.375 rounds down, 4.625 rounds up: nearest, not floor.
        assert_eq!(quantize(0.546875, &opts).unwrap().mantissa, 4);
        assert_eq!(quantize(0.578125, &opts).unwrap().mantissa, 5);
    }

    #[test]
    fn subnormal_coefficient_is_rejected() {
        let err = quantize(1e-310, &QuantizeOptions::with_bits(16)).unwrap_err();
        assert!(matches!(err, QuantizeError::Underflow { bits: 16, .. }));
        assert_eq!(err.code(), codes::E0206);
        assert_eq!(err.code().class(), crate::diag::ErrorClass::PrecisionBudget);
        assert!(quantize(-f64::MIN_POSITIVE, &QuantizeOptions::with_bits(2)).is_err());
    }

    #[test]
    fn smallest_accepted_coefficient_keeps_the_mantissa_bound() {
        // 2^-112 at 16 bits needs exactly the largest shift.
        let q = q16(pow2(-112));
        assert_eq!(q.shift, MAX_MULTIPLIER_SHIFT);
        assert_eq!(q.mantissa, 1 << 14);
        assert!(quantize(pow2(-113), &QuantizeOptions::with_bits(16)).is_err());
        for &c in &[1e-30, -3.3e-25, 7.1e-20] {
            let q = q16(c);
            assert!(q.mantissa.unsigned_abs() < 1 << 15, "{c}: {q:?}");
            assert!(q.shift <= MAX_MULTIPLIER_SHIFT);
        }
    }

    #[test]
    fn quantized_values_stay_within_the_error_bound() {
        for &bits in &[2, 3, 8, 16, 24, 53] {
            for &c in &[0.0f64, 1.0, -0.99999, 0.7, 0.795928955078125, 3.0e-3, -12.34] {
                if c != 0.0 && c.abs().trunc() >= pow2(bits as i32 - 1) {
                    continue;
                }
                let q = quantize(c, &QuantizeOptions::with_bits(bits)).unwrap();
                assert!(within_budget(c, bits, &q), "{c} @ {bits}: {q:?}");
            }
        }
    }

    #[test]
    fn within_budget_rejects_foreign_multipliers() {
        let c = 0.795928955078125;
        let q = q16(c);
        let shifted = QuantizedMultiplier {
            mantissa: q.mantissa + 1000,
            ..q
        };
        assert!(!within_budget(c, 16, &shifted));
        let saturated = QuantizedMultiplier {
            mantissa: i64::MAX,
            shift: 1037,
            bits: 16,
        };
        assert!(!within_budget(1e-310, 16, &saturated));
        assert!(!within_budget(c, 12, &q));
        assert!(!within_budget(0.0, 16, &q));
    }

    #[test]
    fn tolerance_is_enforced() {
        let opts = QuantizeOptions {
            tolerance: Some(1e-3),
            ..QuantizeOptions::with_bits(6)
        };
        assert!(matches!(
            quantize(0.3, &opts),
            Err(QuantizeError::ToleranceExceeded { .. })
        ));
        assert!(quantize(0.375, &opts).is_ok());
    }

    #[test]
    fn fixed_format_holds_constant() {
        let q = q16(0.795928955078125);
        let f = q.fixed_format();
        assert_eq!((f.width, f.int_bits), (16, 1));
        let q = q16(1.0);
        assert_eq!((q.fixed_format().width, q.fixed_format().int_bits), (16, 2));
    }
}

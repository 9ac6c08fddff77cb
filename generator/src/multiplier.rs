// multiplier.rs — Per-tap product synthesis
//
// Turns a tap and its quantized multiplier into a `Product`: the integer
// term `m * v` with its exact fraction and range, and the fixed-point term
// (constant format and exact widened product format).
//
// Preconditions: `q` was quantized from `tap.coefficient`.
// Postconditions: `raw_width <= 64`; `bound` bounds `|m 2^-s * x|` over the
//   tap's input range.
// Failure modes: raw product wider than the 64-bit container.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::diag::{codes, Diagnostic};
use crate::format::{mul_format, FixedFormat, QFormat};
use crate::id::TapId;
use crate::quantize::QuantizedMultiplier;
use crate::stage::Tap;

/// Width of the integer backend's intermediate container (`int64_t`).
pub const CONTAINER_BITS: u32 = 64;

/// Largest shift ever emitted. Every intermediate has magnitude below
/// `2^63`, so shifting right by 63 gives the same result as any larger shift.
pub const MAX_SHIFT: u32 = 63;

// ── Leaf shift ────────────────────────────────────────────────────────────

/// Alignment of a raw product to the common leaf fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LeafShift {
    None,
    /// Drop `k` fractional bits (truncating).
    Right(u32),
    /// Add `k` zero fractional bits (exact).
    Left(u32),
}

impl LeafShift {
    /// Shift that moves a value from fraction `from` to fraction `to`.
    pub fn between(from: i32, to: i32) -> Self {
        let delta = from - to;
        if delta > 0 {
            LeafShift::Right((delta as u32).min(MAX_SHIFT))
        } else if delta < 0 {
            LeafShift::Left(delta.unsigned_abs())
        } else {
            LeafShift::None
        }
    }

    pub fn truncates(&self) -> bool {
        matches!(self, LeafShift::Right(_))
    }
}

// ── Product ───────────────────────────────────────────────────────────────

/// Integer and fixed-point view of `m * v` for one tap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub tap: TapId,
    pub multiplier: QuantizedMultiplier,
    pub input: QFormat,
    /// Fraction of the raw product `m * v`: `shift + F_in`.
    pub frac_bits: i32,
    /// Bits needed by the raw product word.
    pub raw_width: u32,
    /// Upper bound of `|m 2^-s * x|`.
    pub bound: f64,
    /// ac_fixed format of the constant.
    pub constant_format: FixedFormat,
    /// Exact product format (no truncation at the multiply).
    pub product_format: FixedFormat,
}

impl Product {
    pub fn is_zero(&self) -> bool {
        self.multiplier.is_zero()
    }

    /// Shift aligning this product to the common leaf fraction.
    pub fn leaf_shift(&self, leaf_frac: i32) -> LeafShift {
        if self.is_zero() {
            return LeafShift::None;
        }
        LeafShift::between(self.frac_bits, leaf_frac)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MultiplierError {
    ContainerOverflow { raw_width: u32 },
}

impl fmt::Display for MultiplierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultiplierError::ContainerOverflow { raw_width } => write!(
                f,
                "product needs {raw_width} bits, more than the {CONTAINER_BITS}-bit container"
            ),
        }
    }
}

impl MultiplierError {
    pub fn to_diagnostic(&self, tap: &Tap) -> Diagnostic {
        Diagnostic::error(tap.span, format!("tap `{}`: {}", tap.name, self))
            .with_code(codes::E0304)
            .with_hint("lower the tap's `mantissa` budget or its input width")
    }
}

/// Synthesize the product for one tap.
pub fn synthesize(tap: &Tap, q: QuantizedMultiplier) -> Result<Product, MultiplierError> {
    let input = tap.format;
    if q.is_zero() {
        return Ok(Product {
            tap: tap.id,
            multiplier: q,
            input,
            frac_bits: input.frac_bits(),
            raw_width: 1,
            bound: 0.0,
            constant_format: FixedFormat::zero(),
            product_format: FixedFormat::zero(),
        });
    }

    // |m| < 2^(b-1) and |v| <= 2^W (unsigned) or 2^(W-1) (signed).
    let raw_width = q.bits + input.width;
    if raw_width > CONTAINER_BITS {
        return Err(MultiplierError::ContainerOverflow { raw_width });
    }

    let constant_format = q.fixed_format();
    Ok(Product {
        tap: tap.id,
        multiplier: q,
        input,
        frac_bits: q.shift + input.frac_bits(),
        raw_width,
        bound: q.value().abs() * input.max_magnitude(),
        constant_format,
        product_format: mul_format(constant_format, FixedFormat::from(input)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::{quantize, QuantizeOptions};
    use crate::stage::StageSpec;

    fn tap(c: f64, format: QFormat) -> Tap {
        StageSpec::new("s", QFormat::signed(16, 2))
            .with_tap(c, format)
            .taps
            .remove(0)
    }

    fn product(c: f64, format: QFormat, bits: u32) -> Product {
        let t = tap(c, format);
        let q = quantize(c, &QuantizeOptions::with_bits(bits)).unwrap();
        synthesize(&t, q).unwrap()
    }

    #[test]
    fn product_fraction_and_bound() {
        let p = product(0.795928955078125, QFormat::signed(16, 1), 16);
        assert_eq!(p.frac_bits, 30);
        assert_eq!(p.raw_width, 32);
        assert_eq!(p.bound, 0.795928955078125);
        assert_eq!(p.product_format, FixedFormat::new(32, 2, true));
    }

    #[test]
    fn product_serializes_with_its_tap_id() {
        let p = product(0.5, QFormat::signed(16, 1), 16);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["tap"], 0);
        assert_eq!(json["multiplier"]["mantissa"], 16384);
        assert_eq!(json["frac_bits"], 30);
    }

    #[test]
    fn unsigned_input_bound_uses_full_range() {
        let p = product(0.5, QFormat::unsigned(8, 2), 16);
        assert_eq!(p.bound, 2.0);
        assert!(p.product_format.signed);
        assert_eq!(p.product_format.width, 16 + 8 + 1);
    }

    #[test]
    fn leaf_shift_directions() {
        let p = product(1.0, QFormat::signed(16, 1), 16);
        assert_eq!(p.frac_bits, 29);
        assert_eq!(p.leaf_shift(16), LeafShift::Right(13));
        assert_eq!(p.leaf_shift(29), LeafShift::None);
        assert_eq!(p.leaf_shift(31), LeafShift::Left(2));
    }

    #[test]
    fn huge_right_shift_saturates() {
        assert_eq!(LeafShift::between(200, 10), LeafShift::Right(MAX_SHIFT));
    }

    #[test]
    fn zero_product_is_minimal() {
        let p = product(0.0, QFormat::signed(16, 1), 16);
        assert!(p.is_zero());
        assert_eq!(p.bound, 0.0);
        assert_eq!(p.product_format, FixedFormat::zero());
        assert_eq!(p.leaf_shift(3), LeafShift::None);
    }

    #[test]
    fn container_overflow() {
        let t = tap(0.3, QFormat::signed(32, 1));
        let q = quantize(0.3, &QuantizeOptions::with_bits(40)).unwrap();
        assert_eq!(
            synthesize(&t, q),
            Err(MultiplierError::ContainerOverflow { raw_width: 72 })
        );
    }
}

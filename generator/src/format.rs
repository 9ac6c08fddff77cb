// format.rs — Q-formats and fixed-point operand formats
//
// `QFormat` describes a tap's input word or the stage output: a two's
// complement (or unsigned) integer of `width` bits with `int_bits` bits left
// of the binary point. `FixedFormat` is the operand type of the ac_fixed
// backend; its arithmetic is a set of free functions computing result
// formats algebraically.
//
// Preconditions: widths are at least 1.
// Postconditions: result formats of `mul_format`/`add_format` hold the
//   exact result of the operation on any operands of the input formats.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

// ── Q-format ──────────────────────────────────────────────────────────────

/// Word format of a tap input or of the stage output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct QFormat {
    pub width: u32,
    pub int_bits: i32,
    pub signed: bool,
}

impl QFormat {
    pub fn signed(width: u32, int_bits: i32) -> Self {
        QFormat {
            width,
            int_bits,
            signed: true,
        }
    }

    pub fn unsigned(width: u32, int_bits: i32) -> Self {
        QFormat {
            width,
            int_bits,
            signed: false,
        }
    }

    pub fn frac_bits(&self) -> i32 {
        self.width as i32 - self.int_bits
    }

    /// Upper bound of `|x|` over all representable values.
    ///
    /// Signed: `2^(I-1)` (attained by the most negative word).
    /// Unsigned: `2^I` (not attained).
    pub fn max_magnitude(&self) -> f64 {
        if self.signed {
            pow2(self.int_bits - 1)
        } else {
            pow2(self.int_bits)
        }
    }

    /// Smallest and largest raw word.
    pub fn raw_range(&self) -> (i64, i64) {
        if self.signed {
            let half = 1i128 << (self.width - 1);
            (-half as i64, (half - 1) as i64)
        } else {
            (0, ((1i128 << self.width) - 1) as i64)
        }
    }

    /// Real value of a raw word.
    pub fn to_real(&self, raw: i64) -> f64 {
        raw as f64 * pow2(-self.frac_bits())
    }

    /// Smallest C integer type holding one word.
    pub fn c_type(&self) -> &'static str {
        match (self.signed, self.width) {
            (true, 0..=8) => "int8_t",
            (true, 9..=16) => "int16_t",
            (true, 17..=32) => "int32_t",
            (true, _) => "int64_t",
            (false, 0..=8) => "uint8_t",
            (false, 9..=16) => "uint16_t",
            (false, 17..=32) => "uint32_t",
            (false, _) => "uint64_t",
        }
    }
}

impl fmt::Display for QFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.signed { "signed" } else { "unsigned" };
        write!(f, "<{}, {}, {}>", self.width, self.int_bits, sign)
    }
}

// ── Fixed-point operand format ────────────────────────────────────────────

/// Rounding applied when a value is assigned to a narrower fraction.
///
/// Every constant and intermediate uses `Truncate` (`AC_TRN`): low-order
/// bits are discarded, i.e. rounding toward negative infinity on the two's
/// complement word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Rounding {
    #[default]
    Truncate,
}

impl Rounding {
    pub fn ac_mode(&self) -> &'static str {
        match self {
            Rounding::Truncate => "AC_TRN",
        }
    }
}

/// Format of one ac_fixed operand: `ac_fixed<width, int_bits, signed, rounding>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FixedFormat {
    pub width: u32,
    pub int_bits: i32,
    pub signed: bool,
    pub rounding: Rounding,
}

impl FixedFormat {
    pub fn new(width: u32, int_bits: i32, signed: bool) -> Self {
        FixedFormat {
            width,
            int_bits,
            signed,
            rounding: Rounding::Truncate,
        }
    }

    pub fn frac_bits(&self) -> i32 {
        self.width as i32 - self.int_bits
    }

    /// Minimal format of the constant zero.
    pub fn zero() -> Self {
        FixedFormat::new(1, 1, true)
    }
}

impl From<QFormat> for FixedFormat {
    fn from(q: QFormat) -> Self {
        FixedFormat::new(q.width, q.int_bits, q.signed)
    }
}

impl fmt::Display for FixedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ac_fixed<{},{},{},{}>",
            self.width,
            self.int_bits,
            self.signed,
            self.rounding.ac_mode()
        )
    }
}

/// Exact product format: widths and integer parts add.
///
/// A signed × unsigned product is signed; the unsigned operand needs one
/// extra bit to be represented in the signed result.
pub fn mul_format(a: FixedFormat, b: FixedFormat) -> FixedFormat {
    let signed = a.signed || b.signed;
    let extra = if a.signed != b.signed { 1 } else { 0 };
    FixedFormat::new(
        a.width + b.width + extra,
        a.int_bits + b.int_bits + extra as i32,
        signed,
    )
}

/// Exact sum format: the fraction is the larger fraction, the integer part
/// grows by one bit over the larger integer part.
pub fn add_format(a: FixedFormat, b: FixedFormat) -> FixedFormat {
    let frac = a.frac_bits().max(b.frac_bits());
    let int_bits = a.int_bits.max(b.int_bits) + 1;
    FixedFormat::new((int_bits + frac) as u32, int_bits, a.signed || b.signed)
}

/// Narrow the integer part to `int_bits` (when smaller), keeping the fraction.
///
/// Used when a range proof shows the algebraic integer growth is not needed.
pub fn narrow_int_bits(f: FixedFormat, int_bits: i32) -> FixedFormat {
    if int_bits >= f.int_bits {
        return f;
    }
    let width = (int_bits + f.frac_bits()).max(1);
    FixedFormat::new(width as u32, int_bits, f.signed)
}

// ── Range helpers ─────────────────────────────────────────────────────────

/// `2^e` as an f64 (exact for the exponents used here).
pub fn pow2(e: i32) -> f64 {
    2f64.powi(e)
}

/// Smallest signed integer width `I` with `bound < 2^(I-1)`.
///
/// Every value in `[-bound, bound]` then fits a signed word with `I`
/// integer bits. A zero bound needs a single (sign) bit.
pub fn int_bits_for(bound: f64) -> i32 {
    if bound <= 0.0 {
        return 1;
    }
    let mut bits = bound.log2().floor() as i32 + 2;
    while pow2(bits - 1) <= bound {
        bits += 1;
    }
    while pow2(bits - 2) > bound {
        bits -= 1;
    }
    bits
}

// wcpg.rs — Worst-case peak gain oracle boundary
//
// Typed wrapper around the external `WCPG_ABCD` routine. A stage is a
// memoryless linear system: no state (n = 0), one output (p = 1) and one
// input per tap (q = taps), with D holding the quantized coefficients. The
// WCPG of such a system is |D|; stateful systems need the external library.
//
// Preconditions: matrices are row-major; A is n×n, B n×q, C p×n, D p×q.
// Postconditions: on success, a p×q gain matrix of non-negative entries.
// Failure modes: shape mismatch or oracle failure (`WcpgError`); never a
//   silently zeroed matrix.
// Side effects: `LibWcpg` calls into the linked C library.

use std::fmt;

use serde::Serialize;

use crate::diag::{codes, Diagnostic};
use crate::format::int_bits_for;
use crate::stage::Stage;

// ── State space ─────────────────────────────────────────────────────────────

/// `{A, B, C, D}` realization with `n` states, `p` outputs, `q` inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSpace {
    pub a: Vec<f64>,
    pub b: Vec<f64>,
    pub c: Vec<f64>,
    pub d: Vec<f64>,
    pub n: usize,
    pub p: usize,
    pub q: usize,
}

impl StateSpace {
    /// Memoryless realization of a stage's quantized weighted sum.
    pub fn from_stage(stage: &Stage) -> Self {
        StateSpace {
            a: Vec::new(),
            b: Vec::new(),
            c: Vec::new(),
            d: stage.multipliers.iter().map(|q| q.value()).collect(),
            n: 0,
            p: 1,
            q: stage.multipliers.len(),
        }
    }

    fn check_shapes(&self) -> Result<(), WcpgError> {
        let expected = [
            ("A", self.n * self.n, self.a.len()),
            ("B", self.n * self.q, self.b.len()),
            ("C", self.p * self.n, self.c.len()),
            ("D", self.p * self.q, self.d.len()),
        ];
        for (matrix, expected, found) in expected {
            if expected != found {
                return Err(WcpgError::Shape {
                    matrix,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }
}

// ── Oracle ──────────────────────────────────────────────────────────────────

/// Mirrors `int WCPG_ABCD(double *W, double *A, double *B, double *C,
/// double *D, uint64_t n, uint64_t p, uint64_t q)`: fills the preallocated
/// `w` (p×q) and returns `false` on failure.
pub trait WcpgOracle {
    #[allow(clippy::too_many_arguments)]
    fn wcpg_abcd(
        &self,
        w: &mut [f64],
        a: &[f64],
        b: &[f64],
        c: &[f64],
        d: &[f64],
        n: u64,
        p: u64,
        q: u64,
    ) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub enum WcpgError {
    Shape {
        matrix: &'static str,
        expected: usize,
        found: usize,
    },
    OracleFailed,
}

impl fmt::Display for WcpgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WcpgError::Shape {
                matrix,
                expected,
                found,
            } => write!(f, "matrix {matrix} has {found} entries, expected {expected}"),
            WcpgError::OracleFailed => write!(f, "WCPG oracle reported failure"),
        }
    }
}

impl WcpgError {
    /// Oracle problems never block generation.
    pub fn to_diagnostic(&self, stage: &Stage) -> Diagnostic {
        Diagnostic::warning(
            stage.spec.span,
            format!("stage `{}`: WCPG cross-check skipped: {}", stage.name(), self),
        )
        .with_code(codes::W0500)
    }
}

/// Compute the p×q worst-case peak gain matrix.
pub fn worst_case_peak_gain(
    oracle: &dyn WcpgOracle,
    sys: &StateSpace,
) -> Result<Vec<f64>, WcpgError> {
    sys.check_shapes()?;
    let mut w = vec![0.0; sys.p * sys.q];
    let ok = oracle.wcpg_abcd(
        &mut w,
        &sys.a,
        &sys.b,
        &sys.c,
        &sys.d,
        sys.n as u64,
        sys.p as u64,
        sys.q as u64,
    );
    if ok {
        Ok(w)
    } else {
        Err(WcpgError::OracleFailed)
    }
}

/// Exact oracle for systems without state: `W = |D|`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemorylessOracle;

impl WcpgOracle for MemorylessOracle {
    fn wcpg_abcd(
        &self,
        w: &mut [f64],
        _a: &[f64],
        _b: &[f64],
        _c: &[f64],
        d: &[f64],
        n: u64,
        _p: u64,
        _q: u64,
    ) -> bool {
        if n != 0 || w.len() != d.len() {
            return false;
        }
        for (wi, di) in w.iter_mut().zip(d) {
            *wi = di.abs();
        }
        true
    }
}

#[cfg(feature = "libwcpg")]
mod ffi {
    #[link(name = "wcpg")]
    extern "C" {
        pub fn WCPG_ABCD(
            w: *mut f64,
            a: *const f64,
            b: *const f64,
            c: *const f64,
            d: *const f64,
            n: u64,
            p: u64,
            q: u64,
        ) -> std::os::raw::c_int;
    }
}

/// The external multi-precision WCPG library.
#[cfg(feature = "libwcpg")]
#[derive(Debug, Clone, Copy, Default)]
pub struct LibWcpg;

#[cfg(feature = "libwcpg")]
impl WcpgOracle for LibWcpg {
    fn wcpg_abcd(
        &self,
        w: &mut [f64],
        a: &[f64],
        b: &[f64],
        c: &[f64],
        d: &[f64],
        n: u64,
        p: u64,
        q: u64,
    ) -> bool {
        // The library reads its inputs only; `worst_case_peak_gain` checked
        // every length against (n, p, q).
        let ret = unsafe {
            ffi::WCPG_ABCD(
                w.as_mut_ptr(),
                a.as_ptr(),
                b.as_ptr(),
                c.as_ptr(),
                d.as_ptr(),
                n,
                p,
                q,
            )
        };
        ret != 0
    }
}

/// The oracle selected at build time.
pub fn default_oracle() -> Box<dyn WcpgOracle> {
    #[cfg(feature = "libwcpg")]
    {
        Box::new(LibWcpg)
    }
    #[cfg(not(feature = "libwcpg"))]
    {
        Box::new(MemorylessOracle)
    }
}

// ── Output range cross-check ────────────────────────────────────────────────

/// Output range derived from the peak gains, compared with width inference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WcpgCheck {
    pub gains: Vec<f64>,
    /// `sum_i W_i * max|x_i|`.
    pub output_bound: f64,
    pub int_bits: i32,
    /// The gain-derived bound does not exceed the inferred exact bound.
    pub consistent: bool,
}

/// Cross-check the inferred output range of a stage against the oracle.
pub fn cross_check(oracle: &dyn WcpgOracle, stage: &Stage) -> Result<WcpgCheck, WcpgError> {
    let gains = worst_case_peak_gain(oracle, &StateSpace::from_stage(stage))?;
    let output_bound: f64 = gains
        .iter()
        .zip(&stage.spec.taps)
        .map(|(g, t)| g * t.format.max_magnitude())
        .sum();
    let inferred = stage.fixed.root_bound();
    Ok(WcpgCheck {
        int_bits: int_bits_for(output_bound),
        consistent: output_bound <= inferred * (1.0 + 1e-12),
        gains,
        output_bound,
    })
}

/// Warning for a cross-check that disagrees with width inference.
pub fn inconsistency_warning(stage: &Stage, check: &WcpgCheck) -> Option<Diagnostic> {
    if check.consistent {
        return None;
    }
    Some(
        Diagnostic::warning(
            stage.spec.span,
            format!(
                "stage `{}`: WCPG output bound {:e} exceeds the inferred bound {:e}",
                stage.name(),
                check.output_bound,
                stage.fixed.root_bound()
            ),
        )
        .with_code(codes::W0500),
    )
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::QFormat;
    use crate::stage::StageSpec;

    struct FailingOracle;

    impl WcpgOracle for FailingOracle {
        fn wcpg_abcd(
            &self,
            w: &mut [f64],
            _a: &[f64],
            _b: &[f64],
            _c: &[f64],
            _d: &[f64],
            _n: u64,
            _p: u64,
            _q: u64,
        ) -> bool {
            w.fill(0.0);
            false
        }
    }

    fn stage() -> Stage {
        let input = QFormat::signed(16, 1);
        Stage::synthesize(
            StageSpec::new("s", QFormat::signed(16, 2))
                .with_tap(0.5, input)
                .with_tap(-0.75, input),
        )
        .unwrap()
    }

    #[test]
    fn memoryless_gain_is_abs_d() {
        let sys = StateSpace::from_stage(&stage());
        assert_eq!((sys.n, sys.p, sys.q), (0, 1, 2));
        let w = worst_case_peak_gain(&MemorylessOracle, &sys).unwrap();
        assert_eq!(w, vec![0.5, 0.75]);
    }

    #[test]
    fn memoryless_oracle_refuses_state() {
        let sys = StateSpace {
            a: vec![0.5],
            b: vec![1.0],
            c: vec![1.0],
            d: vec![0.0],
            n: 1,
            p: 1,
            q: 1,
        };
        assert_eq!(
            worst_case_peak_gain(&MemorylessOracle, &sys),
            Err(WcpgError::OracleFailed)
        );
    }

    #[test]
    fn failure_is_not_a_zero_matrix() {
        let s = stage();
        let err = cross_check(&FailingOracle, &s).unwrap_err();
        assert_eq!(err, WcpgError::OracleFailed);
        let diag = err.to_diagnostic(&s);
        assert_eq!(diag.code, Some(codes::W0500));
        assert_eq!(diag.level, crate::diag::DiagLevel::Warning);
    }

    #[test]
    fn shape_mismatch() {
        let mut sys = StateSpace::from_stage(&stage());
        sys.d.pop();
        assert_eq!(
            worst_case_peak_gain(&MemorylessOracle, &sys),
            Err(WcpgError::Shape {
                matrix: "D",
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn cross_check_agrees_with_width_inference() {
        let s = stage();
        let check = cross_check(&MemorylessOracle, &s).unwrap();
        assert!(check.consistent);
        assert!(inconsistency_warning(&s, &check).is_none());
        assert!(check.int_bits <= s.output().int_bits);
    }
}

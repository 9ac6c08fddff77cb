// report.rs — JSON verification report (`--emit report`)
//
// Collects, per stage, everything a reviewer needs to check the three
// implementations against each other: quantized multipliers with their
// relative error, every tree node with its decision and formats, the output
// shift, the error bounds, the WCPG cross-check and the certificate.
//
// Preconditions: stages passed synthesis and verification.
// Postconditions: stages appear in declaration order; serialization is
//   deterministic.
// Failure modes: none.
// Side effects: none.

use serde::Serialize;

use crate::eval;
use crate::format::{FixedFormat, QFormat};
use crate::multiplier::LeafShift;
use crate::pass::PassCert;
use crate::quantize::relative_error;
use crate::stage::Stage;
use crate::tree::{Decision, NodeKind};
use crate::verify::Verification;
use crate::wcpg::WcpgCheck;

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generator_version: &'static str,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub output: QFormat,
    pub register_width: u32,
    pub policy: String,
    pub leaf_frac: i32,
    pub guard_bits: u32,
    pub final_shift: LeafShift,
    pub has_wraps: bool,
    /// Integer bits the output would need when its range is only asserted.
    pub asserted_range: Option<i32>,
    pub taps: Vec<TapReport>,
    pub nodes: Vec<NodeReport>,
    pub error: ErrorReport,
    pub wcpg: Option<WcpgCheck>,
    pub obligations: Vec<ObligationReport>,
    pub vectors: VectorSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct TapReport {
    pub name: String,
    pub coefficient: f64,
    pub input: QFormat,
    pub mantissa: i64,
    pub shift: i32,
    pub bits: u32,
    pub quantized: f64,
    pub relative_error: f64,
    pub constant_format: FixedFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub id: u32,
    pub level: u32,
    pub index: u32,
    /// Leaf: the tap it applies. Sum: its two children.
    pub tap: Option<u32>,
    pub children: Option<[u32; 2]>,
    pub leaf_shift: Option<LeafShift>,
    pub child_shifts: Option<[u32; 2]>,
    pub decision: Option<Decision>,
    pub frac: i32,
    pub int_bits: i32,
    pub width: u32,
    pub exact_bits: Option<i32>,
    pub fixed_format: FixedFormat,
    pub bound: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub quantization: f64,
    pub truncation: f64,
    pub budget: f64,
    pub fixed_int_ulp_bound: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObligationReport {
    pub name: &'static str,
    pub holds: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorSummary {
    pub checked: usize,
    /// Vectors whose float value may leave an asserted output range.
    pub float_skipped: usize,
    pub failed: usize,
}

/// Build the report entry of one stage.
pub fn stage_report(
    stage: &Stage,
    verification: &Verification,
    wcpg: Option<&WcpgCheck>,
) -> StageReport {
    let spec = &stage.spec;
    let taps = spec
        .taps
        .iter()
        .zip(&stage.multipliers)
        .zip(&stage.products)
        .map(|((tap, q), p)| TapReport {
            name: tap.name.clone(),
            coefficient: tap.coefficient,
            input: tap.format,
            mantissa: q.mantissa,
            shift: q.shift,
            bits: q.bits,
            quantized: q.value(),
            relative_error: relative_error(tap.coefficient, q),
            constant_format: p.constant_format,
        })
        .collect();

    let nodes = stage
        .tree
        .nodes
        .iter()
        .map(|node| {
            let (tap, children, leaf_shift, child_shifts) = match node.kind {
                NodeKind::Leaf { tap, shift } => (Some(tap.0), None, Some(shift), None),
                NodeKind::Sum {
                    left,
                    right,
                    left_adjust,
                    right_adjust,
                    ..
                } => (
                    None,
                    Some([left.0, right.0]),
                    None,
                    Some([left_adjust.shift, right_adjust.shift]),
                ),
            };
            NodeReport {
                id: node.id.0,
                level: node.level,
                index: node.index,
                tap,
                children,
                leaf_shift,
                child_shifts,
                decision: node.decision(),
                frac: node.frac,
                int_bits: node.int_bits,
                width: node.width,
                exact_bits: node.exact_bits,
                fixed_format: stage.fixed.nodes[node.id.index()],
                bound: node.bound,
            }
        })
        .collect();

    let float_skipped = verification
        .vectors
        .iter()
        .filter(|v| v.float_ok.is_none())
        .count();
    let failed = verification.vectors.iter().filter(|v| !v.passed()).count();

    StageReport {
        name: spec.name.clone(),
        output: spec.output,
        register_width: spec.config.register_width,
        policy: spec.config.policy.to_string(),
        leaf_frac: stage.tree.leaf_frac,
        guard_bits: stage.tree.guard_bits,
        final_shift: stage.tree.final_shift,
        has_wraps: stage.tree.has_wraps,
        asserted_range: stage.fixed.asserted_range,
        taps,
        nodes,
        error: ErrorReport {
            quantization: eval::quantization_error(stage),
            truncation: eval::truncation_error(stage),
            budget: verification.error_budget,
            fixed_int_ulp_bound: verification.fixed_int_ulp_bound,
        },
        wcpg: wcpg.cloned(),
        obligations: verification
            .certificate
            .obligations()
            .into_iter()
            .map(|(name, holds)| ObligationReport { name, holds })
            .collect(),
        vectors: VectorSummary {
            checked: verification.vectors.len(),
            float_skipped,
            failed,
        },
    }
}

impl Report {
    pub fn new(stages: Vec<StageReport>) -> Self {
        Report {
            generator_version: env!("CARGO_PKG_VERSION"),
            stages,
        }
    }

    /// Pretty-printed JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut s = serde_json::to_string_pretty(self)?;
        s.push('\n');
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageSpec;
    use crate::verify::verify_stage;
    use crate::wcpg::{cross_check, MemorylessOracle};

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
    fn scenario_report_fields() {
        let stage = scenario();
        let v = verify_stage(&stage);
        let check = cross_check(&MemorylessOracle, &stage).unwrap();
        let r = stage_report(&stage, &v, Some(&check));
        assert_eq!(r.taps.len(), 4);
        assert_eq!(r.taps[1].mantissa, 16384);
        assert_eq!(r.taps[1].shift, 14);
        assert_eq!(r.taps[1].relative_error, 0.0);
        assert_eq!(r.nodes.len(), 7);
        assert_eq!(r.nodes[6].children, Some([4, 5]));
        assert_eq!(r.nodes[6].decision, Some(Decision::Fits));
        assert_eq!(r.final_shift, LeafShift::Right(2));
        assert_eq!(r.vectors.failed, 0);
        assert!(r.obligations.iter().all(|o| o.holds));
    }

    #[test]
    fn json_is_deterministic_and_tagged() {
        let stage = scenario();
        let v = verify_stage(&stage);
        let report = Report::new(vec![stage_report(&stage, &v, None)]);
        let json = report.to_json().unwrap();
        assert_eq!(json, report.to_json().unwrap());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["stages"][0]["name"], "lgs30");
        assert_eq!(value["stages"][0]["nodes"][4]["decision"]["kind"], "fits");
        assert_eq!(value["stages"][0]["final_shift"]["Right"], 2);
        assert_eq!(value["stages"][0]["policy"], "strict");
        assert!(value["stages"][0]["wcpg"].is_null());
    }
}

// codegen.rs — C/C++ rendering of synthesized stages
//
// Three stateless renderers walk the same `Stage`:
//   - float:    direct weighted sum in tap order with the real coefficients;
//   - int:      quantized multiplies, shifts and wraps exactly as recorded in
//               the accumulation tree, in `int64_t` temporaries;
//   - ac_fixed: the same tree shape with the inferred operand formats and a
//               single truncating conversion at the return.
//
// Preconditions: the stage was produced by `Stage::synthesize`.
// Postconditions: output depends only on the stage; re-rendering an
//   unchanged stage is byte-identical.
// Failure modes: none.
// Side effects: none.

use std::fmt::Write as _;

use crate::id::NodeId;
use crate::multiplier::LeafShift;
use crate::stage::Stage;
use crate::tree::{ChildAdjust, NodeKind};

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    pub float_source: String,
    pub int_source: String,
    pub fixed_source: String,
}

/// Which implementations to include in a translation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Float,
    Int,
    Fixed,
}

pub const ALL_BACKENDS: [Backend; 3] = [Backend::Float, Backend::Int, Backend::Fixed];

impl GeneratedCode {
    pub fn source(&self, backend: Backend) -> &str {
        match backend {
            Backend::Float => &self.float_source,
            Backend::Int => &self.int_source,
            Backend::Fixed => &self.fixed_source,
        }
    }
}

/// Helper macros shared by every integer implementation.
const HELPER_MACROS: &str = "\
#define SOP_WRAP(x, b) ((int64_t)((uint64_t)(x) << (64 - (b))) >> (64 - (b)))
#define SOP_SHL(x, k) ((int64_t)((uint64_t)(x) << (k)))
";

/// Includes and helper macros for a unit holding `backends`. `ac_fixed.h`
/// is only pulled in for the ac_fixed backend, so int and float units stay
/// plain C.
pub fn preamble(backends: &[Backend]) -> String {
    let mut out = String::from("#include <stdint.h>\n");
    if backends.contains(&Backend::Fixed) {
        out.push_str("#include <ac_fixed.h>\n");
    }
    out.push('\n');
    out.push_str(HELPER_MACROS);
    out
}

// ── Public entry points ─────────────────────────────────────────────────────

/// Render all three implementations of a stage.
pub fn render(stage: &Stage) -> GeneratedCode {
    GeneratedCode {
        float_source: render_float(stage),
        int_source: render_int(stage),
        fixed_source: render_fixed(stage),
    }
}

/// Render a translation unit holding the selected backends of every stage.
pub fn render_translation_unit<'a>(
    stages: impl IntoIterator<Item = &'a Stage>,
    backends: &[Backend],
) -> String {
    let rendered: Vec<(&str, GeneratedCode)> =
        stages.into_iter().map(|s| (s.name(), render(s))).collect();
    assemble_translation_unit(rendered.iter().map(|(name, code)| (*name, code)), backends)
}

/// Concatenate already rendered stages behind one preamble.
pub fn assemble_translation_unit<'a>(
    units: impl IntoIterator<Item = (&'a str, &'a GeneratedCode)>,
    backends: &[Backend],
) -> String {
    let mut out = String::new();
    out.push_str("// Generated by sopgen\n");
    out.push_str(&preamble(backends));
    for (name, code) in units {
        let _ = write!(out, "\n// stage {name}\n");
        for (i, backend) in backends.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(code.source(*backend));
        }
    }
    out
}

// ── Float ───────────────────────────────────────────────────────────────────

pub fn render_float(stage: &Stage) -> String {
    let taps = &stage.spec.taps;
    let mut out = String::new();
    let params: Vec<String> = taps.iter().map(|t| format!("double {}", t.name)).collect();
    let _ = writeln!(
        out,
        "double {}_float({}) {{",
        stage.name(),
        params.join(", ")
    );
    for (i, tap) in taps.iter().enumerate() {
        let c = tap.coefficient;
        if i == 0 {
            let _ = write!(out, "    return {:?} * {}", c, tap.name);
        } else if c.is_sign_negative() {
            let _ = write!(out, "\n        - {:?} * {}", -c, tap.name);
        } else {
            let _ = write!(out, "\n        + {:?} * {}", c, tap.name);
        }
    }
    out.push_str(";\n}\n");
    out
}

// ── Integer shift ───────────────────────────────────────────────────────────

pub fn render_int(stage: &Stage) -> String {
    let spec = &stage.spec;
    let tree = &stage.tree;
    let mut out = String::new();

    let params: Vec<String> = spec
        .taps
        .iter()
        .map(|t| format!("{} {}", t.format.c_type(), t.name))
        .collect();
    let out_type = spec.output.c_type();
    let _ = writeln!(
        out,
        "{} {}_int({}) {{",
        out_type,
        stage.name(),
        params.join(", ")
    );

    for node in &tree.nodes {
        let rhs = match node.kind {
            NodeKind::Leaf { tap, shift } => {
                let q = stage.multipliers[tap.index()];
                if q.is_zero() {
                    "0".to_string()
                } else {
                    let name = &spec.taps[tap.index()].name;
                    let product = format!("(int64_t){} * {}", q.mantissa, name);
                    match shift {
                        LeafShift::None => product,
                        LeafShift::Right(k) => format!("({}) >> {}", product, k),
                        LeafShift::Left(k) => format!("SOP_SHL({}, {})", product, k),
                    }
                }
            }
            NodeKind::Sum {
                left,
                right,
                left_adjust,
                right_adjust,
                ..
            } => format!(
                "{} + {}",
                child_operand(left, left_adjust),
                child_operand(right, right_adjust)
            ),
        };
        let _ = writeln!(out, "    const int64_t {} = {};", temp(node.id), rhs);
    }

    let root = temp(tree.root);
    let shifted = match tree.final_shift {
        LeafShift::None => root,
        LeafShift::Right(k) => format!("{} >> {}", root, k),
        LeafShift::Left(k) => format!("SOP_SHL({}, {})", root, k),
    };
    let value = if tree.has_wraps {
        format!("SOP_WRAP({}, {})", shifted, spec.output.width)
    } else if matches!(tree.final_shift, LeafShift::Right(_)) {
        format!("({})", shifted)
    } else {
        shifted
    };
    let _ = writeln!(out, "    return ({}){};", out_type, value);
    out.push_str("}\n");
    out
}

fn temp(id: NodeId) -> String {
    format!("t{}", id.0)
}

fn child_operand(id: NodeId, adjust: ChildAdjust) -> String {
    let name = temp(id);
    match (adjust.shift, adjust.wrap) {
        (0, None) => name,
        (k, None) => format!("({} >> {})", name, k),
        (0, Some(bits)) => format!("SOP_WRAP({}, {})", name, bits),
        (k, Some(bits)) => format!("SOP_WRAP({} >> {}, {})", name, k, bits),
    }
}

// ── ac_fixed ────────────────────────────────────────────────────────────────

pub fn render_fixed(stage: &Stage) -> String {
    let spec = &stage.spec;
    let plan = &stage.fixed;
    let mut out = String::new();

    let params: Vec<String> = spec
        .taps
        .iter()
        .zip(&plan.inputs)
        .map(|(t, f)| format!("{} {}", f, t.name))
        .collect();
    let _ = writeln!(
        out,
        "{} {}_ac_fixed({}) {{",
        plan.output,
        stage.name(),
        params.join(", ")
    );

    for (i, q) in stage.multipliers.iter().enumerate() {
        if q.is_zero() {
            continue;
        }
        let _ = writeln!(
            out,
            "    const {} c{} = {:?};",
            plan.constants[i],
            i,
            q.value()
        );
    }

    for node in &stage.tree.nodes {
        let format = plan.nodes[node.id.index()];
        let rhs = match node.kind {
            NodeKind::Leaf { tap, .. } => {
                if stage.multipliers[tap.index()].is_zero() {
                    "0".to_string()
                } else {
                    format!("c{} * {}", tap.0, spec.taps[tap.index()].name)
                }
            }
            NodeKind::Sum { left, right, .. } => format!("{} + {}", temp(left), temp(right)),
        };
        let _ = writeln!(out, "    const {} {} = {};", format, temp(node.id), rhs);
    }

    let _ = writeln!(out, "    return {}({});", plan.output, temp(stage.tree.root));
    out.push_str("}\n");
    out
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::QFormat;
    use crate::stage::{StageConfig, StageSpec};
    use crate::tree::NormalizationPolicy;

    fn stage(spec: StageSpec) -> Stage {
        Stage::synthesize(spec).unwrap()
    }

    #[test]
    fn float_keeps_tap_order_and_signs() {
        let input = QFormat::signed(16, 1);
        let s = stage(
            StageSpec::new("f", QFormat::signed(16, 2))
                .with_tap(0.5, input)
                .with_tap(-0.25, input),
        );
        assert_eq!(
            render_float(&s),
            "double f_float(double v0, double v1) {\n    return 0.5 * v0\n        - 0.25 * v1;\n}\n"
        );
    }

    #[test]
    fn single_tap_int() {
        let s = stage(
            StageSpec::new("one", QFormat::signed(16, 2)).with_tap(1.0, QFormat::signed(16, 1)),
        );
        assert_eq!(
            render_int(&s),
            "int16_t one_int(int16_t v0) {\n    const int64_t t0 = ((int64_t)16384 * v0) >> 15;\n    return (int16_t)t0;\n}\n"
        );
    }

    #[test]
    fn zero_tap_emits_no_multiply() {
        let input = QFormat::signed(16, 1);
        let s = stage(
            StageSpec::new("z", QFormat::signed(16, 2))
                .with_tap(0.5, input)
                .with_tap(0.0, input),
        );
        let int = render_int(&s);
        assert!(int.contains("    const int64_t t1 = 0;\n"));
        let fixed = render_fixed(&s);
        assert!(fixed.contains("    const ac_fixed<1,1,true,AC_TRN> t1 = 0;\n"));
        assert!(!fixed.contains(" c1 "));
    }

    #[test]
    fn halve_and_wrap_render_explicitly() {
        let input = QFormat::signed(16, 1);
        let base = StageSpec::new("h", QFormat::signed(16, 2))
            .with_tap(0.9, input)
            .with_tap(0.9, input);
        let halve = stage(base.clone().with_config(StageConfig {
            register_width: 16,
            guard_bits: Some(1),
            policy: NormalizationPolicy::Halve,
            ..StageConfig::default()
        }));
        assert!(render_int(&halve).contains("    const int64_t t2 = (t0 >> 1) + (t1 >> 1);\n"));

        let wrap = stage(
            StageSpec {
                output: QFormat::signed(15, 1),
                ..base
            }
            .with_config(StageConfig {
                register_width: 16,
                guard_bits: Some(1),
                policy: NormalizationPolicy::Wrap,
                ..StageConfig::default()
            }),
        );
        let int = render_int(&wrap);
        assert!(int.contains("    const int64_t t2 = SOP_WRAP(t0, 16) + SOP_WRAP(t1, 16);\n"));
        assert!(int.contains("    return (int16_t)SOP_WRAP(t2 >> 1, 15);\n"));
    }

    #[test]
    fn translation_unit_has_preamble_once() {
        let input = QFormat::signed(16, 1);
        let a = stage(StageSpec::new("a", QFormat::signed(16, 2)).with_tap(0.5, input));
        let b = stage(StageSpec::new("b", QFormat::signed(16, 2)).with_tap(0.25, input));
        let tu = render_translation_unit(&[a, b], &ALL_BACKENDS);
        assert_eq!(tu.matches("#define SOP_WRAP").count(), 1);
        assert!(tu.contains("// stage a\n"));
        assert!(tu.contains("b_ac_fixed("));
        assert!(tu.contains("#include <ac_fixed.h>\n"));
    }

    #[test]
    fn int_unit_does_not_include_ac_fixed() {
        let s = stage(
            StageSpec::new("c", QFormat::signed(16, 2)).with_tap(0.5, QFormat::signed(16, 1)),
        );
        let plain: [&[Backend]; 3] = [
            &[Backend::Int],
            &[Backend::Float],
            &[Backend::Float, Backend::Int],
        ];
        for backends in plain {
            let tu = render_translation_unit([&s], backends);
            assert!(tu.starts_with(
                "// Generated by sopgen\n#include <stdint.h>\n\n#define SOP_WRAP"
            ));
            assert!(!tu.contains("ac_fixed"), "{tu}");
        }
        let tu = render_translation_unit([&s], &[Backend::Fixed]);
        assert!(tu.contains("#include <stdint.h>\n#include <ac_fixed.h>\n\n"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let input = QFormat::signed(12, 3);
        let spec = StageSpec::new("d", QFormat::signed(16, 6))
            .with_tap(0.7, input)
            .with_tap(-1.3, input)
            .with_tap(2.1, input);
        assert_eq!(render(&stage(spec.clone())), render(&stage(spec)));
    }
}

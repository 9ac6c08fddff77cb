// dot.rs — Graphviz DOT output for accumulation trees
//
// Transforms synthesized stages into DOT format suitable for rendering
// with `dot` or other Graphviz layout engines. One cluster per stage; leaves
// are products, sums are adds annotated with their decision, edges carry the
// child adjustment (shift, wrap).
//
// Preconditions: every stage was produced by `Stage::synthesize`.
// Postconditions: returns a valid DOT string representing the trees.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::id::NodeId;
use crate::multiplier::LeafShift;
use crate::stage::Stage;
use crate::tree::{AccNode, ChildAdjust, Decision, NodeKind};

/// Emit the accumulation trees of `stages` as a Graphviz DOT string.
pub fn emit_dot<'a>(stages: impl IntoIterator<Item = &'a Stage>) -> String {
    let mut buf = String::new();
    let _ = writeln!(buf, "digraph sopgen {{");
    let _ = writeln!(buf, "    rankdir=BT;");
    let _ = writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];");
    let _ = writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];");

    for stage in stages {
        let sanitized = sanitize(stage.name());
        let _ = writeln!(buf);
        let _ = writeln!(buf, "    subgraph cluster_{sanitized} {{");
        let _ = writeln!(buf, "        label=\"stage: {}\";", stage.name());
        let _ = writeln!(buf, "        style=rounded;");
        let _ = writeln!(buf, "        color=gray50;");
        write_tree_contents(&mut buf, &sanitized, stage, "        ");
        let _ = writeln!(buf, "    }}");
    }

    let _ = writeln!(buf, "}}");
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Build the DOT node ID: `<stage>_t<id>`.
fn dot_node_id(stage: &str, node: NodeId) -> String {
    format!("{stage}_t{}", node.0)
}

/// Return the node label: operation on the first line, format on the second.
fn node_label(stage: &Stage, node: &AccNode) -> String {
    let format = stage.fixed.nodes[node.id.index()];
    match node.kind {
        NodeKind::Leaf { tap, shift } => {
            let q = stage.multipliers[tap.index()];
            let name = &stage.spec.taps[tap.index()].name;
            let op = if q.is_zero() {
                "0".to_string()
            } else {
                match shift {
                    LeafShift::None => format!("{} * {name}", q.mantissa),
                    LeafShift::Right(k) => format!("{} * {name} >> {k}", q.mantissa),
                    LeafShift::Left(k) => format!("{} * {name} << {k}", q.mantissa),
                }
            };
            format!("t{}: {op}\\n{format}", node.id.0)
        }
        NodeKind::Sum { decision, .. } => {
            let tag = match decision {
                Decision::Fits => String::new(),
                Decision::Halve => " (halve)".to_string(),
                Decision::Wrap { bits } => format!(" (wrap {bits})"),
            };
            format!(
                "t{}: +{tag}\\nf={} w={}/{}",
                node.id.0,
                node.frac,
                node.required_width(),
                node.width
            )
        }
    }
}

/// Return DOT attributes string for a node.
fn node_attrs(stage: &Stage, node: &AccNode) -> String {
    let (shape, color) = match node.kind {
        NodeKind::Leaf { .. } => ("box", "lightblue"),
        NodeKind::Sum { decision, .. } => match decision {
            Decision::Fits => ("ellipse", "lightyellow"),
            Decision::Halve => ("ellipse", "orange"),
            Decision::Wrap { .. } => ("ellipse", "lightsalmon"),
        },
    };
    let label = node_label(stage, node);
    format!("shape={shape}, style=filled, fillcolor={color}, label=\"{label}\"")
}

fn edge_label(adjust: ChildAdjust) -> Option<String> {
    match (adjust.shift, adjust.wrap) {
        (0, None) => None,
        (k, None) => Some(format!(">> {k}")),
        (0, Some(bits)) => Some(format!("wrap {bits}")),
        (k, Some(bits)) => Some(format!(">> {k}, wrap {bits}")),
    }
}

/// Write all nodes and edges of one stage's tree, plus its output node.
fn write_tree_contents(buf: &mut String, stage_id: &str, stage: &Stage, indent: &str) {
    let tree = &stage.tree;

    // Nodes
    for node in &tree.nodes {
        let id = dot_node_id(stage_id, node.id);
        let attrs = node_attrs(stage, node);
        let _ = writeln!(buf, "{indent}{id} [{attrs}];");
    }
    let out_shift = match tree.final_shift {
        LeafShift::None => String::new(),
        LeafShift::Right(k) => format!(" >> {k}"),
        LeafShift::Left(k) => format!(" << {k}"),
    };
    let _ = writeln!(
        buf,
        "{indent}{stage_id}_out [shape=doublecircle, style=filled, fillcolor=lightgreen, label=\"out {}{out_shift}\"];",
        stage.output()
    );

    // Edges
    let _ = writeln!(buf);
    for node in &tree.nodes {
        if let NodeKind::Sum {
            left,
            right,
            left_adjust,
            right_adjust,
            ..
        } = node.kind
        {
            let tgt = dot_node_id(stage_id, node.id);
            for (child, adjust) in [(left, left_adjust), (right, right_adjust)] {
                let src = dot_node_id(stage_id, child);
                match edge_label(adjust) {
                    Some(label) if adjust.wrap.is_some() => {
                        let _ = writeln!(
                            buf,
                            "{indent}{src} -> {tgt} [label=\"{label}\", style=bold, color=red];"
                        );
                    }
                    Some(label) => {
                        let _ = writeln!(buf, "{indent}{src} -> {tgt} [label=\"{label}\"];");
                    }
                    None => {
                        let _ = writeln!(buf, "{indent}{src} -> {tgt};");
                    }
                }
            }
        }
    }
    let root = dot_node_id(stage_id, tree.root);
    let _ = writeln!(buf, "{indent}{root} -> {stage_id}_out;");
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::QFormat;
    use crate::stage::{StageConfig, StageSpec};
    use crate::tree::NormalizationPolicy;
    use std::collections::HashSet;

    fn scenario(name: &str) -> Stage {
        let input = QFormat::signed(16, 1);
        Stage::synthesize(
            StageSpec::new(name, QFormat::signed(16, 2))
                .with_tap(0.795928955078125, input)
                .with_tap(1.0, input)
                .with_tap(0.023296356201171875, input)
                .with_tap(0.12245845794677734375, input),
        )
        .unwrap()
    }

    #[test]
    fn valid_dot_structure() {
        let dot = emit_dot(&[scenario("lgs30")]);
        assert!(dot.starts_with("digraph sopgen {"));
        assert!(dot.trim_end().ends_with('}'));
        assert!(dot.contains("subgraph cluster_lgs30 {"));
        assert!(dot.contains("label=\"stage: lgs30\""));
        assert!(dot.contains("lgs30_t6 -> lgs30_out;"));
        assert!(dot.contains("label=\"out <16, 2, signed> >> 2\""));
    }

    #[test]
    fn leaves_show_multiply_and_shift() {
        let dot = emit_dot(&[scenario("s")]);
        assert!(dot.contains("t0: 26081 * v0 >> 14"));
        assert!(dot.contains("t1: 16384 * v1 >> 13"));
        assert!(dot.contains("s_t0 -> s_t4;"));
        assert!(dot.contains("s_t4 -> s_t6;"));
    }

    #[test]
    fn wrap_edges_are_marked() {
        let input = QFormat::signed(16, 1);
        let stage = Stage::synthesize(
            StageSpec::new("w", QFormat::signed(15, 1))
                .with_tap(0.9, input)
                .with_tap(0.9, input)
                .with_config(StageConfig {
                    register_width: 16,
                    guard_bits: Some(1),
                    policy: NormalizationPolicy::Wrap,
                    ..StageConfig::default()
                }),
        )
        .unwrap();
        let dot = emit_dot(&[stage]);
        assert!(dot.contains("w_t0 -> w_t2 [label=\"wrap 16\", style=bold, color=red];"));
        assert!(dot.contains("(wrap 16)"));
    }

    #[test]
    fn unique_node_ids() {
        let dot = emit_dot(&[scenario("a"), scenario("b")]);
        let node_ids: Vec<&str> = dot
            .lines()
            .filter_map(|line| {
                let trimmed = line.trim();
                if trimmed.contains('[') && trimmed.contains("shape=") {
                    trimmed.split_whitespace().next()
                } else {
                    None
                }
            })
            .collect();
        let unique: HashSet<&&str> = node_ids.iter().collect();
        assert_eq!(node_ids.len(), 16);
        assert_eq!(
            node_ids.len(),
            unique.len(),
            "duplicate node IDs found: {:?}",
            node_ids
        );
    }

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize("a-b.c"), "a_b_c");
    }

    #[test]
    fn deterministic_output() {
        let dot1 = emit_dot(&[scenario("a")]);
        let dot2 = emit_dot(&[scenario("a")]);
        assert_eq!(dot1, dot2, "DOT output is not deterministic");
    }
}

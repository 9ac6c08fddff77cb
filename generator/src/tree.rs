// tree.rs — Accumulation tree construction
//
// Builds the binary reduction tree of a stage's products in an arena of
// single-assignment nodes. Leaves are the products in tap order; sums pair
// adjacent nodes left to right, level by level, carrying an odd node up
// unpaired. Every sum node records how its children were adjusted (right
// shift, optional modulo wrap) and which normalization decision was taken.
//
// Preconditions: one product per tap, in tap order.
// Postconditions: every `Fits`/`Halve` node's declared width holds the
//   provable range of its computed value; the leaf fraction keeps at least
//   `ceil(log2 N)` guard bits above the output fraction for N truncating
//   leaves;
//   a tree with wraps still determines every output bit; node ids are leaves
//   first, then sums in creation order.
// Failure modes: width overflow under the strict policy, halving that cannot
//   resolve an overflow, wraps that discard output bits, leaves wider than
//   their declared width, too few guard bits, overrides naming no node.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::diag::{codes, Diagnostic};
use crate::format::{int_bits_for, pow2};
use crate::id::{IdAllocator, NodeId, TapId};
use crate::multiplier::{LeafShift, Product, MAX_SHIFT};
use crate::stage::{ceil_log2, StageSpec};

// ── Policy and decisions ──────────────────────────────────────────────────

/// What a sum node does when its range exceeds its declared width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationPolicy {
    /// Reject the stage.
    Strict,
    /// Shift both children right by one more bit.
    Halve,
    /// Reduce both children modulo `2^width` before the add.
    Wrap,
}

impl NormalizationPolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "strict" => Some(NormalizationPolicy::Strict),
            "halve" => Some(NormalizationPolicy::Halve),
            "wrap" => Some(NormalizationPolicy::Wrap),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NormalizationPolicy::Strict => "strict",
            NormalizationPolicy::Halve => "halve",
            NormalizationPolicy::Wrap => "wrap",
        }
    }
}

impl fmt::Display for NormalizationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decision recorded on each sum node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Decision {
    Fits,
    Halve,
    Wrap { bits: u32 },
}

/// Adjustment applied to a child before it enters its parent's add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChildAdjust {
    /// Right shift (truncating).
    pub shift: u32,
    /// Sign-extending reduction modulo `2^bits`, applied after the shift.
    pub wrap: Option<u32>,
}

impl ChildAdjust {
    pub fn is_identity(&self) -> bool {
        self.shift == 0 && self.wrap.is_none()
    }
}

// ── Arena ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Leaf {
        tap: TapId,
        shift: LeafShift,
    },
    Sum {
        left: NodeId,
        right: NodeId,
        left_adjust: ChildAdjust,
        right_adjust: ChildAdjust,
        decision: Decision,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccNode {
    pub id: NodeId,
    /// Level of creation (0 for leaves) and position within that level.
    pub level: u32,
    pub index: u32,
    pub kind: NodeKind,
    /// Magnitude bound of the value computed at this node, in real units.
    pub bound: f64,
    /// Magnitude bound of the unwrapped value, truncation error included.
    pub value_bound: f64,
    /// Fractional bits of the node's raw word.
    pub frac: i32,
    /// Integer bits proven sufficient for the computed value.
    pub int_bits: i32,
    /// Declared width (register width or per-node override).
    pub width: u32,
    /// `Some(e)`: the raw word is only exact modulo `2^e` because a wrap
    /// happened below. `None`: exact.
    pub exact_bits: Option<i32>,
}

impl AccNode {
    pub fn required_width(&self) -> i32 {
        self.int_bits + self.frac
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    pub fn decision(&self) -> Option<Decision> {
        match self.kind {
            NodeKind::Sum { decision, .. } => Some(decision),
            NodeKind::Leaf { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccTree {
    /// Arena indexed by `NodeId`.
    pub nodes: Vec<AccNode>,
    pub root: NodeId,
    /// Node ids per level, left to right. Carried nodes repeat on the
    /// levels they pass through.
    pub levels: Vec<Vec<NodeId>>,
    pub leaf_frac: i32,
    pub guard_bits: u32,
    /// Shift from the root fraction to the output fraction.
    pub final_shift: LeafShift,
    pub has_wraps: bool,
}

impl AccTree {
    pub fn node(&self, id: NodeId) -> &AccNode {
        &self.nodes[id.index()]
    }

    pub fn root_node(&self) -> &AccNode {
        self.node(self.root)
    }

    pub fn leaves(&self) -> impl Iterator<Item = &AccNode> {
        self.nodes.iter().filter(|n| n.is_leaf())
    }

    pub fn sums(&self) -> impl Iterator<Item = &AccNode> {
        self.nodes.iter().filter(|n| !n.is_leaf())
    }

    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Exactness of the output word after the final shift.
    pub fn output_exact_bits(&self) -> Option<i32> {
        self.root_node()
            .exact_bits
            .map(|e| shifted_exact_bits(e, self.final_shift))
    }

    /// Bound of the intended output value, truncation error included.
    pub fn output_value_bound(&self, out_frac: i32) -> f64 {
        let slack = if self.final_shift.truncates() {
            pow2(-out_frac)
        } else {
            0.0
        };
        self.root_node().value_bound + slack
    }
}

fn shifted_exact_bits(e: i32, shift: LeafShift) -> i32 {
    match shift {
        LeafShift::None => e,
        LeafShift::Right(k) => e - k as i32,
        LeafShift::Left(k) => e + k as i32,
    }
}

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TreeError {
    NoTaps,
    UnknownNode {
        level: u32,
        index: u32,
    },
    LeafOverflow {
        tap: TapId,
        int_bits: i32,
        width: u32,
    },
    GuardHeadroom {
        leaf_frac: i32,
        output_frac: i32,
        taps: usize,
        required: u32,
    },
    NodeOverflow {
        level: u32,
        index: u32,
        required: i32,
        width: u32,
    },
    HalvingInsufficient {
        level: u32,
        index: u32,
        required: i32,
        width: u32,
    },
    WrapLosesOutput {
        exact_bits: i32,
        output_width: u32,
    },
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::NoTaps => write!(f, "stage has no taps"),
            TreeError::UnknownNode { level, index } => write!(
                f,
                "node ({level}, {index}) is not created at that level of the tree"
            ),
            TreeError::LeafOverflow {
                tap,
                int_bits,
                width,
            } => write!(
                f,
                "leaf of tap {} needs {int_bits} integer bits but is declared {width} bits wide",
                tap.0
            ),
            TreeError::GuardHeadroom {
                leaf_frac,
                output_frac,
                taps,
                required,
            } => write!(
                f,
                "leaves at fraction {leaf_frac} keep {} guard bits above the output fraction {output_frac}; {taps} truncating leaves need {required}",
                leaf_frac - output_frac
            ),
            TreeError::NodeOverflow {
                level,
                index,
                required,
                width,
            } => write!(
                f,
                "node ({level}, {index}) needs {required} bits but is declared {width} bits wide"
            ),
            TreeError::HalvingInsufficient {
                level,
                index,
                required,
                width,
            } => write!(
                f,
                "node ({level}, {index}) still needs {required} bits after halving, declared {width}"
            ),
            TreeError::WrapLosesOutput {
                exact_bits,
                output_width,
            } => write!(
                f,
                "wrapped accumulation determines only {exact_bits} low bits of the {output_width}-bit output"
            ),
        }
    }
}

impl TreeError {
    pub fn to_diagnostic(&self, spec: &StageSpec) -> Diagnostic {
        let message = format!("stage `{}`: {}", spec.name, self);
        match self {
            TreeError::NoTaps => Diagnostic::error(spec.span, message).with_code(codes::E0105),
            TreeError::UnknownNode { level, index } => {
                let span = spec
                    .override_for(*level, *index)
                    .map(|o| o.span)
                    .unwrap_or(spec.span);
                Diagnostic::error(span, message)
                    .with_code(codes::E0305)
                    .with_hint("carried nodes are addressed on the level that created them")
            }
            TreeError::LeafOverflow { tap, .. } => {
                let span = spec
                    .taps
                    .get(tap.index())
                    .map(|t| t.span)
                    .unwrap_or(spec.span);
                Diagnostic::error(span, message)
                    .with_code(codes::E0306)
                    .with_hint("widen the register or the leaf with `node (0, i) width W`")
            }
            TreeError::GuardHeadroom { .. } => Diagnostic::error(spec.span, message)
                .with_code(codes::E0403)
                .with_hint("widen the register or raise `guard`"),
            TreeError::NodeOverflow { level, index, .. } => {
                node_diagnostic(spec, *level, *index, message, codes::E0301)
                    .with_hint("widen the node or choose `policy halve` or `policy wrap`")
            }
            TreeError::HalvingInsufficient { level, index, .. } => {
                node_diagnostic(spec, *level, *index, message, codes::E0302)
                    .with_hint("widen the node or choose `policy wrap`")
            }
            TreeError::WrapLosesOutput { .. } => Diagnostic::error(spec.span, message)
                .with_code(codes::E0303)
                .with_hint("wrap at a wider width"),
        }
    }
}

fn node_diagnostic(
    spec: &StageSpec,
    level: u32,
    index: u32,
    message: String,
    code: crate::diag::DiagCode,
) -> Diagnostic {
    let diag = Diagnostic::error(spec.span, message).with_code(code);
    match spec.override_for(level, index) {
        Some(o) => diag.with_related(o.span, "node override declared here"),
        None => diag,
    }
}

// ── Builder ───────────────────────────────────────────────────────────────

/// Build the accumulation tree for a stage.
pub fn build_tree(spec: &StageSpec, products: &[Product]) -> Result<AccTree, TreeError> {
    let n = products.len();
    if n == 0 {
        return Err(TreeError::NoTaps);
    }
    validate_overrides(spec, n)?;

    let guard_bits = spec.config.guard_for(n);
    let leaf_frac = leaf_fraction(spec, products, guard_bits)?;

    let mut alloc = IdAllocator::new();
    let mut nodes: Vec<AccNode> = Vec::with_capacity(2 * n - 1);
    let mut current: Vec<NodeId> = Vec::with_capacity(n);

    for (index, product) in products.iter().enumerate() {
        let id = alloc.alloc_node();
        let shift = product.leaf_shift(leaf_frac);
        let slack = if shift.truncates() {
            pow2(-leaf_frac)
        } else {
            0.0
        };
        let bound = product.bound + slack;
        nodes.push(AccNode {
            id,
            level: 0,
            index: index as u32,
            kind: NodeKind::Leaf {
                tap: product.tap,
                shift,
            },
            bound,
            value_bound: bound,
            frac: leaf_frac,
            // Truncation toward -inf stays on the grid point -2^(I-1).
            int_bits: int_bits_for(product.bound),
            width: declared_width(spec, 0, index as u32),
            exact_bits: None,
        });
        current.push(id);
    }

    let mut levels = vec![current.clone()];
    let mut level = 0;
    while current.len() > 1 {
        level += 1;
        let mut next = Vec::with_capacity(current.len().div_ceil(2));
        for (index, pair) in current.chunks(2).enumerate() {
            if let [left, right] = *pair {
                let id = alloc.alloc_node();
                let node = sum_node(spec, &nodes, id, level, index as u32, left, right)?;
                next.push(node.id);
                nodes.push(node);
            } else {
                next.push(pair[0]);
            }
        }
        levels.push(next.clone());
        current = next;
    }

    let root = current[0];
    let root_frac = nodes[root.index()].frac;
    let final_shift = LeafShift::between(root_frac, spec.output.frac_bits());
    let has_wraps = nodes
        .iter()
        .any(|n| matches!(n.decision(), Some(Decision::Wrap { .. })));

    let tree = AccTree {
        nodes,
        root,
        levels,
        leaf_frac,
        guard_bits,
        final_shift,
        has_wraps,
    };

    if let Some(exact_bits) = tree.output_exact_bits() {
        if exact_bits < spec.output.width as i32 {
            return Err(TreeError::WrapLosesOutput {
                exact_bits,
                output_width: spec.output.width,
            });
        }
    }

    Ok(tree)
}

/// `F_L = min(F_out + guard, min over nonzero leaves of (W_leaf - I_leaf))`.
///
/// N truncating leaves lose less than `N 2^-F_L`; with `F_L - F_out >=
/// ceil(log2 N)` that stays under one output ulp, which is what keeps the
/// integer result within one ulp of the ac_fixed one. Leaves that land
/// exactly on `F_L` lose nothing and need no guard bits.
fn leaf_fraction(
    spec: &StageSpec,
    products: &[Product],
    guard_bits: u32,
) -> Result<i32, TreeError> {
    let output_frac = spec.output.frac_bits();
    let mut frac = output_frac + guard_bits as i32;
    for (index, product) in products.iter().enumerate() {
        if product.is_zero() {
            continue;
        }
        let width = declared_width(spec, 0, index as u32);
        let int_bits = int_bits_for(product.bound);
        if int_bits > width as i32 {
            return Err(TreeError::LeafOverflow {
                tap: product.tap,
                int_bits,
                width,
            });
        }
        frac = frac.min(width as i32 - int_bits);
    }
    let taps = products
        .iter()
        .filter(|p| p.leaf_shift(frac).truncates())
        .count();
    let required = ceil_log2(taps);
    if taps > 0 && frac - output_frac < required as i32 {
        return Err(TreeError::GuardHeadroom {
            leaf_frac: frac,
            output_frac,
            taps,
            required,
        });
    }
    Ok(frac)
}

fn declared_width(spec: &StageSpec, level: u32, index: u32) -> u32 {
    spec.override_for(level, index)
        .and_then(|o| o.width)
        .unwrap_or(spec.config.register_width)
}

/// Every override must address a node created at its level.
fn validate_overrides(spec: &StageSpec, taps: usize) -> Result<(), TreeError> {
    let shape = level_sizes(taps);
    for o in &spec.overrides {
        let created = match o.level {
            0 => taps,
            l => match shape.get(l as usize - 1) {
                Some(prev) => prev / 2,
                None => 0,
            },
        };
        if o.index as usize >= created {
            return Err(TreeError::UnknownNode {
                level: o.level,
                index: o.index,
            });
        }
    }
    Ok(())
}

/// Number of nodes on each level for `taps` leaves (carried nodes included).
pub fn level_sizes(taps: usize) -> Vec<usize> {
    let mut sizes = vec![taps];
    let mut len = taps;
    while len > 1 {
        len = len.div_ceil(2);
        sizes.push(len);
    }
    sizes
}

// ── Sum nodes ─────────────────────────────────────────────────────────────

/// One child after alignment to the node fraction.
struct Adjusted {
    adjust: ChildAdjust,
    bound: f64,
    value_bound: f64,
    exact_bits: Option<i32>,
}

fn adjust(child: &AccNode, frac: i32, wrap: Option<u32>) -> Adjusted {
    let shift = (child.frac - frac).max(0) as u32;
    let slack = if shift > 0 { pow2(-frac) } else { 0.0 };
    let mut bound = child.bound + slack;
    let value_bound = child.value_bound + slack;
    let mut exact_bits = child.exact_bits.map(|e| e - shift as i32);
    if let Some(bits) = wrap {
        bound = bound.min(pow2(bits as i32 - 1 - frac));
        exact_bits = Some(exact_bits.map_or(bits as i32, |e| e.min(bits as i32)));
    }
    Adjusted {
        adjust: ChildAdjust {
            shift: shift.min(MAX_SHIFT),
            wrap,
        },
        bound,
        value_bound,
        exact_bits,
    }
}

/// A candidate sum at a given fraction, before it is accepted.
struct Candidate {
    frac: i32,
    left: Adjusted,
    right: Adjusted,
}

impl Candidate {
    fn new(a: &AccNode, b: &AccNode, frac: i32, wrap: Option<u32>) -> Self {
        Candidate {
            frac,
            left: adjust(a, frac, wrap),
            right: adjust(b, frac, wrap),
        }
    }

    fn bound(&self) -> f64 {
        self.left.bound + self.right.bound
    }

    fn int_bits(&self) -> i32 {
        int_bits_for(self.bound())
    }

    fn required(&self) -> i32 {
        self.int_bits() + self.frac
    }
}

#[allow(clippy::too_many_arguments)]
fn sum_node(
    spec: &StageSpec,
    nodes: &[AccNode],
    id: NodeId,
    level: u32,
    index: u32,
    left: NodeId,
    right: NodeId,
) -> Result<AccNode, TreeError> {
    let a = &nodes[left.index()];
    let b = &nodes[right.index()];
    let over = spec.override_for(level, index);
    let width = over
        .and_then(|o| o.width)
        .unwrap_or(spec.config.register_width);
    let policy = over
        .and_then(|o| o.policy)
        .unwrap_or(spec.config.policy);

    let frac = a.frac.min(b.frac);
    let aligned = Candidate::new(a, b, frac, None);
    let (candidate, decision) = if aligned.required() <= width as i32 {
        (aligned, Decision::Fits)
    } else {
        match policy {
            NormalizationPolicy::Strict => {
                return Err(TreeError::NodeOverflow {
                    level,
                    index,
                    required: aligned.required(),
                    width,
                })
            }
            NormalizationPolicy::Halve => {
                let halved = Candidate::new(a, b, frac - 1, None);
                if halved.required() > width as i32 {
                    return Err(TreeError::HalvingInsufficient {
                        level,
                        index,
                        required: halved.required(),
                        width,
                    });
                }
                (halved, Decision::Halve)
            }
            NormalizationPolicy::Wrap => (
                Candidate::new(a, b, frac, Some(width)),
                Decision::Wrap { bits: width },
            ),
        }
    };

    let exact_bits = match (candidate.left.exact_bits, candidate.right.exact_bits) {
        (Some(l), Some(r)) => Some(l.min(r)),
        (Some(e), None) | (None, Some(e)) => Some(e),
        (None, None) => None,
    };

    Ok(AccNode {
        id,
        level,
        index,
        bound: candidate.bound(),
        value_bound: candidate.left.value_bound + candidate.right.value_bound,
        frac: candidate.frac,
        int_bits: candidate.int_bits(),
        width,
        exact_bits,
        kind: NodeKind::Sum {
            left,
            right,
            left_adjust: candidate.left.adjust,
            right_adjust: candidate.right.adjust,
            decision,
        },
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────

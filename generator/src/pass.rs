// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the generator's 9 semantic passes (parse is outside the runner),
// their dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each generator pass (parse is handled before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Resolve,
    Quantize,
    Synthesize,
    BuildTree,
    InferWidths,
    CrossCheck,
    Verify,
    Emit,
    Report,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Specs,        // Vec<StageSpec>
    Multipliers,  // Vec<QuantizedMultiplier>
    Products,     // Vec<Product>
    Tree,         // AccTree
    Stage,        // Stage (with FixedPlan)
    Wcpg,         // WcpgCheck
    Verification, // Verification (with StageCertificate)
    Generated,    // GeneratedCode
    Report,       // Report
}

// ── Post-condition certificates ────────────────────────────────────────────

/// Evidence a pass produces about its own output.
pub trait PassCert {
    /// True if every obligation holds.
    fn all_pass(&self) -> bool;
    /// Obligation names with their outcome, in a stable order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a generator pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Post-conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Resolve => PassDescriptor {
            name: "resolve",
            inputs: &[],
            outputs: &[ArtifactId::Specs],
            invalidation_key: "source + generator options",
            invariants: "literals in range, names unique, settings layered",
        },
        PassId::Quantize => PassDescriptor {
            name: "quantize",
            inputs: &[PassId::Resolve],
            outputs: &[ArtifactId::Multipliers],
            invalidation_key: "coefficients + mantissa budgets + tolerance",
            invariants: "|m| < 2^(b-1), tolerance respected",
        },
        PassId::Synthesize => PassDescriptor {
            name: "synthesize",
            inputs: &[PassId::Quantize],
            outputs: &[ArtifactId::Products],
            invalidation_key: "multipliers + input formats",
            invariants: "raw products fit the 64-bit container",
        },
        PassId::BuildTree => PassDescriptor {
            name: "build_tree",
            inputs: &[PassId::Synthesize],
            outputs: &[ArtifactId::Tree],
            invalidation_key: "products + output format + register/guard/policy + overrides",
            invariants: "pairwise left-to-right, widths hold or wrap, output bits exact",
        },
        PassId::InferWidths => PassDescriptor {
            name: "infer_widths",
            inputs: &[PassId::BuildTree],
            outputs: &[ArtifactId::Stage],
            invalidation_key: "products + tree + output format",
            invariants: "every operand format hosts its exact range",
        },
        PassId::CrossCheck => PassDescriptor {
            name: "cross_check",
            inputs: &[PassId::InferWidths],
            outputs: &[ArtifactId::Wcpg],
            invalidation_key: "stage + oracle",
            invariants: "oracle failures surface as W0500, never as zero gains",
        },
        PassId::Verify => PassDescriptor {
            name: "verify",
            inputs: &[PassId::InferWidths],
            outputs: &[ArtifactId::Verification],
            invalidation_key: "stage + vector count + seed",
            invariants: "V1-V7 obligations hold",
        },
        PassId::Emit => PassDescriptor {
            name: "emit",
            inputs: &[PassId::Verify],
            outputs: &[ArtifactId::Generated],
            invalidation_key: "stage",
            invariants: "three byte-deterministic implementations",
        },
        PassId::Report => PassDescriptor {
            name: "report",
            inputs: &[PassId::CrossCheck, PassId::Verify],
            outputs: &[ArtifactId::Report],
            invalidation_key: "stage + verification + wcpg check",
            invariants: "one entry per stage, in declaration order",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All 9 pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 9] = [
    PassId::Resolve,
    PassId::Quantize,
    PassId::Synthesize,
    PassId::BuildTree,
    PassId::InferWidths,
    PassId::CrossCheck,
    PassId::Verify,
    PassId::Emit,
    PassId::Report,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

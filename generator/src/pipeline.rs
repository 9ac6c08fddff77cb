// pipeline.rs — Generation state and pass orchestration
//
// Holds all pass artifacts (file-level and per stage) and runs the minimal
// set of passes for a given terminal PassId. Resolution runs once for the
// file; every later pass runs per stage, in declaration order. Stages are
// independent: a failing stage stops at its first failing pass and the
// remaining stages still run, so all diagnostics surface in one invocation.
//
// Preconditions: the parsed file and options must be set before calling
//   run_pipeline.
// Postconditions: all artifacts for required passes are populated for every
//   stage that did not fail, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: calls on_pass_complete callback after each pass for immediate
//   display; verbose timing lines on stderr.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::ast::SourceFile;
use crate::codegen::{self, Backend, GeneratedCode};
use crate::diag::{DiagLevel, Diagnostic};
use crate::multiplier::Product;
use crate::pass::{descriptor, required_passes, PassId};
use crate::quantize::QuantizedMultiplier;
use crate::report::{self, Report, StageReport};
use crate::stage::{self, Stage, StageConfig, StageSpec};
use crate::tree::{self, AccTree, NormalizationPolicy};
use crate::verify::{self, Verification};
use crate::wcpg::{self, WcpgCheck, WcpgOracle};
use crate::width_infer;

// ── Options ────────────────────────────────────────────────────────────────

/// Caller-level settings: the bottom layer under `set` statements and stage
/// clauses, plus knobs that only exist at the command line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenOptions {
    pub register_width: Option<u32>,
    pub mantissa_bits: Option<u32>,
    pub guard_bits: Option<u32>,
    pub policy: Option<NormalizationPolicy>,
    /// Run the WCPG cross-check of every stage's output range.
    pub wcpg: bool,
    /// Pseudo-random vectors simulated per stage by the verify pass.
    pub random_vectors: usize,
    pub seed: u64,
}

impl Default for GenOptions {
    fn default() -> Self {
        GenOptions {
            register_width: None,
            mantissa_bits: None,
            guard_bits: None,
            policy: None,
            wcpg: false,
            random_vectors: verify::RANDOM_VECTORS,
            seed: verify::VECTOR_SEED,
        }
    }
}

impl GenOptions {
    /// Stage settings before any file or stage override.
    pub fn stage_defaults(&self) -> StageConfig {
        let base = StageConfig::default();
        StageConfig {
            register_width: self.register_width.unwrap_or(base.register_width),
            mantissa_bits: self.mantissa_bits.unwrap_or(base.mantissa_bits),
            guard_bits: self.guard_bits.or(base.guard_bits),
            policy: self.policy.unwrap_or(base.policy),
            ..base
        }
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Everything derived for one stage. Fields fill in pass order; a failed
/// stage keeps the artifacts of the passes before the failing one.
#[derive(Debug, Clone)]
pub struct StageArtifacts {
    pub spec: StageSpec,
    pub multipliers: Option<Vec<QuantizedMultiplier>>,
    pub products: Option<Vec<Product>>,
    pub tree: Option<AccTree>,
    pub stage: Option<Stage>,
    pub wcpg: Option<WcpgCheck>,
    pub verification: Option<Verification>,
    pub generated: Option<GeneratedCode>,
    pub report: Option<StageReport>,
    pub failed_pass: Option<PassId>,
}

impl StageArtifacts {
    fn new(spec: StageSpec) -> Self {
        StageArtifacts {
            spec,
            multipliers: None,
            products: None,
            tree: None,
            stage: None,
            wcpg: None,
            verification: None,
            generated: None,
            report: None,
            failed_pass: None,
        }
    }
}

/// Provenance metadata for reproducible generation.
///
/// `source_hash`: SHA-256 of the raw `.sop` source text.
/// `options_fingerprint`: SHA-256 of the compact JSON of `GenOptions`.
/// `generator_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub options_fingerprint: [u8; 32],
    pub generator_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the options fingerprint (64 characters).
    pub fn options_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.options_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"options_fingerprint\": \"{}\",\n  \"generator_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.options_fingerprint_hex(),
            self.generator_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from source text and options.
pub fn compute_provenance(source: &str, options: &GenOptions) -> Provenance {
    let canonical = serde_json::to_string(options).unwrap_or_default();
    Provenance {
        source_hash: sha256(source.as_bytes()),
        options_fingerprint: sha256(canonical.as_bytes()),
        generator_version: env!("CARGO_PKG_VERSION"),
    }
}

/// Holds all generation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub file: SourceFile,
    pub options: GenOptions,
    pub stages: Vec<StageArtifacts>,
    pub report: Option<Report>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(file: SourceFile, options: GenOptions) -> Self {
        Self {
            file,
            options,
            stages: Vec::new(),
            report: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }

    /// Synthesized stages, in declaration order.
    pub fn synthesized(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter_map(|s| s.stage.as_ref())
    }

    /// Translation unit with the selected backends of every emitted stage.
    pub fn translation_unit(&self, backends: &[Backend]) -> String {
        codegen::assemble_translation_unit(
            self.stages
                .iter()
                .filter_map(|s| s.generated.as_ref().map(|g| (s.spec.name.as_str(), g))),
            backends,
        )
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The first pass that produced an error.
    pub failing_pass: PassId,
}

// ── Helper: check diagnostics for errors ───────────────────────────────────

fn has_error_diags(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

/// Per-pass post-processing: callback, accumulate, verbose, error check.
/// Returns Err(()) if error diagnostics found.
fn finish_pass_core(
    all_diags: &mut Vec<Diagnostic>,
    pass_id: PassId,
    stage_name: Option<&str>,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), ()> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_error_diags(&diags);
    all_diags.extend(diags);
    if verbose {
        match stage_name {
            Some(name) => eprintln!(
                "sopgen: {} `{}` complete, {:.1}ms",
                descriptor(pass_id).name,
                name,
                elapsed.as_secs_f64() * 1000.0
            ),
            None => eprintln!(
                "sopgen: {} complete, {:.1}ms",
                descriptor(pass_id).name,
                elapsed.as_secs_f64() * 1000.0
            ),
        }
    }
    if is_err {
        return Err(());
    }
    Ok(())
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`, with the oracle
/// selected at build time for the WCPG cross-check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    verbose: bool,
    on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let oracle = wcpg::default_oracle();
    run_pipeline_with_oracle(state, terminal, oracle.as_ref(), verbose, on_pass_complete)
}

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
///
/// Preconditions: `state.file` and `state.options` are set.
/// Postconditions: artifacts for all passes in `required_passes(terminal)` are
///   populated for every stage without errors, or `state.has_error` is true.
/// Failure modes: any pass producing error-level diagnostics.
/// Side effects: calls `on_pass_complete` after each pass for immediate
///   diagnostic display.
pub fn run_pipeline_with_oracle(
    state: &mut CompilationState,
    terminal: PassId,
    oracle: &dyn WcpgOracle,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let passes = required_passes(terminal);

    // Resolve: file-level
    let t = Instant::now();
    let result = crate::resolve::resolve(&state.file, &state.options.stage_defaults());
    let elapsed = t.elapsed();
    state.stages = result.stages.into_iter().map(StageArtifacts::new).collect();
    if finish_pass_core(
        &mut state.diagnostics,
        PassId::Resolve,
        None,
        result.diagnostics,
        elapsed,
        verbose,
        &mut on_pass_complete,
    )
    .is_err()
    {
        // Stages that resolved cleanly still run.
        state.has_error = true;
    }

    let mut first_failure = state.has_error.then_some(PassId::Resolve);
    let mut runner = StageRunner {
        passes: &passes,
        options: &state.options,
        oracle,
        verbose,
        diagnostics: &mut state.diagnostics,
        on_pass_complete: &mut on_pass_complete,
    };
    for artifacts in &mut state.stages {
        runner.run(artifacts);
        if let Some(pass) = artifacts.failed_pass {
            state.has_error = true;
            first_failure.get_or_insert(pass);
        }
    }

    if passes.contains(&PassId::Report) {
        state.report = Some(Report::new(
            state
                .stages
                .iter()
                .filter_map(|s| s.report.clone())
                .collect(),
        ));
    }

    match first_failure {
        Some(failing_pass) => Err(PipelineError { failing_pass }),
        None => Ok(()),
    }
}

// ── Per-stage passes ───────────────────────────────────────────────────────

struct StageRunner<'a, F: FnMut(PassId, &[Diagnostic])> {
    passes: &'a [PassId],
    options: &'a GenOptions,
    oracle: &'a dyn WcpgOracle,
    verbose: bool,
    diagnostics: &'a mut Vec<Diagnostic>,
    on_pass_complete: &'a mut F,
}

impl<F: FnMut(PassId, &[Diagnostic])> StageRunner<'_, F> {
    fn wants(&self, pass: PassId) -> bool {
        self.passes.contains(&pass)
    }

    fn finish(
        &mut self,
        art: &mut StageArtifacts,
        pass: PassId,
        diags: Vec<Diagnostic>,
        elapsed: Duration,
    ) -> bool {
        let ok = finish_pass_core(
            &mut *self.diagnostics,
            pass,
            Some(&art.spec.name),
            diags,
            elapsed,
            self.verbose,
            &mut *self.on_pass_complete,
        )
        .is_ok();
        if !ok {
            art.failed_pass = Some(pass);
        }
        ok
    }

    /// Run a fallible pass; `None` stops the stage.
    fn step<T>(
        &mut self,
        art: &mut StageArtifacts,
        pass: PassId,
        run: impl FnOnce(&StageSpec) -> Result<T, Diagnostic>,
    ) -> Option<T> {
        let t = Instant::now();
        let result = run(&art.spec);
        let elapsed = t.elapsed();
        match result {
            Ok(value) => {
                self.finish(art, pass, Vec::new(), elapsed);
                Some(value)
            }
            Err(diag) => {
                self.finish(art, pass, vec![diag], elapsed);
                None
            }
        }
    }

    fn run(&mut self, art: &mut StageArtifacts) {
        if !self.wants(PassId::Quantize) {
            return;
        }
        let Some(multipliers) = self.step(art, PassId::Quantize, stage::quantize_taps) else {
            return;
        };
        art.multipliers = Some(multipliers.clone());

        if !self.wants(PassId::Synthesize) {
            return;
        }
        let Some(products) = self.step(art, PassId::Synthesize, |spec| {
            stage::synthesize_products(spec, &multipliers)
        }) else {
            return;
        };
        art.products = Some(products.clone());

        if !self.wants(PassId::BuildTree) {
            return;
        }
        let Some(tree) = self.step(art, PassId::BuildTree, |spec| {
            tree::build_tree(spec, &products).map_err(|e| e.to_diagnostic(spec))
        }) else {
            return;
        };
        art.tree = Some(tree.clone());

        if !self.wants(PassId::InferWidths) {
            return;
        }
        let t = Instant::now();
        let result = width_infer::infer_widths(&art.spec, &products, &tree);
        let elapsed = t.elapsed();
        let fixed = match result {
            Ok(fixed) => {
                let warnings: Vec<Diagnostic> = fixed
                    .asserted_range
                    .map(|required| width_infer::asserted_range_warning(&art.spec, required))
                    .into_iter()
                    .collect();
                self.finish(art, PassId::InferWidths, warnings, elapsed);
                fixed
            }
            Err(e) => {
                let diag = e.to_diagnostic(&art.spec);
                self.finish(art, PassId::InferWidths, vec![diag], elapsed);
                return;
            }
        };
        let stage = Stage {
            spec: art.spec.clone(),
            multipliers,
            products,
            tree,
            fixed,
        };

        if self.wants(PassId::CrossCheck) && self.options.wcpg {
            let t = Instant::now();
            let (check, diags) = match wcpg::cross_check(self.oracle, &stage) {
                Ok(check) => {
                    let diags = wcpg::inconsistency_warning(&stage, &check)
                        .into_iter()
                        .collect();
                    (Some(check), diags)
                }
                Err(e) => (None, vec![e.to_diagnostic(&stage)]),
            };
            let elapsed = t.elapsed();
            art.wcpg = check;
            self.finish(art, PassId::CrossCheck, diags, elapsed);
        }

        if self.wants(PassId::Verify) {
            let t = Instant::now();
            let verification =
                verify::verify_stage_with(&stage, self.options.random_vectors, self.options.seed);
            let diags = verify::verification_diagnostics(&stage, &verification);
            let elapsed = t.elapsed();
            art.verification = Some(verification);
            if !self.finish(art, PassId::Verify, diags, elapsed) {
                art.stage = Some(stage);
                return;
            }
        }

        if self.wants(PassId::Emit) {
            let t = Instant::now();
            let generated = codegen::render(&stage);
            let elapsed = t.elapsed();
            art.generated = Some(generated);
            self.finish(art, PassId::Emit, Vec::new(), elapsed);
        }

        if self.wants(PassId::Report) {
            let t = Instant::now();
            let entry = art
                .verification
                .as_ref()
                .map(|v| report::stage_report(&stage, v, art.wcpg.as_ref()));
            let elapsed = t.elapsed();
            art.report = entry;
            self.finish(art, PassId::Report, Vec::new(), elapsed);
        }

        art.stage = Some(stage);
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::codes;

    const SCENARIO: &str = "stage lgs30 {
    output <16, 2>
    tap v0 = 0.795928955078125 : <16, 1>
    tap v1 = 1.0 : <16, 1>
    tap v2 = 0.023296356201171875 : <16, 1>
    tap v3 = 0.12245845794677734375 : <16, 1>
}
";

    fn state_for(source: &str, options: GenOptions) -> CompilationState {
        let parsed = crate::parser::parse(source);
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
        CompilationState::new(parsed.file.expect("parse failed"), options)
    }

    #[test]
    fn emit_runs_required_passes_in_order() {
        let mut state = state_for(SCENARIO, GenOptions::default());
        let mut seen = Vec::new();
        run_pipeline(&mut state, PassId::Emit, false, |pass, _| seen.push(pass)).unwrap();
        assert_eq!(seen, required_passes(PassId::Emit));
        assert!(!state.has_error);
        let tu = state.translation_unit(&codegen::ALL_BACKENDS);
        assert!(tu.contains("int16_t lgs30_int(int16_t v0, int16_t v1, int16_t v2, int16_t v3) {"));
        assert!(state.report.is_none());
    }

    #[test]
    fn stops_early_for_intermediate_terminal() {
        let mut state = state_for(SCENARIO, GenOptions::default());
        run_pipeline(&mut state, PassId::BuildTree, false, |_, _| {}).unwrap();
        let art = &state.stages[0];
        assert!(art.tree.is_some());
        assert!(art.stage.is_none());
        assert!(art.generated.is_none());
    }

    #[test]
    fn failing_stage_does_not_stop_the_others() {
        let source = format!(
            "{SCENARIO}stage bad {{\n  output <16, 2>\n  register 16\n  tap a = 0.9 : <16, 1>\n  tap b = 0.9 : <16, 1>\n}}\n"
        );
        let mut state = state_for(&source, GenOptions::default());
        let err = run_pipeline(&mut state, PassId::Emit, false, |_, _| {}).unwrap_err();
        assert_eq!(err.failing_pass, PassId::BuildTree);
        assert!(state.has_error);
        assert_eq!(state.stages[1].failed_pass, Some(PassId::BuildTree));
        assert!(state.stages[1].generated.is_none());
        assert!(state.stages[0].generated.is_some());
        assert!(state
            .diagnostics
            .iter()
            .any(|d| d.code == Some(codes::E0301)));
    }

    #[test]
    fn resolve_errors_are_reported() {
        let mut state = state_for("stage s {\n  tap a = 0.5 : <16, 1>\n}", GenOptions::default());
        let err = run_pipeline(&mut state, PassId::Emit, false, |_, _| {}).unwrap_err();
        assert_eq!(err.failing_pass, PassId::Resolve);
        assert_eq!(state.diagnostics[0].code, Some(codes::E0104));
    }

    #[test]
    fn report_includes_wcpg_when_enabled() {
        let options = GenOptions {
            wcpg: true,
            ..GenOptions::default()
        };
        let mut state = state_for(SCENARIO, options);
        run_pipeline_with_oracle(
            &mut state,
            PassId::Report,
            &wcpg::MemorylessOracle,
            false,
            |_, _| {},
        )
        .unwrap();
        let report = state.report.as_ref().unwrap();
        assert_eq!(report.stages.len(), 1);
        assert!(report.stages[0].wcpg.as_ref().unwrap().consistent);
    }

    #[test]
    fn options_are_the_bottom_layer() {
        let options = GenOptions {
            register_width: Some(24),
            policy: Some(NormalizationPolicy::Halve),
            ..GenOptions::default()
        };
        let defaults = options.stage_defaults();
        assert_eq!(defaults.register_width, 24);
        assert_eq!(defaults.policy, NormalizationPolicy::Halve);
        assert_eq!(defaults.mantissa_bits, stage::DEFAULT_MANTISSA_BITS);
    }

    #[test]
    fn provenance_tracks_source_and_options() {
        let a = compute_provenance("x", &GenOptions::default());
        let b = compute_provenance("y", &GenOptions::default());
        let c = compute_provenance(
            "x",
            &GenOptions {
                seed: 1,
                ..GenOptions::default()
            },
        );
        assert_ne!(a.source_hash, b.source_hash);
        assert_eq!(a.options_fingerprint, b.options_fingerprint);
        assert_ne!(a.options_fingerprint, c.options_fingerprint);
        assert_eq!(a.source_hash_hex().len(), 64);
        assert!(a.to_json().contains("\"generator_version\""));
    }
}

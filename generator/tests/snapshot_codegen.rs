// Snapshot tests: lock generated C output to detect unintended behavior changes.
//
// Uses the library API (parse → pipeline up to emit) directly on the demo
// stage files under `stages/`. Snapshots are managed by `insta` and stored
// under `generator/tests/snapshots/`.
//
// Run `cargo insta review` after intentional output changes to update baselines.

use std::path::{Path, PathBuf};

use sopgen::codegen::Backend;
use sopgen::diag::DiagLevel;
use sopgen::pass::PassId;
use sopgen::pipeline::{run_pipeline, CompilationState, GenOptions};

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

/// Run the pipeline up to emit on `.sop` source and return the translation unit.
fn generate(source: &str, backends: &[Backend]) -> String {
    let parse_result = sopgen::parser::parse(source);
    assert!(
        parse_result.errors.is_empty(),
        "parse errors: {:?}",
        parse_result.errors
    );
    let mut state = CompilationState::new(parse_result.file.unwrap(), GenOptions::default());
    let result = run_pipeline(&mut state, PassId::Emit, false, |_, _| {});
    assert!(
        result.is_ok(),
        "generation errors: {:?}",
        state
            .diagnostics
            .iter()
            .filter(|d| d.level == DiagLevel::Error)
            .collect::<Vec<_>>()
    );
    state.translation_unit(backends)
}

fn snapshot_stage_file(name: &str, backend: Backend, suffix: &str) {
    let path = project_root().join("stages").join(name);
    let source = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("cannot read {}: {}", path.display(), e));
    let code = generate(&source, &[backend]);
    assert!(!code.is_empty(), "empty output for {}", name);
    let snap_name = format!("{}_{}", name.replace('.', "_"), suffix);
    insta::assert_snapshot!(snap_name, code);
}

// ── Per-file snapshot tests ─────────────────────────────────────────────────

#[test]
fn snapshot_scenario_int() {
    snapshot_stage_file("scenario.sop", Backend::Int, "int");
}

#[test]
fn snapshot_mixed_float() {
    snapshot_stage_file("mixed.sop", Backend::Float, "float");
}

// ── Structural checks on the ac_fixed backend ───────────────────────────────

#[test]
fn scenario_ac_fixed_declares_every_node() {
    let source = std::fs::read_to_string(project_root().join("stages/scenario.sop")).unwrap();
    let code = generate(&source, &[Backend::Fixed]);
    assert!(code.contains("lgs30_ac_fixed("));
    for t in 0..7 {
        assert!(
            code.contains(&format!(" t{t} = ")),
            "node t{t} missing from:\n{code}"
        );
    }
    for c in 0..4 {
        assert!(code.contains(&format!(" c{c} = ")));
    }
    assert!(code.contains("ac_fixed<16,2,true,AC_TRN>"));
    assert!(code.contains("return ac_fixed<16,2,true,AC_TRN>(t6);"));
}

#[test]
fn wrap_file_uses_explicit_wrap_macro() {
    let source = std::fs::read_to_string(project_root().join("stages/wrap.sop")).unwrap();
    let code = generate(&source, &[Backend::Int]);
    assert!(code.contains("    const int64_t t2 = SOP_WRAP(t0, 16) + SOP_WRAP(t1, 16);\n"));
    assert!(code.contains("    return (int16_t)SOP_WRAP(t2 >> 1, 15);\n"));
}

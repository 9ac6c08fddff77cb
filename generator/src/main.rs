use clap::Parser;
use std::path::{Path, PathBuf};

use sopgen::codegen::{Backend, ALL_BACKENDS};
use sopgen::diag::{line_col, Diagnostic};
use sopgen::pass::PassId;
use sopgen::pipeline::{self, CompilationState, GenOptions};
use sopgen::tree::NormalizationPolicy;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitTarget {
    /// All three implementations in one translation unit
    All,
    Float,
    Int,
    AcFixed,
    /// Graphviz DOT of the accumulation trees
    Dot,
    /// JSON verification report
    Report,
    /// JSON provenance (source hash, options fingerprint, version)
    BuildInfo,
    Ast,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum PolicyArg {
    Strict,
    Halve,
    Wrap,
}

impl From<PolicyArg> for NormalizationPolicy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::Strict => NormalizationPolicy::Strict,
            PolicyArg::Halve => NormalizationPolicy::Halve,
            PolicyArg::Wrap => NormalizationPolicy::Wrap,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "sopgen",
    version,
    about = "Sum-of-Products stage generator — emits float, integer-shift and ac_fixed implementations of .sop stage descriptions"
)]
struct Cli {
    /// Input .sop stage description
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output kind
    #[arg(long, value_enum, default_value_t = EmitTarget::All)]
    emit: EmitTarget,

    /// Default accumulator register width in bits
    #[arg(long, value_parser = clap::value_parser!(u32).range(
        sopgen::resolve::MIN_REGISTER_WIDTH as i64..=sopgen::resolve::MAX_REGISTER_WIDTH as i64
    ))]
    register_width: Option<u32>,

    /// Default signed mantissa budget per coefficient
    #[arg(long, value_parser = clap::value_parser!(u32).range(
        sopgen::quantize::MIN_MANTISSA_BITS as i64..=sopgen::quantize::MAX_MANTISSA_BITS as i64
    ))]
    mantissa: Option<u32>,

    /// Default normalization policy for sums that overflow their register
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Default guard bits above the output fraction (ceil(log2 taps) when omitted)
    #[arg(long, value_parser = clap::value_parser!(u32).range(
        0..=sopgen::resolve::MAX_GUARD_BITS as i64
    ))]
    guard: Option<u32>,

    /// Cross-check output ranges with the worst-case peak gain
    #[arg(long)]
    wcpg: bool,

    /// Pseudo-random vectors simulated per stage
    #[arg(long, default_value_t = sopgen::verify::RANDOM_VECTORS)]
    vectors: usize,

    /// Seed of the pseudo-random vectors
    #[arg(long, default_value_t = sopgen::verify::VECTOR_SEED)]
    seed: u64,

    /// Print generator phases and timing
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn options(&self) -> GenOptions {
        GenOptions {
            register_width: self.register_width,
            mantissa_bits: self.mantissa,
            guard_bits: self.guard,
            policy: self.policy.map(NormalizationPolicy::from),
            wcpg: self.wcpg,
            random_vectors: self.vectors,
            seed: self.seed,
        }
    }
}

fn print_diagnostic(path: &Path, source: &str, diag: &Diagnostic) {
    let (line, col) = line_col(source, diag.span.start);
    eprintln!("{}:{}:{}: {}", path.display(), line, col, diag);
    for related in &diag.related_spans {
        let (line, col) = line_col(source, related.span.start);
        eprintln!(
            "  {}:{}:{}: note: {}",
            path.display(),
            line,
            col,
            related.label
        );
    }
}

fn write_output(cli: &Cli, text: &str) {
    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("sopgen: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
            if cli.verbose {
                eprintln!("sopgen: wrote {}", path.display());
            }
        }
        None => print!("{text}"),
    }
}

fn main() {
    let cli = Cli::parse();
    let options = cli.options();

    if cli.verbose {
        eprintln!("sopgen: source = {}", cli.source.display());
        if let Some(output) = &cli.output {
            eprintln!("sopgen: output = {}", output.display());
        }
        eprintln!("sopgen: emit   = {:?}", cli.emit);
    }

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("sopgen: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let parse_result = sopgen::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        for err in &parse_result.errors {
            let (line, col) = line_col(&source, err.span().start);
            eprintln!(
                "{}:{}:{}: error[E0001]: {}",
                cli.source.display(),
                line,
                col,
                err
            );
        }
        std::process::exit(1);
    }
    let file = match parse_result.file {
        Some(f) => f,
        None => {
            eprintln!("sopgen: parse failed with no output");
            std::process::exit(1);
        }
    };

    if cli.verbose {
        eprintln!("sopgen: parsed {} items", file.items.len());
    }

    let text = match cli.emit {
        EmitTarget::Ast => format!("{:#?}\n", file),
        EmitTarget::BuildInfo => pipeline::compute_provenance(&source, &options).to_json(),
        target => generate(&cli, &source, file, options, target),
    };
    write_output(&cli, &text);
}

/// Run the pipeline up to what `target` needs and render it. Exits on errors.
fn generate(
    cli: &Cli,
    source: &str,
    file: sopgen::ast::SourceFile,
    options: GenOptions,
    target: EmitTarget,
) -> String {
    let terminal = match target {
        EmitTarget::Dot => PassId::InferWidths,
        EmitTarget::Report => PassId::Report,
        _ => PassId::Emit,
    };

    let provenance = pipeline::compute_provenance(source, &options);
    let mut state = CompilationState::new(file, options);
    state.provenance = Some(provenance);
    let result = pipeline::run_pipeline(&mut state, terminal, cli.verbose, |_, diags| {
        for diag in diags {
            print_diagnostic(&cli.source, source, diag);
        }
    });
    if let Err(e) = result {
        if cli.verbose {
            eprintln!(
                "sopgen: generation failed (first failing pass: {})",
                sopgen::pass::descriptor(e.failing_pass).name
            );
        }
        std::process::exit(1);
    }

    match target {
        EmitTarget::Float => state.translation_unit(&[Backend::Float]),
        EmitTarget::Int => state.translation_unit(&[Backend::Int]),
        EmitTarget::AcFixed => state.translation_unit(&[Backend::Fixed]),
        EmitTarget::Dot => sopgen::dot::emit_dot(state.synthesized()),
        EmitTarget::Report => match state.report.as_ref().map(|r| r.to_json()) {
            Some(Ok(json)) => json,
            Some(Err(e)) => {
                eprintln!("sopgen: error: report serialization failed: {}", e);
                std::process::exit(1);
            }
            None => {
                eprintln!("sopgen: error: no report produced");
                std::process::exit(1);
            }
        },
        _ => state.translation_unit(&ALL_BACKENDS),
    }
}

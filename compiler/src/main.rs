use clap::Parser;
use std::path::PathBuf;

use kpc::codegen::CodegenOptions;
use kpc::pass::{descriptor, PassId};
use kpc::pipeline::{compute_provenance, run_pipeline, CompilationState};

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Source,
    Physical,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "kpc",
    version,
    about = "Kernel Probe Compiler — compiles logical trace specifications to BCC probe source"
)]
struct Cli {
    /// Input logical program (JSON)
    source: PathBuf,

    /// Output file path ("-" for stdout)
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Source)]
    emit: EmitStage,

    /// Struct-field indentation width in the generated source
    #[arg(long, default_value_t = 2)]
    indent: usize,

    /// Print compiler passes and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("kpc: source = {}", cli.source.display());
        eprintln!("kpc: output = {}", cli.output.display());
        eprintln!("kpc: emit   = {:?}", cli.emit);
    }

    // ── Read and deserialize the logical program ──
    let source_text = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("kpc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let program: kpc::logical::Program = match serde_json::from_str(&source_text) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("kpc: parse error: {}", e);
            std::process::exit(1);
        }
    };

    if cli.verbose {
        eprintln!(
            "kpc: parsed program `{}` with {} outputs, {} probes",
            program.name,
            program.outputs.len(),
            program.probes.len()
        );
    }

    let provenance = compute_provenance(&source_text);

    if matches!(cli.emit, EmitStage::BuildInfo) {
        write_output(&cli.output, &provenance.to_json());
        return;
    }

    // ── Run the pipeline ──
    let terminal = match cli.emit {
        EmitStage::Physical => PassId::Verify,
        EmitStage::Source | EmitStage::BuildInfo => PassId::Codegen,
    };
    let options = CodegenOptions { indent: cli.indent };
    let mut state = CompilationState::new(program);
    state.provenance = Some(provenance);

    let verbose = cli.verbose;
    let mut report = |pass: PassId, elapsed: std::time::Duration| {
        if verbose {
            eprintln!("kpc: pass {} ({:.1?})", descriptor(pass).name, elapsed);
        }
    };
    if let Err(e) = run_pipeline(&mut state, terminal, &options, Some(&mut report)) {
        eprintln!("kpc: {}", e);
        std::process::exit(1);
    }

    // ── Emit ──
    match cli.emit {
        EmitStage::Source => {
            let generated = state.generated.expect("codegen artifact populated");
            write_output(&cli.output, &generated.text);
        }
        EmitStage::Physical => {
            let physical = state.physical.expect("transform artifact populated");
            let mut json = match serde_json::to_string_pretty(&physical) {
                Ok(j) => j,
                Err(e) => {
                    eprintln!("kpc: error: {}", e);
                    std::process::exit(2);
                }
            };
            json.push('\n');
            write_output(&cli.output, &json);
        }
        EmitStage::BuildInfo => unreachable!("handled before the pipeline"),
    }
}

fn write_output(path: &PathBuf, text: &str) {
    if path.as_os_str() == "-" {
        print!("{}", text);
        return;
    }
    if let Err(e) = std::fs::write(path, text) {
        eprintln!("kpc: error: {}: {}", path.display(), e);
        std::process::exit(2);
    }
}

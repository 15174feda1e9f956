// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId. Also computes compile provenance (source hash plus
// vocabulary fingerprint) for hermetic-build auditing.
//
// Preconditions: the logical program must be set before calling run_pipeline.
// Postconditions: all artifacts for required passes are populated, or a
//   CompileError is returned and no partial source is exposed.
// Failure modes: any pass returning a CompileError; a failed verification
//   obligation is reported as a compiler defect.
// Side effects: calls on_pass_complete callback after each pass for
//   immediate display.

use std::time::{Duration, Instant};

use crate::assemble::assemble_program;
use crate::codegen::CodegenOptions;
use crate::diag::{codes, CompileError, Stage};
use crate::logical;
use crate::pass::{required_passes, PassId};
use crate::physical;
use crate::transform::{transform, verify_obligations, Cert};
use crate::types::canonical_vocabulary;

// ── Artifact storage ───────────────────────────────────────────────────────

/// Generated source for one compiled unit: the ordered line sequence and the
/// joined text handed to the load/lifecycle collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSource {
    pub lines: Vec<String>,
    pub text: String,
}

impl GeneratedSource {
    fn from_lines(lines: Vec<String>) -> Self {
        let mut text = lines.join("\n");
        text.push('\n');
        Self { lines, text }
    }
}

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw logical-program JSON text.
/// `vocabulary_fingerprint`: SHA-256 of `canonical_vocabulary()`, so a policy
/// table change shows up as a new fingerprint.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub vocabulary_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the vocabulary fingerprint (64 characters).
    pub fn vocabulary_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.vocabulary_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"vocabulary_fingerprint\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.vocabulary_fingerprint_hex(),
            self.compiler_version,
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

/// Compute provenance from the submitted JSON text.
pub fn compute_provenance(source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let source_hash = {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    };

    let vocabulary_fingerprint = {
        let mut hasher = Sha256::new();
        hasher.update(canonical_vocabulary().as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    };

    Provenance {
        source_hash,
        vocabulary_fingerprint,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

/// Holds the input program and all compilation artifacts.
pub struct CompilationState {
    pub logical: logical::Program,
    pub physical: Option<physical::Program>,
    pub cert: Option<Cert>,
    pub generated: Option<GeneratedSource>,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(logical: logical::Program) -> Self {
        Self {
            logical,
            physical: None,
            cert: None,
            generated: None,
            provenance: None,
        }
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal pass subset producing `terminal`'s artifacts.
///
/// `on_pass_complete` is invoked after each pass with its id and elapsed
/// wall time — display only; nothing timing-dependent reaches an artifact.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &CodegenOptions,
    mut on_pass_complete: Option<&mut dyn FnMut(PassId, Duration)>,
) -> Result<(), CompileError> {
    for pass in required_passes(terminal) {
        let started = Instant::now();
        run_pass(state, pass, options)?;
        if let Some(callback) = on_pass_complete.as_deref_mut() {
            callback(pass, started.elapsed());
        }
    }
    Ok(())
}

fn run_pass(
    state: &mut CompilationState,
    pass: PassId,
    options: &CodegenOptions,
) -> Result<(), CompileError> {
    match pass {
        PassId::Transform => {
            state.physical = Some(transform(&state.logical)?);
        }
        PassId::Verify => {
            let physical = state.physical.as_ref().expect("transform ran first");
            let cert = verify_obligations(physical);
            if !cert.all_pass() {
                // The transformer constructed something its own obligations
                // reject; surface it as a compiler defect, not operator error.
                return Err(CompileError::new(
                    codes::VERIFY_FAILED,
                    Stage::Transform,
                    format!("verification obligations failed: {:?}", cert),
                ));
            }
            state.cert = Some(cert);
        }
        PassId::Codegen => {
            let physical = state.physical.as_ref().expect("transform ran first");
            let lines = assemble_program(physical, options)?;
            state.generated = Some(GeneratedSource::from_lines(lines));
        }
    }
    Ok(())
}

/// Compile a logical program to its assembled source in one call.
///
/// The convenience wrapper the library's embedders and tests use; equivalent
/// to running the full pipeline with no callbacks.
pub fn compile_program(
    program: &logical::Program,
    options: &CodegenOptions,
) -> Result<GeneratedSource, CompileError> {
    let mut state = CompilationState::new(program.clone());
    run_pipeline(&mut state, PassId::Codegen, options, None)?;
    Ok(state.generated.expect("codegen pass populated artifact"))
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical::{Argument, ExecModel, OutputField, OutputSchema, ProbeOutput, TracePoint};
    use crate::types::{Register, ScalarType, VariableSource};

    fn small_program() -> logical::Program {
        logical::Program {
            name: "demo".to_string(),
            outputs: vec![OutputSchema {
                name: "events".to_string(),
                fields: vec![OutputField {
                    name: "fd".to_string(),
                    ty: ScalarType::Int32,
                }],
            }],
            probes: vec![logical::Probe {
                name: "read".to_string(),
                trace_point: TracePoint {
                    symbol: "ssl_read".to_string(),
                    exec_model: ExecModel::Native,
                },
                args: vec![Argument {
                    name: "fd".to_string(),
                    ty: ScalarType::Int32,
                    source: VariableSource::Register(Register::Parm1),
                }],
                ret: None,
                latency: None,
                output_action: ProbeOutput {
                    output_name: "events".to_string(),
                    variable_names: vec!["fd".to_string()],
                },
            }],
        }
    }

    #[test]
    fn terminal_transform_skips_codegen() {
        let mut state = CompilationState::new(small_program());
        run_pipeline(
            &mut state,
            PassId::Transform,
            &CodegenOptions::default(),
            None,
        )
        .unwrap();
        assert!(state.physical.is_some());
        assert!(state.generated.is_none());
    }

    #[test]
    fn full_pipeline_populates_generated_source() {
        let mut state = CompilationState::new(small_program());
        let mut seen = Vec::new();
        let mut callback = |pass: PassId, _elapsed: Duration| seen.push(pass);
        run_pipeline(
            &mut state,
            PassId::Codegen,
            &CodegenOptions::default(),
            Some(&mut callback),
        )
        .unwrap();
        assert_eq!(seen, vec![PassId::Transform, PassId::Verify, PassId::Codegen]);
        let generated = state.generated.unwrap();
        assert!(generated.text.ends_with('\n'));
        assert!(generated
            .lines
            .contains(&"int read_entry(struct pt_regs* ctx) {".to_string()));
    }

    #[test]
    fn compile_program_is_deterministic() {
        let program = small_program();
        let options = CodegenOptions::default();
        let first = compile_program(&program, &options).unwrap();
        let second = compile_program(&program, &options).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn provenance_hashes_are_stable_and_input_sensitive() {
        let a = compute_provenance("{\"name\":\"x\"}");
        let b = compute_provenance("{\"name\":\"x\"}");
        let c = compute_provenance("{\"name\":\"y\"}");
        assert_eq!(a.source_hash, b.source_hash);
        assert_ne!(a.source_hash, c.source_hash);
        assert_eq!(a.vocabulary_fingerprint, c.vocabulary_fingerprint);
        assert_eq!(a.source_hash_hex().len(), 64);
    }
}

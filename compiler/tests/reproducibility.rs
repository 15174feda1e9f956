// Reproducibility tests for hermetic builds.
//
// These tests verify that the compiler produces byte-identical outputs for
// identical inputs, through the real binary rather than the library API.

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

fn kpc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_kpc"))
}

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn temp_program(json: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!("kpc_repro_{}_{}.json", std::process::id(), n));
    std::fs::write(&path, json).expect("failed to write temp program");
    path
}

fn run_kpc(args: &[&str]) -> String {
    let output = Command::new(kpc_binary())
        .args(args)
        .output()
        .expect("failed to run kpc");
    assert!(
        output.status.success(),
        "kpc failed with args {:?}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("non-UTF8 output")
}

const LATENCY_PROGRAM: &str = r#"{
    "name": "demo",
    "outputs": [
        {
            "name": "events",
            "fields": [
                {"name": "fd", "type": "INT32"},
                {"name": "retval", "type": "INT64"},
                {"name": "latency_ns", "type": "UINT64"}
            ]
        }
    ],
    "probes": [
        {
            "name": "read",
            "trace_point": {"symbol": "ssl_read", "exec_model": "NATIVE"},
            "args": [
                {"name": "fd", "type": "INT32", "source": {"register": "PARM1"}}
            ],
            "ret": {"name": "retval", "type": "INT64"},
            "latency": {"name": "latency_ns"},
            "output_action": {
                "output_name": "events",
                "variable_names": ["fd", "retval", "latency_ns"]
            }
        }
    ]
}"#;

/// Compiling the same program twice produces byte-identical source.
#[test]
fn same_input_identical_source() {
    let program = temp_program(LATENCY_PROGRAM);
    let path = program.to_str().unwrap();

    let first = run_kpc(&["--emit", "source", path]);
    let second = run_kpc(&["--emit", "source", path]);

    assert_eq!(
        first, second,
        "probe source should be byte-identical across runs"
    );
    assert!(first.contains("int read_entry(struct pt_regs* ctx) {"));
    assert!(first.contains("int read_return(struct pt_regs* ctx) {"));
}

/// The physical IR dump is deterministic as well.
#[test]
fn same_input_identical_physical_dump() {
    let program = temp_program(LATENCY_PROGRAM);
    let path = program.to_str().unwrap();

    let first = run_kpc(&["--emit", "physical", path]);
    let second = run_kpc(&["--emit", "physical", path]);

    assert_eq!(first, second);
    assert!(first.contains("\"read_stash\""));
}

/// Build-info carries stable hashes for identical inputs.
#[test]
fn same_input_identical_build_info() {
    let program = temp_program(LATENCY_PROGRAM);
    let path = program.to_str().unwrap();

    let first = run_kpc(&["--emit", "build-info", path]);
    let second = run_kpc(&["--emit", "build-info", path]);

    assert_eq!(first, second);
    assert!(first.contains("\"source_hash\""));
    assert!(first.contains("\"vocabulary_fingerprint\""));
}

/// A one-byte change to the input changes the source hash.
#[test]
fn different_input_different_source_hash() {
    let a = temp_program(LATENCY_PROGRAM);
    let b = temp_program(&LATENCY_PROGRAM.replace("ssl_read", "ssl_write"));

    let info_a = run_kpc(&["--emit", "build-info", a.to_str().unwrap()]);
    let info_b = run_kpc(&["--emit", "build-info", b.to_str().unwrap()]);

    assert_ne!(info_a, info_b);
}

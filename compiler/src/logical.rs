// logical.rs — Operator-facing logical IR
//
// The declarative tracing intent submitted by the authoring collaborator as a
// JSON document: what function to intercept, what to capture, and the shape
// of the output record. Authored once per tracing session, submitted whole,
// consumed exactly once by the transformer, never mutated after submission.
//
// Preconditions: deserialized from the authoring collaborator's JSON.
// Postconditions: plain data; all semantic validation happens in `transform`.
// Failure modes: none (malformed JSON is rejected by serde before this IR
//                exists; malformed semantics are rejected by the transformer).
// Side effects: none.

use serde::{Deserialize, Serialize};

use crate::types::{ScalarType, VariableSource};

// ── Program ─────────────────────────────────────────────────────────────────

/// A complete logical program: output record schemas plus named probes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    #[serde(default)]
    pub outputs: Vec<OutputSchema>,
    #[serde(default)]
    pub probes: Vec<Probe>,
}

/// An output record shape declared by the table/storage collaborator.
/// Field names, order, and types are binding: the assembled record must
/// match them exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub fields: Vec<OutputField>,
}

/// One field of an output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputField {
    pub name: String,
    #[serde(rename = "type", default)]
    pub ty: ScalarType,
}

// ── Probe ───────────────────────────────────────────────────────────────────

/// Execution model of the traced target; selects the per-invocation
/// correlation key builtin for entry/return pairing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecModel {
    #[default]
    Unknown,
    Native,
    Golang,
}

/// The concrete attach-point identity, supplied by the symbol-resolution
/// collaborator. The compiler treats `symbol` as an opaque string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracePoint {
    pub symbol: String,
    #[serde(default)]
    pub exec_model: ExecModel,
}

/// One operator-authored probe declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub name: String,
    pub trace_point: TracePoint,
    #[serde(default)]
    pub args: Vec<Argument>,
    #[serde(default)]
    pub ret: Option<ReturnValue>,
    #[serde(default)]
    pub latency: Option<Latency>,
    pub output_action: ProbeOutput,
}

/// An argument captured at function entry. The source must be one of the
/// operator-level variants (register, memory, builtin); a memory source's
/// base must name an argument declared earlier in the same probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    #[serde(rename = "type", default)]
    pub ty: ScalarType,
    pub source: VariableSource,
}

/// The traced function's return value, read through the platform's
/// return-register convention. Only captured when the output references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnValue {
    pub name: String,
    #[serde(rename = "type", default)]
    pub ty: ScalarType,
}

/// Entry-to-return elapsed time in nanoseconds (`UINT64`). Only captured
/// when the output references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Latency {
    pub name: String,
}

/// The probe's output request: which declared schema to fill, and which
/// captured variables supply its fields, positionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutput {
    pub output_name: String,
    pub variable_names: Vec<String>,
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Register;

    #[test]
    fn program_deserializes_from_wire_json() {
        let json = r#"{
            "name": "demo",
            "outputs": [
                {"name": "events", "fields": [{"name": "fd", "type": "INT32"}]}
            ],
            "probes": [
                {
                    "name": "read",
                    "trace_point": {"symbol": "ssl_read", "exec_model": "NATIVE"},
                    "args": [
                        {"name": "fd", "type": "INT32", "source": {"register": "PARM1"}}
                    ],
                    "output_action": {"output_name": "events", "variable_names": ["fd"]}
                }
            ]
        }"#;
        let program: Program = serde_json::from_str(json).unwrap();
        assert_eq!(program.probes.len(), 1);
        let probe = &program.probes[0];
        assert_eq!(probe.trace_point.exec_model, ExecModel::Native);
        assert_eq!(
            probe.args[0].source,
            VariableSource::Register(Register::Parm1)
        );
        assert!(probe.ret.is_none());
    }

    #[test]
    fn omitted_exec_model_defaults_to_unknown() {
        let json = r#"{"symbol": "f"}"#;
        let tp: TracePoint = serde_json::from_str(json).unwrap();
        assert_eq!(tp.exec_model, ExecModel::Unknown);
    }

    #[test]
    fn omitted_arg_type_defaults_to_unknown() {
        let json = r#"{"name": "x", "source": {"register": "SP"}}"#;
        let arg: Argument = serde_json::from_str(json).unwrap();
        assert_eq!(arg.ty, ScalarType::Unknown);
    }
}

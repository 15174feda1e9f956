// physical.rs — Physical probe IR
//
// One physical probe per attach point (function entry or return), with fully
// resolved structs, variables, and actions. Declaration order inside each
// list is generation order — never reordered, never deduplicated within a
// probe. Produced by the transformer, consumed by the code generator and the
// assembler; also serializable for `--emit physical`.
//
// Preconditions: produced by `transform` (or deserialized for inspection).
// Postconditions: plain data; well-formedness is checked by
//                 `transform::verify_obligations` and re-checked at the
//                 points the generator must consult a definition.
// Failure modes: none (data-only module).
// Side effects: none.

use serde::{Deserialize, Serialize};

use crate::types::{ScalarType, Struct, VariableSource, VariableType};

// ── Variables ───────────────────────────────────────────────────────────────

/// A scalar variable: unique name within its probe, declared type, and
/// exactly one value source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarVariable {
    pub name: String,
    #[serde(rename = "type", default)]
    pub ty: ScalarType,
    pub source: VariableSource,
}

/// Positional binding of previously declared scalar variables into a
/// struct's fields: the Nth member name supplies the Nth field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructVariable {
    pub name: String,
    pub struct_name: String,
    pub variable_names: Vec<String>,
}

// ── Actions ─────────────────────────────────────────────────────────────────

/// Persist a (key, value) pair of declared variables into a named keyed map,
/// passing state between disjoint probe invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapStashAction {
    pub map_name: String,
    pub key_variable_name: String,
    pub value_variable_name: String,
}

/// Remove a stashed entry after the paired return probe has read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDeleteAction {
    pub map_name: String,
    pub key_variable_name: String,
}

/// Emit a declared variable's full value through a named streaming channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputAction {
    pub perf_buffer_name: String,
    pub variable_name: String,
}

// ── Probe ───────────────────────────────────────────────────────────────────

/// One compiled attach-point unit. Compiles to exactly one generated
/// function body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub name: String,
    #[serde(default)]
    pub structs: Vec<Struct>,
    #[serde(default)]
    pub vars: Vec<ScalarVariable>,
    #[serde(default)]
    pub st_vars: Vec<StructVariable>,
    #[serde(default)]
    pub map_stash_actions: Vec<MapStashAction>,
    #[serde(default)]
    pub map_delete_actions: Vec<MapDeleteAction>,
    #[serde(default)]
    pub output_actions: Vec<OutputAction>,
}

impl Probe {
    /// Find a struct declared in this probe's struct list.
    pub fn find_struct(&self, name: &str) -> Option<&Struct> {
        self.structs.iter().find(|st| st.name == name)
    }
}

// ── Program-level declarations ──────────────────────────────────────────────

/// A keyed map shared between probes, declared once per compiled unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDecl {
    pub name: String,
    pub key_type: VariableType,
    pub value_type: VariableType,
}

/// A streaming output channel, declared once per compiled unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfBufferDecl {
    pub name: String,
}

/// All physical probes compiled from one logical program, plus the shared
/// map and channel declarations they reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    #[serde(default)]
    pub maps: Vec<MapDecl>,
    #[serde(default)]
    pub outputs: Vec<PerfBufferDecl>,
    #[serde(default)]
    pub probes: Vec<Probe>,
}

// ── Tests ──────────────────────────────────────────────────────────────────

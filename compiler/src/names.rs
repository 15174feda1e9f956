// names.rs — Deterministic physical-name derivation
//
// Every physical entity name is a pure function of the originating logical
// name plus a role suffix. Two distinct logical probes can therefore never
// produce equal physical names, and repeated compilations of the same
// program always agree.

/// Role a derived physical entity plays for its logical probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    EntryProbe,
    ReturnProbe,
    StashMap,
    OutputChannel,
}

impl Role {
    fn suffix(self) -> &'static str {
        match self {
            Role::EntryProbe => "_entry",
            Role::ReturnProbe => "_return",
            Role::StashMap => "_stash",
            Role::OutputChannel => "_output",
        }
    }
}

/// Derive the physical name for `role` of the logical probe `logical`.
pub fn physical_name(logical: &str, role: Role) -> String {
    format!("{}{}", logical, role.suffix())
}

/// Name of the transit struct stashed between a probe's entry and return.
pub fn stash_struct_name(logical: &str) -> String {
    format!("{}_stash_value_t", logical)
}

/// Name of the record struct assembled for an output schema.
pub fn output_struct_name(output: &str) -> String {
    format!("{}_value_t", output)
}

// ── Synthesized probe-local variable names ──────────────────────────────────

/// Per-invocation correlation key.
pub const STASH_KEY: &str = "stash_key";
/// Transit struct assembled at entry.
pub const STASH_VALUE: &str = "stash_value";
/// Pointer into the stashed entry at return.
pub const STASH_PTR: &str = "stash_ptr";
/// Entry-side timestamp, stashed for latency derivation.
pub const ENTRY_KTIME: &str = "entry_ktime_ns";
/// Return-side timestamp.
pub const RETURN_KTIME: &str = "return_ktime_ns";
/// Assembled output record.
pub const OUTPUT_VALUE: &str = "output_value";

/// Names the transformer synthesizes inside generated probe bodies.
/// Operator-chosen variable names may not shadow them.
pub const RESERVED_VARIABLE_NAMES: [&str; 6] = [
    STASH_KEY,
    STASH_VALUE,
    STASH_PTR,
    ENTRY_KTIME,
    RETURN_KTIME,
    OUTPUT_VALUE,
];

/// True if `name` is reserved for synthesized variables.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_VARIABLE_NAMES.contains(&name)
}

// ── Tests ──────────────────────────────────────────────────────────────────

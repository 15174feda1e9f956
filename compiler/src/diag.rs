// diag.rs — Compile error model
//
// Every compiler stage returns a success-or-typed-failure result; a failure
// carries a stable code, the failing stage, and the probe and entity names
// involved. Compilation is all-or-nothing per logical program — no stage
// substitutes default behavior for malformed input.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Error code ──────────────────────────────────────────────────────────────

/// A stable error code (e.g., `E0102`).
///
/// Codes are `&'static str` constants defined in the `codes` module. Once
/// assigned, a code must never be reassigned to a different semantic meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable code constants.
pub mod codes {
    use super::DiagCode;

    /// Unknown or unset scalar type.
    pub const UNKNOWN_SCALAR_TYPE: DiagCode = DiagCode("E0001");
    /// Undefined struct reference.
    pub const UNDEFINED_STRUCT: DiagCode = DiagCode("E0101");
    /// Struct-variable member count does not match the struct's field count.
    pub const FIELD_COUNT_MISMATCH: DiagCode = DiagCode("E0102");
    /// Reference to a variable not declared earlier in the same probe.
    pub const UNDECLARED_VARIABLE: DiagCode = DiagCode("E0103");
    /// Operator-chosen name collides with a synthesized variable name.
    pub const RESERVED_NAME: DiagCode = DiagCode("E0104");
    /// Operator input uses a transformer-internal variable source.
    pub const INTERNAL_SOURCE: DiagCode = DiagCode("E0105");
    /// Output record shape mismatch (position, count, or type).
    pub const OUTPUT_SHAPE_MISMATCH: DiagCode = DiagCode("E0106");
    /// Reference to an output schema that is not declared in the program.
    pub const UNKNOWN_OUTPUT: DiagCode = DiagCode("E0107");
    /// Duplicate name within one declaration scope.
    pub const DUPLICATE_NAME: DiagCode = DiagCode("E0108");
    /// Variable source not valid where it appears.
    pub const INVALID_SOURCE: DiagCode = DiagCode("E0109");
    /// Return-dependent probe with no resolvable per-invocation key builtin.
    pub const NO_INVOCATION_KEY: DiagCode = DiagCode("E0201");
    /// Two physical entities share a name with differing definitions.
    pub const NAME_COLLISION: DiagCode = DiagCode("E0301");
    /// A post-transform verification obligation failed (compiler defect).
    pub const VERIFY_FAILED: DiagCode = DiagCode("E0401");
}

// ── Stage ───────────────────────────────────────────────────────────────────

/// The compiler stage that rejected the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transform,
    Codegen,
    Assemble,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Transform => "transform",
            Stage::Codegen => "codegen",
            Stage::Assemble => "assemble",
        }
    }
}

// ── Compile error ───────────────────────────────────────────────────────────

/// A fatal compile error: one per failed compilation, identifying the stage,
/// the probe, and the offending entity.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub code: DiagCode,
    pub stage: Stage,
    pub probe: Option<String>,
    pub entity: Option<String>,
    pub message: String,
}

impl CompileError {
    /// Create an error with no probe or entity attribution.
    pub fn new(code: DiagCode, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            code,
            stage,
            probe: None,
            entity: None,
            message: message.into(),
        }
    }

    /// Attach the probe being compiled when the error surfaced.
    pub fn with_probe(mut self, probe: impl Into<String>) -> Self {
        self.probe = Some(probe.into());
        self
    }

    /// Attach the offending variable/struct/map/output name.
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error[{}] at {}", self.code, self.stage.name())?;
        if let Some(probe) = &self.probe {
            write!(f, " in probe `{}`", probe)?;
        }
        if let Some(entity) = &self.entity {
            write!(f, " (`{}`)", entity)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for CompileError {}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_bare() {
        let e = CompileError::new(codes::NAME_COLLISION, Stage::Assemble, "map redefined");
        assert_eq!(format!("{e}"), "error[E0301] at assemble: map redefined");
    }

    #[test]
    fn display_with_probe_and_entity() {
        let e = CompileError::new(
            codes::FIELD_COUNT_MISMATCH,
            Stage::Codegen,
            "2 members bound to 3 fields",
        )
        .with_probe("read_entry")
        .with_entity("event_value");
        assert_eq!(
            format!("{e}"),
            "error[E0102] at codegen in probe `read_entry` (`event_value`): 2 members bound to 3 fields"
        );
    }

    #[test]
    fn builder_chain() {
        let e = CompileError::new(codes::UNDECLARED_VARIABLE, Stage::Transform, "no such arg")
            .with_probe("p")
            .with_entity("retval");
        assert_eq!(e.probe.as_deref(), Some("p"));
        assert_eq!(e.entity.as_deref(), Some("retval"));
    }
}

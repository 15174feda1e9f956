// codegen.rs — Probe source generation
//
// Lowers a fully resolved physical probe into linear, textual BCC probe
// source. Generation order is fixed: structs, function signature, scalar
// variables, struct assemblies, map stashes, map deletes, outputs,
// terminator. Later steps reference only names declared by earlier steps;
// that property is established by the transformer's verification pass, and
// the generator re-checks only what it must consult anyway (struct
// definitions and field counts).
//
// Preconditions: the probe satisfies the V1-V4 obligations.
// Postconditions: returns the probe's source lines, in generation order.
// Failure modes: unknown/unset scalar types, undefined struct references,
//                member-count mismatches, a map lookup with a non-pointer
//                declared type.
// Side effects: none.

use crate::diag::{codes, CompileError, Stage};
use crate::physical::{
    MapDeleteAction, MapStashAction, OutputAction, Probe, ScalarVariable, StructVariable,
};
use crate::types::{ScalarType, Struct, VariableSource};

// ── Options ─────────────────────────────────────────────────────────────────

/// Textual layout knobs. Only struct-field indentation is configurable; the
/// statement vocabulary is fixed by the target toolchain.
#[derive(Debug, Clone)]
pub struct CodegenOptions {
    pub indent: usize,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self { indent: 2 }
    }
}

// ── Struct declarations ─────────────────────────────────────────────────────

/// Render one struct declaration, one field per line, indented `indent`
/// columns.
pub fn gen_struct(st: &Struct, indent: usize) -> Result<Vec<String>, CompileError> {
    let pad = " ".repeat(indent);
    let mut lines = Vec::with_capacity(st.fields.len() + 2);
    lines.push(format!("struct {} {{", st.name));
    for field in &st.fields {
        let spelling = field.ty.native_spelling().ok_or_else(|| {
            CompileError::new(
                codes::UNKNOWN_SCALAR_TYPE,
                Stage::Codegen,
                format!("struct `{}` field has unknown or unset type", st.name),
            )
            .with_entity(&field.name)
        })?;
        lines.push(format!("{}{} {};", pad, spelling, field.name));
    }
    lines.push("};".to_string());
    Ok(lines)
}

// ── Scalar variables ────────────────────────────────────────────────────────

fn scalar_spelling(name: &str, ty: ScalarType) -> Result<&'static str, CompileError> {
    ty.c_spelling().ok_or_else(|| {
        CompileError::new(
            codes::UNKNOWN_SCALAR_TYPE,
            Stage::Codegen,
            "variable has unknown or unset type",
        )
        .with_entity(name)
    })
}

/// Render the statements declaring and initializing one scalar variable.
pub fn gen_scalar_variable(var: &ScalarVariable) -> Result<Vec<String>, CompileError> {
    let ty = scalar_spelling(&var.name, var.ty)?;
    let lines = match &var.source {
        VariableSource::Register(reg) => {
            vec![format!("{} {} = {};", ty, var.name, reg.c_expr())]
        }
        VariableSource::Memory { base, offset } => vec![
            format!("{} {};", ty, var.name),
            format!(
                "bpf_probe_read(&{}, sizeof({}), {} + {});",
                var.name, ty, base, offset
            ),
        ],
        VariableSource::Builtin(builtin) => {
            vec![format!("{} {} = {};", ty, var.name, builtin.c_expr())]
        }
        VariableSource::MapLookup {
            map_name,
            key_variable_name,
        } => {
            if var.ty != ScalarType::VoidPointer {
                return Err(CompileError::new(
                    codes::INVALID_SOURCE,
                    Stage::Codegen,
                    "map lookup must declare a pointer-typed variable",
                )
                .with_entity(&var.name));
            }
            // A missed lookup means no paired entry record; bail out of the
            // invocation rather than emit a half-joined event.
            vec![
                format!(
                    "{} {} = {}.lookup(&{});",
                    ty, var.name, map_name, key_variable_name
                ),
                format!("if ({} == NULL) {{ return 0; }}", var.name),
            ]
        }
        VariableSource::BinaryExpr { op, lhs, rhs } => {
            vec![format!("{} {} = {} {} {};", ty, var.name, lhs, op.c_op(), rhs)]
        }
    };
    Ok(lines)
}

// ── Struct assembly ─────────────────────────────────────────────────────────

/// Render a zero-initialized struct declaration followed by one positional
/// member assignment per field.
pub fn gen_struct_variable(
    st: &Struct,
    st_var: &StructVariable,
) -> Result<Vec<String>, CompileError> {
    if st.fields.len() != st_var.variable_names.len() {
        return Err(CompileError::new(
            codes::FIELD_COUNT_MISMATCH,
            Stage::Codegen,
            format!(
                "{} members bound to struct `{}` with {} fields",
                st_var.variable_names.len(),
                st.name,
                st.fields.len()
            ),
        )
        .with_entity(&st_var.name));
    }
    let mut lines = Vec::with_capacity(st.fields.len() + 1);
    lines.push(format!("struct {} {} = {{}};", st.name, st_var.name));
    for (field, member) in st.fields.iter().zip(&st_var.variable_names) {
        lines.push(format!("{}.{} = {};", st_var.name, field.name, member));
    }
    Ok(lines)
}

// ── Actions ─────────────────────────────────────────────────────────────────

/// Render a map-update call taking addresses of the key and value variables.
pub fn gen_map_stash_action(action: &MapStashAction) -> Vec<String> {
    vec![format!(
        "{}.update(&{}, &{});",
        action.map_name, action.key_variable_name, action.value_variable_name
    )]
}

/// Render a map-delete call releasing a consumed stash entry.
pub fn gen_map_delete_action(action: &MapDeleteAction) -> Vec<String> {
    vec![format!(
        "{}.delete(&{});",
        action.map_name, action.key_variable_name
    )]
}

/// Render a perf-submit call taking the address and size of the variable.
pub fn gen_output_action(action: &OutputAction) -> Vec<String> {
    vec![format!(
        "{}.perf_submit(ctx, &{}, sizeof({}));",
        action.perf_buffer_name, action.variable_name, action.variable_name
    )]
}

// ── Probe function ──────────────────────────────────────────────────────────

/// Render the probe's function body alone — signature through closing brace,
/// without the struct declarations (the assembler hoists those).
pub fn gen_probe_function(probe: &Probe) -> Result<Vec<String>, CompileError> {
    let mut lines = Vec::new();
    lines.push(format!("int {}(struct pt_regs* ctx) {{", probe.name));
    for var in &probe.vars {
        lines.extend(gen_scalar_variable(var).map_err(|e| e.with_probe(&probe.name))?);
    }
    for st_var in &probe.st_vars {
        let st = probe.find_struct(&st_var.struct_name).ok_or_else(|| {
            CompileError::new(
                codes::UNDEFINED_STRUCT,
                Stage::Codegen,
                "struct is not declared in this probe",
            )
            .with_probe(&probe.name)
            .with_entity(&st_var.struct_name)
        })?;
        lines.extend(gen_struct_variable(st, st_var).map_err(|e| e.with_probe(&probe.name))?);
    }
    for action in &probe.map_stash_actions {
        lines.extend(gen_map_stash_action(action));
    }
    for action in &probe.map_delete_actions {
        lines.extend(gen_map_delete_action(action));
    }
    for action in &probe.output_actions {
        lines.extend(gen_output_action(action));
    }
    lines.push("return 0;".to_string());
    lines.push("}".to_string());
    Ok(lines)
}

/// Render one physical probe in full: its struct declarations followed by
/// its function body.
pub fn gen_physical_probe(
    probe: &Probe,
    options: &CodegenOptions,
) -> Result<Vec<String>, CompileError> {
    let mut lines = Vec::new();
    for st in &probe.structs {
        lines.extend(gen_struct(st, options.indent).map_err(|e| e.with_probe(&probe.name))?);
    }
    lines.extend(gen_probe_function(probe)?);
    Ok(lines)
}

// ── Tests ──────────────────────────────────────────────────────────────────

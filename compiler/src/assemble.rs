// assemble.rs — Compiled-unit assembly
//
// Collects the generated source for every physical probe of one program
// into a single compiled unit: preamble, struct declarations, global map
// and perf-channel declarations, then one function per probe. Shared
// declarations are emitted exactly once — dedup is by declared name, first
// occurrence wins, and a name reused with a conflicting definition is fatal.
//
// Preconditions: the physical program satisfies the V1-V4 obligations.
// Postconditions: an ordered sequence of source lines forming a complete,
//   self-contained instrumentation program.
// Failure modes: conflicting redefinitions of a struct, map, or channel;
//   any codegen failure for a member probe.
// Side effects: none.

use std::collections::HashMap;

use crate::codegen::{gen_probe_function, gen_struct, CodegenOptions};
use crate::diag::{codes, CompileError, Stage};
use crate::physical::{MapDecl, Program};
use crate::types::Struct;

/// Assemble the compiled unit for `program`.
pub fn assemble_program(
    program: &Program,
    options: &CodegenOptions,
) -> Result<Vec<String>, CompileError> {
    let mut lines = vec![
        "// Generated by kpc (Kernel Probe Compiler)".to_string(),
        "#include <linux/ptrace.h>".to_string(),
        String::new(),
    ];

    emit_structs(program, options, &mut lines)?;
    emit_maps(program, &mut lines)?;
    emit_outputs(program, &mut lines)?;

    for (i, probe) in program.probes.iter().enumerate() {
        if i > 0 {
            lines.push(String::new());
        }
        lines.extend(gen_probe_function(probe)?);
    }
    Ok(lines)
}

// ── Shared declarations ─────────────────────────────────────────────────────

fn emit_structs(
    program: &Program,
    options: &CodegenOptions,
    lines: &mut Vec<String>,
) -> Result<(), CompileError> {
    let mut declared: HashMap<&str, &Struct> = HashMap::new();
    for probe in &program.probes {
        for st in &probe.structs {
            match declared.get(st.name.as_str()) {
                None => {
                    declared.insert(&st.name, st);
                    lines.extend(gen_struct(st, options.indent)?);
                    lines.push(String::new());
                }
                Some(first) if *first == st => {}
                Some(_) => {
                    return Err(CompileError::new(
                        codes::NAME_COLLISION,
                        Stage::Assemble,
                        "struct redeclared with a conflicting definition",
                    )
                    .with_probe(&probe.name)
                    .with_entity(&st.name));
                }
            }
        }
    }
    Ok(())
}

fn emit_maps(program: &Program, lines: &mut Vec<String>) -> Result<(), CompileError> {
    let mut declared: HashMap<&str, &MapDecl> = HashMap::new();
    let mut emitted = false;
    for map in &program.maps {
        match declared.get(map.name.as_str()) {
            None => {
                declared.insert(&map.name, map);
                let key = spelling(map, &map.key_type)?;
                let value = spelling(map, &map.value_type)?;
                lines.push(format!("BPF_HASH({}, {}, {});", map.name, key, value));
                emitted = true;
            }
            Some(first) if *first == map => {}
            Some(_) => {
                return Err(CompileError::new(
                    codes::NAME_COLLISION,
                    Stage::Assemble,
                    "map redeclared with a conflicting definition",
                )
                .with_entity(&map.name));
            }
        }
    }
    if emitted {
        lines.push(String::new());
    }
    Ok(())
}

fn spelling(map: &MapDecl, ty: &crate::types::VariableType) -> Result<String, CompileError> {
    ty.native_spelling().ok_or_else(|| {
        CompileError::new(
            codes::UNKNOWN_SCALAR_TYPE,
            Stage::Assemble,
            "map declares an unknown or unset slot type",
        )
        .with_entity(&map.name)
    })
}

fn emit_outputs(program: &Program, lines: &mut Vec<String>) -> Result<(), CompileError> {
    let mut declared: HashMap<&str, ()> = HashMap::new();
    let mut emitted = false;
    for output in &program.outputs {
        // A perf channel is its name; a repeat is identical by construction.
        if declared.insert(&output.name, ()).is_none() {
            lines.push(format!("BPF_PERF_OUTPUT({});", output.name));
            emitted = true;
        }
    }
    if emitted {
        lines.push(String::new());
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::{PerfBufferDecl, Probe};
    use crate::types::{Field, ScalarType, VariableType};

    fn pair_struct(name: &str, first: ScalarType) -> Struct {
        Struct {
            name: name.to_string(),
            fields: vec![Field {
                name: "a".to_string(),
                ty: VariableType::Scalar(first),
            }],
        }
    }

    fn probe_with_struct(name: &str, st: Struct) -> Probe {
        Probe {
            name: name.to_string(),
            structs: vec![st],
            vars: vec![],
            st_vars: vec![],
            map_stash_actions: vec![],
            map_delete_actions: vec![],
            output_actions: vec![],
        }
    }

    #[test]
    fn shared_struct_is_declared_once() {
        let program = Program {
            name: "demo".to_string(),
            maps: vec![],
            outputs: vec![],
            probes: vec![
                probe_with_struct("a_entry", pair_struct("event_t", ScalarType::Int32)),
                probe_with_struct("a_return", pair_struct("event_t", ScalarType::Int32)),
            ],
        };
        let lines = assemble_program(&program, &CodegenOptions::default()).unwrap();
        let decls = lines.iter().filter(|l| *l == "struct event_t {").count();
        assert_eq!(decls, 1);
    }

    #[test]
    fn conflicting_struct_redefinition_is_fatal() {
        let program = Program {
            name: "demo".to_string(),
            maps: vec![],
            outputs: vec![],
            probes: vec![
                probe_with_struct("a_entry", pair_struct("event_t", ScalarType::Int32)),
                probe_with_struct("b_entry", pair_struct("event_t", ScalarType::Int64)),
            ],
        };
        let err = assemble_program(&program, &CodegenOptions::default()).unwrap_err();
        assert_eq!(err.code, codes::NAME_COLLISION);
        assert_eq!(err.entity.as_deref(), Some("event_t"));
    }

    #[test]
    fn conflicting_map_redefinition_is_fatal() {
        let program = Program {
            name: "demo".to_string(),
            maps: vec![
                MapDecl {
                    name: "stash".to_string(),
                    key_type: VariableType::Scalar(ScalarType::Uint64),
                    value_type: VariableType::Struct("a_t".to_string()),
                },
                MapDecl {
                    name: "stash".to_string(),
                    key_type: VariableType::Scalar(ScalarType::Uint32),
                    value_type: VariableType::Struct("a_t".to_string()),
                },
            ],
            outputs: vec![],
            probes: vec![],
        };
        let err = assemble_program(&program, &CodegenOptions::default()).unwrap_err();
        assert_eq!(err.code, codes::NAME_COLLISION);
    }

    #[test]
    fn repeated_channel_is_declared_once() {
        let program = Program {
            name: "demo".to_string(),
            maps: vec![],
            outputs: vec![
                PerfBufferDecl {
                    name: "events".to_string(),
                },
                PerfBufferDecl {
                    name: "events".to_string(),
                },
            ],
            probes: vec![],
        };
        let lines = assemble_program(&program, &CodegenOptions::default()).unwrap();
        let decls = lines
            .iter()
            .filter(|l| *l == "BPF_PERF_OUTPUT(events);")
            .count();
        assert_eq!(decls, 1);
    }
}

// transform.rs — Logical-to-physical probe expansion & verification
//
// Expands each logical probe into its entry/return physical probe skeleton,
// synthesizing the stash map, correlation key, transit struct, and implicit
// output wiring needed to join entry-time and return-time data. Then verifies
// V1-V4 well-formedness obligations over the produced physical program.
//
// Preconditions: `program` was deserialized from the authoring collaborator.
// Postconditions: a physical program whose declaration order equals
//   generation order, plus Cert evidence for V1-V4.
// Failure modes: schema errors, unknown outputs, reserved or duplicate
//   names, unresolvable correlation keys — all fatal, no partial program.
// Side effects: none. The transform is total and deterministic: no wall
//   clock, no environment, no map-iteration order reaches the output.
//
// Correlation keys identify one outstanding call of a non-reentrant target
// on one logical thread of execution. Recursive or reentrant targets reuse
// the key and overwrite the stashed entry record; the last entry wins. This
// is a documented limitation of the single-key design, not corrected here.

use std::collections::{HashMap, HashSet};

use crate::diag::{codes, CompileError, Stage};
use crate::logical;
use crate::logical::ExecModel;
use crate::names::{self, Role};
use crate::physical;
use crate::types::{
    struct_layout, BinOp, Builtin, Field, Register, ScalarType, Struct, VariableSource,
    VariableType,
};

// ── Results ─────────────────────────────────────────────────────────────────

/// Result of transformation plus verification.
pub struct TransformResult {
    pub physical: physical::Program,
    pub cert: Cert,
}

/// Machine-checkable evidence for the V1-V4 obligations over a physical
/// program. Each field records whether the corresponding obligation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cert {
    /// V1: every reference names a variable or struct declared earlier in
    /// the same probe.
    pub v1_references_resolve: bool,
    /// V2: probe, map, and output-channel names are globally unique.
    pub v2_global_names_unique: bool,
    /// V3: every struct a probe references is declared in that probe's own
    /// struct list.
    pub v3_structs_probe_local: bool,
    /// V4: every struct-variable binds exactly as many members as its
    /// struct has fields.
    pub v4_member_counts_match: bool,
}

impl Cert {
    /// True if all obligations pass.
    pub fn all_pass(&self) -> bool {
        self.v1_references_resolve
            && self.v2_global_names_unique
            && self.v3_structs_probe_local
            && self.v4_member_counts_match
    }
}

// ── Public entry points ─────────────────────────────────────────────────────

/// Transform a logical program into its physical equivalent.
pub fn transform(program: &logical::Program) -> Result<physical::Program, CompileError> {
    let mut seen_probe_names = HashSet::new();
    for probe in &program.probes {
        if !seen_probe_names.insert(probe.name.as_str()) {
            return Err(CompileError::new(
                codes::DUPLICATE_NAME,
                Stage::Transform,
                "two logical probes share a name; derived physical names would collide",
            )
            .with_probe(&probe.name));
        }
    }

    let mut schemas: HashMap<&str, &logical::OutputSchema> = HashMap::new();
    for schema in &program.outputs {
        if schemas.insert(schema.name.as_str(), schema).is_some() {
            return Err(CompileError::new(
                codes::DUPLICATE_NAME,
                Stage::Transform,
                "two output schemas share a name",
            )
            .with_entity(&schema.name));
        }
        validate_schema(schema)?;
    }

    let mut physical = physical::Program {
        name: program.name.clone(),
        maps: Vec::new(),
        outputs: Vec::new(),
        probes: Vec::new(),
    };
    for probe in &program.probes {
        expand_probe(probe, &schemas, &mut physical)?;
    }
    Ok(physical)
}

/// Transform, then verify the V1-V4 obligations over the result.
pub fn transform_and_verify(program: &logical::Program) -> Result<TransformResult, CompileError> {
    let physical = transform(program)?;
    let cert = verify_obligations(&physical);
    Ok(TransformResult { physical, cert })
}

// ── Schema validation ───────────────────────────────────────────────────────

fn validate_schema(schema: &logical::OutputSchema) -> Result<(), CompileError> {
    let mut seen = HashSet::new();
    for field in &schema.fields {
        if !seen.insert(field.name.as_str()) {
            return Err(CompileError::new(
                codes::DUPLICATE_NAME,
                Stage::Transform,
                format!("output `{}` declares field `{}` twice", schema.name, field.name),
            )
            .with_entity(&field.name));
        }
        if field.ty == ScalarType::Unknown {
            return Err(CompileError::new(
                codes::UNKNOWN_SCALAR_TYPE,
                Stage::Transform,
                format!(
                    "output `{}` field `{}` has unknown or unset type",
                    schema.name, field.name
                ),
            )
            .with_entity(&field.name));
        }
    }
    Ok(())
}

// ── Per-probe expansion ─────────────────────────────────────────────────────

/// What an output-referenced name resolved to.
enum Captured<'a> {
    Arg(&'a logical::Argument),
    Ret(&'a logical::ReturnValue),
    Latency(&'a logical::Latency),
}

impl Captured<'_> {
    fn ty(&self) -> ScalarType {
        match self {
            Captured::Arg(arg) => arg.ty,
            Captured::Ret(ret) => ret.ty,
            Captured::Latency(_) => ScalarType::Uint64,
        }
    }
}

fn expand_probe(
    probe: &logical::Probe,
    schemas: &HashMap<&str, &logical::OutputSchema>,
    physical: &mut physical::Program,
) -> Result<(), CompileError> {
    validate_captures(probe)?;

    let schema = *schemas.get(probe.output_action.output_name.as_str()).ok_or_else(|| {
        CompileError::new(
            codes::UNKNOWN_OUTPUT,
            Stage::Transform,
            "output is not declared in the program",
        )
        .with_probe(&probe.name)
        .with_entity(&probe.output_action.output_name)
    })?;

    let refs = resolve_output_refs(probe, schema)?;
    let uses_ret = refs.iter().any(|r| matches!(r, Captured::Ret(_)));
    let uses_latency = refs.iter().any(|r| matches!(r, Captured::Latency(_)));
    let return_dependent = uses_ret || uses_latency;

    let output_struct = Struct {
        name: names::output_struct_name(&schema.name),
        fields: schema
            .fields
            .iter()
            .map(|f| Field {
                name: f.name.clone(),
                ty: VariableType::Scalar(f.ty),
            })
            .collect(),
    };

    let perf_name = names::physical_name(&probe.name, Role::OutputChannel);
    physical.outputs.push(physical::PerfBufferDecl {
        name: perf_name.clone(),
    });

    let arg_vars = |probe: &logical::Probe| -> Vec<physical::ScalarVariable> {
        probe
            .args
            .iter()
            .map(|arg| physical::ScalarVariable {
                name: arg.name.clone(),
                ty: arg.ty,
                source: arg.source.clone(),
            })
            .collect()
    };

    if !return_dependent {
        physical.probes.push(physical::Probe {
            name: names::physical_name(&probe.name, Role::EntryProbe),
            structs: vec![output_struct],
            vars: arg_vars(probe),
            st_vars: vec![physical::StructVariable {
                name: names::OUTPUT_VALUE.to_string(),
                struct_name: names::output_struct_name(&schema.name),
                variable_names: probe.output_action.variable_names.clone(),
            }],
            map_stash_actions: Vec::new(),
            map_delete_actions: Vec::new(),
            output_actions: vec![physical::OutputAction {
                perf_buffer_name: perf_name,
                variable_name: names::OUTPUT_VALUE.to_string(),
            }],
        });
        return Ok(());
    }

    let key_builtin = invocation_key_builtin(probe)?;

    // Transit struct: every captured argument in declaration order, then the
    // entry timestamp. The timestamp is always present, so the struct is
    // never empty and its layout does not depend on which fields the output
    // references.
    let mut stash_fields: Vec<Field> = probe
        .args
        .iter()
        .map(|arg| Field {
            name: arg.name.clone(),
            ty: VariableType::Scalar(arg.ty),
        })
        .collect();
    stash_fields.push(Field {
        name: names::ENTRY_KTIME.to_string(),
        ty: VariableType::Scalar(ScalarType::Uint64),
    });
    let stash_struct = Struct {
        name: names::stash_struct_name(&probe.name),
        fields: stash_fields,
    };

    let map_name = names::physical_name(&probe.name, Role::StashMap);
    physical.maps.push(physical::MapDecl {
        name: map_name.clone(),
        key_type: VariableType::Scalar(ScalarType::Uint64),
        value_type: VariableType::Struct(stash_struct.name.clone()),
    });

    // ── Entry probe ─────────────────────────────────────────────────────
    let mut entry_vars = vec![physical::ScalarVariable {
        name: names::STASH_KEY.to_string(),
        ty: ScalarType::Uint64,
        source: VariableSource::Builtin(key_builtin),
    }];
    entry_vars.extend(arg_vars(probe));
    entry_vars.push(physical::ScalarVariable {
        name: names::ENTRY_KTIME.to_string(),
        ty: ScalarType::Uint64,
        source: VariableSource::Builtin(Builtin::KtimeNs),
    });

    let mut stash_members: Vec<String> = probe.args.iter().map(|a| a.name.clone()).collect();
    stash_members.push(names::ENTRY_KTIME.to_string());

    physical.probes.push(physical::Probe {
        name: names::physical_name(&probe.name, Role::EntryProbe),
        structs: vec![stash_struct.clone()],
        vars: entry_vars,
        st_vars: vec![physical::StructVariable {
            name: names::STASH_VALUE.to_string(),
            struct_name: stash_struct.name.clone(),
            variable_names: stash_members,
        }],
        map_stash_actions: vec![physical::MapStashAction {
            map_name: map_name.clone(),
            key_variable_name: names::STASH_KEY.to_string(),
            value_variable_name: names::STASH_VALUE.to_string(),
        }],
        map_delete_actions: Vec::new(),
        output_actions: Vec::new(),
    });

    // ── Return probe ────────────────────────────────────────────────────
    let needed: HashSet<&str> = refs
        .iter()
        .filter_map(|r| match r {
            Captured::Arg(arg) => Some(arg.name.as_str()),
            _ => None,
        })
        .chain(uses_latency.then_some(names::ENTRY_KTIME))
        .collect();

    let layout = struct_layout(&stash_struct, |_| None).map_err(|e| {
        CompileError::new(codes::UNKNOWN_SCALAR_TYPE, Stage::Transform, e.to_string())
            .with_probe(&probe.name)
            .with_entity(&stash_struct.name)
    })?;

    let mut return_vars = vec![
        physical::ScalarVariable {
            name: names::STASH_KEY.to_string(),
            ty: ScalarType::Uint64,
            source: VariableSource::Builtin(key_builtin),
        },
        physical::ScalarVariable {
            name: names::STASH_PTR.to_string(),
            ty: ScalarType::VoidPointer,
            source: VariableSource::MapLookup {
                map_name: map_name.clone(),
                key_variable_name: names::STASH_KEY.to_string(),
            },
        },
    ];
    for (field, offset) in stash_struct.fields.iter().zip(&layout.field_offsets) {
        if !needed.contains(field.name.as_str()) {
            continue;
        }
        let VariableType::Scalar(ty) = &field.ty else {
            continue;
        };
        return_vars.push(physical::ScalarVariable {
            name: field.name.clone(),
            ty: *ty,
            source: VariableSource::Memory {
                base: names::STASH_PTR.to_string(),
                offset: *offset as i64,
            },
        });
    }
    if uses_ret {
        // Checked by resolve_output_refs: a ret reference implies `ret` is declared.
        let ret = probe.ret.as_ref().expect("ret reference without declaration");
        return_vars.push(physical::ScalarVariable {
            name: ret.name.clone(),
            ty: ret.ty,
            source: VariableSource::Register(Register::Rc),
        });
    }
    if uses_latency {
        let latency = probe
            .latency
            .as_ref()
            .expect("latency reference without declaration");
        return_vars.push(physical::ScalarVariable {
            name: names::RETURN_KTIME.to_string(),
            ty: ScalarType::Uint64,
            source: VariableSource::Builtin(Builtin::KtimeNs),
        });
        return_vars.push(physical::ScalarVariable {
            name: latency.name.clone(),
            ty: ScalarType::Uint64,
            source: VariableSource::BinaryExpr {
                op: BinOp::Sub,
                lhs: names::RETURN_KTIME.to_string(),
                rhs: names::ENTRY_KTIME.to_string(),
            },
        });
    }

    physical.probes.push(physical::Probe {
        name: names::physical_name(&probe.name, Role::ReturnProbe),
        structs: vec![stash_struct, output_struct],
        vars: return_vars,
        st_vars: vec![physical::StructVariable {
            name: names::OUTPUT_VALUE.to_string(),
            struct_name: names::output_struct_name(&schema.name),
            variable_names: probe.output_action.variable_names.clone(),
        }],
        map_stash_actions: Vec::new(),
        // Delete-after-read: without this the stash would retain one entry
        // per completed call. Entries for calls that never return still leak.
        map_delete_actions: vec![physical::MapDeleteAction {
            map_name,
            key_variable_name: names::STASH_KEY.to_string(),
        }],
        output_actions: vec![physical::OutputAction {
            perf_buffer_name: perf_name,
            variable_name: names::OUTPUT_VALUE.to_string(),
        }],
    });

    Ok(())
}

// ── Capture validation ──────────────────────────────────────────────────────

fn validate_captures(probe: &logical::Probe) -> Result<(), CompileError> {
    let mut declared: HashSet<&str> = HashSet::new();

    for arg in &probe.args {
        check_capture_name(probe, &mut declared, &arg.name)?;
        check_capture_type(probe, &arg.name, arg.ty)?;
        match &arg.source {
            VariableSource::Register(_) | VariableSource::Builtin(_) => {}
            VariableSource::Memory { base, .. } => {
                // Declaration order is binding: the base must already exist.
                if !declared.contains(base.as_str()) {
                    return Err(CompileError::new(
                        codes::UNDECLARED_VARIABLE,
                        Stage::Transform,
                        format!("memory base `{}` is not an earlier argument", base),
                    )
                    .with_probe(&probe.name)
                    .with_entity(&arg.name));
                }
            }
            VariableSource::MapLookup { .. } | VariableSource::BinaryExpr { .. } => {
                return Err(CompileError::new(
                    codes::INTERNAL_SOURCE,
                    Stage::Transform,
                    "map-lookup and derived sources are synthesized, not authored",
                )
                .with_probe(&probe.name)
                .with_entity(&arg.name));
            }
        }
        declared.insert(arg.name.as_str());
    }

    if let Some(ret) = &probe.ret {
        check_capture_name(probe, &mut declared, &ret.name)?;
        check_capture_type(probe, &ret.name, ret.ty)?;
        declared.insert(ret.name.as_str());
    }
    if let Some(latency) = &probe.latency {
        check_capture_name(probe, &mut declared, &latency.name)?;
    }
    Ok(())
}

fn check_capture_name<'a>(
    probe: &logical::Probe,
    declared: &mut HashSet<&'a str>,
    name: &'a str,
) -> Result<(), CompileError> {
    if names::is_reserved(name) {
        return Err(CompileError::new(
            codes::RESERVED_NAME,
            Stage::Transform,
            "name is reserved for synthesized variables",
        )
        .with_probe(&probe.name)
        .with_entity(name));
    }
    if declared.contains(name) {
        return Err(CompileError::new(
            codes::DUPLICATE_NAME,
            Stage::Transform,
            "capture name declared twice in one probe",
        )
        .with_probe(&probe.name)
        .with_entity(name));
    }
    Ok(())
}

fn check_capture_type(
    probe: &logical::Probe,
    name: &str,
    ty: ScalarType,
) -> Result<(), CompileError> {
    if ty == ScalarType::Unknown {
        return Err(CompileError::new(
            codes::UNKNOWN_SCALAR_TYPE,
            Stage::Transform,
            "capture has unknown or unset type",
        )
        .with_probe(&probe.name)
        .with_entity(name));
    }
    Ok(())
}

fn resolve_output_refs<'a>(
    probe: &'a logical::Probe,
    schema: &logical::OutputSchema,
) -> Result<Vec<Captured<'a>>, CompileError> {
    if probe.output_action.variable_names.len() != schema.fields.len() {
        return Err(CompileError::new(
            codes::OUTPUT_SHAPE_MISMATCH,
            Stage::Transform,
            format!(
                "output `{}` has {} fields but {} variables were supplied",
                schema.name,
                schema.fields.len(),
                probe.output_action.variable_names.len()
            ),
        )
        .with_probe(&probe.name)
        .with_entity(&schema.name));
    }

    let mut refs = Vec::with_capacity(schema.fields.len());
    for (name, field) in probe.output_action.variable_names.iter().zip(&schema.fields) {
        let captured = probe
            .args
            .iter()
            .find(|arg| &arg.name == name)
            .map(Captured::Arg)
            .or_else(|| {
                probe
                    .ret
                    .as_ref()
                    .filter(|ret| &ret.name == name)
                    .map(Captured::Ret)
            })
            .or_else(|| {
                probe
                    .latency
                    .as_ref()
                    .filter(|latency| &latency.name == name)
                    .map(Captured::Latency)
            })
            .ok_or_else(|| {
                CompileError::new(
                    codes::UNDECLARED_VARIABLE,
                    Stage::Transform,
                    "output references a variable the probe does not capture",
                )
                .with_probe(&probe.name)
                .with_entity(name)
            })?;
        if captured.ty() != field.ty {
            return Err(CompileError::new(
                codes::OUTPUT_SHAPE_MISMATCH,
                Stage::Transform,
                format!(
                    "`{}` is {} but output field `{}` is {}",
                    name,
                    captured.ty().wire_name(),
                    field.name,
                    field.ty.wire_name()
                ),
            )
            .with_probe(&probe.name)
            .with_entity(&field.name));
        }
        refs.push(captured);
    }
    Ok(refs)
}

fn invocation_key_builtin(probe: &logical::Probe) -> Result<Builtin, CompileError> {
    match probe.trace_point.exec_model {
        ExecModel::Native => Ok(Builtin::TgidPid),
        ExecModel::Golang => Ok(Builtin::Goid),
        ExecModel::Unknown => Err(CompileError::new(
            codes::NO_INVOCATION_KEY,
            Stage::Transform,
            "target execution model does not resolve to a per-invocation key builtin",
        )
        .with_probe(&probe.name)
        .with_entity(&probe.trace_point.symbol)),
    }
}

// ── V1-V4 verification ──────────────────────────────────────────────────────

/// Verify the V1-V4 obligations over a physical program.
pub fn verify_obligations(program: &physical::Program) -> Cert {
    Cert {
        v1_references_resolve: verify_v1(program),
        v2_global_names_unique: verify_v2(program),
        v3_structs_probe_local: verify_v3(program),
        v4_member_counts_match: verify_v4(program),
    }
}

fn verify_v1(program: &physical::Program) -> bool {
    program.probes.iter().all(|probe| {
        let mut declared: HashSet<&str> = HashSet::new();
        for var in &probe.vars {
            let source_ok = match &var.source {
                VariableSource::Register(_) | VariableSource::Builtin(_) => true,
                VariableSource::Memory { base, .. } => declared.contains(base.as_str()),
                VariableSource::MapLookup {
                    key_variable_name, ..
                } => declared.contains(key_variable_name.as_str()),
                VariableSource::BinaryExpr { lhs, rhs, .. } => {
                    declared.contains(lhs.as_str()) && declared.contains(rhs.as_str())
                }
            };
            if !source_ok {
                return false;
            }
            declared.insert(var.name.as_str());
        }
        for st_var in &probe.st_vars {
            if !st_var
                .variable_names
                .iter()
                .all(|name| declared.contains(name.as_str()))
            {
                return false;
            }
            declared.insert(st_var.name.as_str());
        }
        probe
            .map_stash_actions
            .iter()
            .all(|a| {
                declared.contains(a.key_variable_name.as_str())
                    && declared.contains(a.value_variable_name.as_str())
            })
            && probe
                .map_delete_actions
                .iter()
                .all(|a| declared.contains(a.key_variable_name.as_str()))
            && probe
                .output_actions
                .iter()
                .all(|a| declared.contains(a.variable_name.as_str()))
    })
}

fn verify_v2(program: &physical::Program) -> bool {
    let mut seen = HashSet::new();
    program
        .probes
        .iter()
        .map(|p| p.name.as_str())
        .chain(program.maps.iter().map(|m| m.name.as_str()))
        .chain(program.outputs.iter().map(|o| o.name.as_str()))
        .all(|name| seen.insert(name))
}

fn verify_v3(program: &physical::Program) -> bool {
    program.probes.iter().all(|probe| {
        probe
            .st_vars
            .iter()
            .all(|st_var| probe.find_struct(&st_var.struct_name).is_some())
            && probe.structs.iter().all(|st| {
                st.fields.iter().all(|field| match &field.ty {
                    VariableType::Scalar(_) => true,
                    VariableType::Struct(name) => probe.find_struct(name).is_some(),
                })
            })
    })
}

fn verify_v4(program: &physical::Program) -> bool {
    program.probes.iter().all(|probe| {
        probe.st_vars.iter().all(|st_var| {
            probe
                .find_struct(&st_var.struct_name)
                .is_none_or(|st| st.fields.len() == st_var.variable_names.len())
        })
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────

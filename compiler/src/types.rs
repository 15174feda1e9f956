// types.rs — Shared type and variable model
//
// The vocabulary both compiler stages speak: scalar types, register and
// builtin identifiers, variable sources, and struct layouts. The two policy
// tables of the whole compiler — scalar type → native spelling and builtin →
// runtime-call expression — live here and nowhere else.
//
// Preconditions: none (types and pure tables only).
// Postconditions: none.
// Failure modes: `ScalarType::Unknown` has no spelling, size, or alignment;
//                `struct_layout` rejects unresolvable or unknown-typed fields.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Scalar types ────────────────────────────────────────────────────────────

/// Closed enumeration of scalar value types.
///
/// `Unknown` is the serde default so that an *unset* type in submitted IR is
/// representable; it is rejected the moment it reaches a policy table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScalarType {
    #[default]
    Unknown,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float,
    Double,
    VoidPointer,
    String,
}

/// All scalar types in declaration order (used for the vocabulary fingerprint
/// and exhaustive tests). `Unknown` is excluded: it has no native spelling.
pub const ALL_SCALAR_TYPES: [ScalarType; 13] = [
    ScalarType::Bool,
    ScalarType::Int8,
    ScalarType::Int16,
    ScalarType::Int32,
    ScalarType::Int64,
    ScalarType::Uint8,
    ScalarType::Uint16,
    ScalarType::Uint32,
    ScalarType::Uint64,
    ScalarType::Float,
    ScalarType::Double,
    ScalarType::VoidPointer,
    ScalarType::String,
];

impl ScalarType {
    /// The canonical native spelling used at generation time.
    ///
    /// Exactly one spelling per type, across every call site (struct field,
    /// variable declaration, sizeof operand). `None` for `Unknown`.
    pub fn c_spelling(self) -> Option<&'static str> {
        match self {
            ScalarType::Unknown => None,
            ScalarType::Bool => Some("bool"),
            ScalarType::Int8 => Some("int8_t"),
            ScalarType::Int16 => Some("int16_t"),
            ScalarType::Int32 => Some("int32_t"),
            ScalarType::Int64 => Some("int64_t"),
            ScalarType::Uint8 => Some("uint8_t"),
            ScalarType::Uint16 => Some("uint16_t"),
            ScalarType::Uint32 => Some("uint32_t"),
            ScalarType::Uint64 => Some("uint64_t"),
            ScalarType::Float => Some("float"),
            ScalarType::Double => Some("double"),
            ScalarType::VoidPointer => Some("void*"),
            ScalarType::String => Some("char*"),
        }
    }

    /// Size in bytes under the LP64 data model the generated source targets.
    pub fn size_bytes(self) -> Option<u64> {
        match self {
            ScalarType::Unknown => None,
            ScalarType::Bool | ScalarType::Int8 | ScalarType::Uint8 => Some(1),
            ScalarType::Int16 | ScalarType::Uint16 => Some(2),
            ScalarType::Int32 | ScalarType::Uint32 | ScalarType::Float => Some(4),
            ScalarType::Int64 | ScalarType::Uint64 | ScalarType::Double => Some(8),
            ScalarType::VoidPointer | ScalarType::String => Some(8),
        }
    }

    /// Natural alignment in bytes. Equal to size for every scalar the model
    /// carries.
    pub fn align_bytes(self) -> Option<u64> {
        self.size_bytes()
    }

    /// Serialized name (the wire vocabulary), for diagnostics.
    pub fn wire_name(self) -> &'static str {
        match self {
            ScalarType::Unknown => "UNKNOWN",
            ScalarType::Bool => "BOOL",
            ScalarType::Int8 => "INT8",
            ScalarType::Int16 => "INT16",
            ScalarType::Int32 => "INT32",
            ScalarType::Int64 => "INT64",
            ScalarType::Uint8 => "UINT8",
            ScalarType::Uint16 => "UINT16",
            ScalarType::Uint32 => "UINT32",
            ScalarType::Uint64 => "UINT64",
            ScalarType::Float => "FLOAT",
            ScalarType::Double => "DOUBLE",
            ScalarType::VoidPointer => "VOID_POINTER",
            ScalarType::String => "STRING",
        }
    }
}

// ── Registers ───────────────────────────────────────────────────────────────

/// Symbolic ABI register identifiers, read through the platform's
/// register-access convention for the active probe context.
///
/// `Rc` is the return-value register; synthesized return probes read the
/// traced function's result through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Register {
    Sp,
    Rc,
    Ip,
    Parm1,
    Parm2,
    Parm3,
    Parm4,
    Parm5,
    Parm6,
}

impl Register {
    /// Fixed register-access expression for the probe calling context.
    pub fn c_expr(self) -> &'static str {
        match self {
            Register::Sp => "PT_REGS_SP(ctx)",
            Register::Rc => "PT_REGS_RC(ctx)",
            Register::Ip => "PT_REGS_IP(ctx)",
            Register::Parm1 => "PT_REGS_PARM1(ctx)",
            Register::Parm2 => "PT_REGS_PARM2(ctx)",
            Register::Parm3 => "PT_REGS_PARM3(ctx)",
            Register::Parm4 => "PT_REGS_PARM4(ctx)",
            Register::Parm5 => "PT_REGS_PARM5(ctx)",
            Register::Parm6 => "PT_REGS_PARM6(ctx)",
        }
    }
}

// ── Builtins ────────────────────────────────────────────────────────────────

/// Fixed vocabulary of runtime identity and timing helpers.
///
/// Each builtin maps to exactly one runtime-call expression, regardless of
/// the declared scalar type of the variable it initializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Builtin {
    Goid,
    Tgid,
    TgidPid,
    KtimeNs,
}

/// All builtins in declaration order (vocabulary fingerprint + tests).
pub const ALL_BUILTINS: [Builtin; 4] = [
    Builtin::Goid,
    Builtin::Tgid,
    Builtin::TgidPid,
    Builtin::KtimeNs,
];

impl Builtin {
    /// Fixed runtime-call expression for this builtin.
    pub fn c_expr(self) -> &'static str {
        match self {
            Builtin::Goid => "goid()",
            Builtin::Tgid => "bpf_get_current_pid_tgid() >> 32",
            Builtin::TgidPid => "bpf_get_current_pid_tgid()",
            Builtin::KtimeNs => "bpf_ktime_get_ns()",
        }
    }

    /// Serialized name, for diagnostics.
    pub fn wire_name(self) -> &'static str {
        match self {
            Builtin::Goid => "GOID",
            Builtin::Tgid => "TGID",
            Builtin::TgidPid => "TGID_PID",
            Builtin::KtimeNs => "KTIME_NS",
        }
    }
}

// ── Variable sources ────────────────────────────────────────────────────────

/// Binary operator in a derived-variable expression. Closed; subtraction is
/// the only form the transformer synthesizes (elapsed-time deltas).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BinOp {
    Sub,
}

impl BinOp {
    pub fn c_op(self) -> &'static str {
        match self {
            BinOp::Sub => "-",
        }
    }
}

/// Where a scalar variable's value comes from. Exactly one variant is active.
///
/// Operator-authored logical probes may only use `Register`, `Memory`, and
/// `Builtin`; `MapLookup` and `BinaryExpr` are synthesized by the transformer
/// for return-probe stash reads and derived variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableSource {
    /// Read a register through the platform access convention.
    Register(Register),
    /// Bounded, checked copy of `sizeof(type)` bytes from `base + offset`.
    Memory { base: String, offset: i64 },
    /// Fixed runtime-call expression.
    Builtin(Builtin),
    /// Keyed map lookup producing a pointer into the stashed entry, with an
    /// inline NULL guard. Declared type must be `VOID_POINTER`.
    MapLookup {
        map_name: String,
        key_variable_name: String,
    },
    /// Derived variable computed from two previously declared variables.
    BinaryExpr { op: BinOp, lhs: String, rhs: String },
}

// ── Variable types and structs ──────────────────────────────────────────────

/// A field or map slot type: scalar, or a reference to a named struct
/// resolved within the same program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Scalar(ScalarType),
    Struct(String),
}

impl VariableType {
    /// Native spelling for declarations: the scalar spelling, or
    /// `struct {name}` for struct references. `None` for `Unknown`.
    pub fn native_spelling(&self) -> Option<String> {
        match self {
            VariableType::Scalar(s) => s.c_spelling().map(str::to_string),
            VariableType::Struct(name) => Some(format!("struct {}", name)),
        }
    }
}

/// One field of a struct. Order within the parent is significant and is
/// preserved verbatim into generated layout and positional assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: VariableType,
}

/// A named, ordered, immutable sequence of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Struct {
    pub name: String,
    pub fields: Vec<Field>,
}

// ── Struct layout ───────────────────────────────────────────────────────────

/// Nesting bound for layout recursion; struct definitions resolved within one
/// program never legitimately nest deeper.
const MAX_LAYOUT_DEPTH: u32 = 16;

/// Computed C layout of a struct under natural alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub size: u64,
    pub align: u64,
    /// Byte offset of each field, in field order.
    pub field_offsets: Vec<u64>,
}

/// Layout computation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    UnknownScalar { field: String },
    UnresolvedStruct { field: String, struct_name: String },
    NestingTooDeep { struct_name: String },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::UnknownScalar { field } => {
                write!(f, "field `{}` has unknown or unset scalar type", field)
            }
            LayoutError::UnresolvedStruct { field, struct_name } => {
                write!(
                    f,
                    "field `{}` references undefined struct `{}`",
                    field, struct_name
                )
            }
            LayoutError::NestingTooDeep { struct_name } => {
                write!(f, "struct `{}` nests deeper than supported", struct_name)
            }
        }
    }
}

/// Compute the natural-alignment layout of `st`, resolving nested struct
/// fields through `resolve`.
///
/// Matches what an LP64 C compiler produces for the generated declarations:
/// each field aligned to its natural alignment, total size padded to the
/// struct's alignment.
pub fn struct_layout<'a, F>(st: &Struct, resolve: F) -> Result<StructLayout, LayoutError>
where
    F: Fn(&str) -> Option<&'a Struct> + Copy,
{
    layout_at_depth(st, resolve, 0)
}

fn layout_at_depth<'a, F>(st: &Struct, resolve: F, depth: u32) -> Result<StructLayout, LayoutError>
where
    F: Fn(&str) -> Option<&'a Struct> + Copy,
{
    if depth >= MAX_LAYOUT_DEPTH {
        return Err(LayoutError::NestingTooDeep {
            struct_name: st.name.clone(),
        });
    }

    let mut offset: u64 = 0;
    let mut max_align: u64 = 1;
    let mut field_offsets = Vec::with_capacity(st.fields.len());

    for field in &st.fields {
        let (size, align) = match &field.ty {
            VariableType::Scalar(s) => {
                let size = s.size_bytes().ok_or_else(|| LayoutError::UnknownScalar {
                    field: field.name.clone(),
                })?;
                (size, size)
            }
            VariableType::Struct(name) => {
                let nested = resolve(name).ok_or_else(|| LayoutError::UnresolvedStruct {
                    field: field.name.clone(),
                    struct_name: name.clone(),
                })?;
                let nested_layout = layout_at_depth(nested, resolve, depth + 1)?;
                (nested_layout.size, nested_layout.align)
            }
        };
        offset = align_up(offset, align);
        field_offsets.push(offset);
        offset += size;
        max_align = max_align.max(align);
    }

    Ok(StructLayout {
        size: align_up(offset, max_align),
        align: max_align,
        field_offsets,
    })
}

fn align_up(offset: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

// ── Vocabulary fingerprint ──────────────────────────────────────────────────

/// Deterministic textual listing of both policy tables, hashed into the
/// compile provenance so a vocabulary change shows up as a new fingerprint.
pub fn canonical_vocabulary() -> String {
    let mut out = String::new();
    for st in ALL_SCALAR_TYPES {
        out.push_str(st.wire_name());
        out.push('=');
        out.push_str(st.c_spelling().unwrap_or("?"));
        out.push(';');
    }
    out.push('|');
    for b in ALL_BUILTINS {
        out.push_str(b.wire_name());
        out.push('=');
        out.push_str(b.c_expr());
        out.push(';');
    }
    out
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_spellings_are_fixed() {
        assert_eq!(ScalarType::Int32.c_spelling(), Some("int32_t"));
        assert_eq!(ScalarType::Uint64.c_spelling(), Some("uint64_t"));
        assert_eq!(ScalarType::VoidPointer.c_spelling(), Some("void*"));
        assert_eq!(ScalarType::String.c_spelling(), Some("char*"));
        assert_eq!(ScalarType::Unknown.c_spelling(), None);
    }

    #[test]
    fn every_known_scalar_has_spelling_and_size() {
        for st in ALL_SCALAR_TYPES {
            assert!(st.c_spelling().is_some(), "{:?} has no spelling", st);
            assert!(st.size_bytes().is_some(), "{:?} has no size", st);
        }
    }

    #[test]
    fn builtin_expressions_are_fixed() {
        assert_eq!(Builtin::Tgid.c_expr(), "bpf_get_current_pid_tgid() >> 32");
        assert_eq!(Builtin::TgidPid.c_expr(), "bpf_get_current_pid_tgid()");
        assert_eq!(Builtin::Goid.c_expr(), "goid()");
        assert_eq!(Builtin::KtimeNs.c_expr(), "bpf_ktime_get_ns()");
    }

    #[test]
    fn scalar_type_wire_names_round_trip() {
        for st in ALL_SCALAR_TYPES {
            let json = format!("\"{}\"", st.wire_name());
            let back: ScalarType = serde_json::from_str(&json).unwrap();
            assert_eq!(back, st);
        }
    }

    #[test]
    fn unset_scalar_type_deserializes_to_unknown() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(default)]
            ty: ScalarType,
        }
        let h: Holder = serde_json::from_str("{}").unwrap();
        assert_eq!(h.ty, ScalarType::Unknown);
    }

    #[test]
    fn layout_pads_to_natural_alignment() {
        let st = Struct {
            name: "pair_t".to_string(),
            fields: vec![
                Field {
                    name: "a".to_string(),
                    ty: VariableType::Scalar(ScalarType::Int32),
                },
                Field {
                    name: "b".to_string(),
                    ty: VariableType::Scalar(ScalarType::Int64),
                },
            ],
        };
        let layout = struct_layout(&st, |_| None).unwrap();
        assert_eq!(layout.field_offsets, vec![0, 8]);
        assert_eq!(layout.size, 16);
        assert_eq!(layout.align, 8);
    }

    #[test]
    fn layout_packs_dense_when_aligned() {
        let st = Struct {
            name: "dense_t".to_string(),
            fields: vec![
                Field {
                    name: "a".to_string(),
                    ty: VariableType::Scalar(ScalarType::Uint64),
                },
                Field {
                    name: "b".to_string(),
                    ty: VariableType::Scalar(ScalarType::Uint32),
                },
                Field {
                    name: "c".to_string(),
                    ty: VariableType::Scalar(ScalarType::Uint32),
                },
            ],
        };
        let layout = struct_layout(&st, |_| None).unwrap();
        assert_eq!(layout.field_offsets, vec![0, 8, 12]);
        assert_eq!(layout.size, 16);
    }

    #[test]
    fn layout_resolves_nested_structs() {
        let inner = Struct {
            name: "inner_t".to_string(),
            fields: vec![Field {
                name: "x".to_string(),
                ty: VariableType::Scalar(ScalarType::Int64),
            }],
        };
        let outer = Struct {
            name: "outer_t".to_string(),
            fields: vec![
                Field {
                    name: "tag".to_string(),
                    ty: VariableType::Scalar(ScalarType::Int8),
                },
                Field {
                    name: "inner".to_string(),
                    ty: VariableType::Struct("inner_t".to_string()),
                },
            ],
        };
        let layout = struct_layout(&outer, |name| (name == "inner_t").then_some(&inner)).unwrap();
        assert_eq!(layout.field_offsets, vec![0, 8]);
        assert_eq!(layout.size, 16);
    }

    #[test]
    fn layout_rejects_unknown_scalar() {
        let st = Struct {
            name: "bad_t".to_string(),
            fields: vec![Field {
                name: "x".to_string(),
                ty: VariableType::Scalar(ScalarType::Unknown),
            }],
        };
        assert_eq!(
            struct_layout(&st, |_| None),
            Err(LayoutError::UnknownScalar {
                field: "x".to_string()
            })
        );
    }

    #[test]
    fn layout_rejects_unresolved_struct() {
        let st = Struct {
            name: "bad_t".to_string(),
            fields: vec![Field {
                name: "x".to_string(),
                ty: VariableType::Struct("missing_t".to_string()),
            }],
        };
        assert!(matches!(
            struct_layout(&st, |_| None),
            Err(LayoutError::UnresolvedStruct { .. })
        ));
    }

    #[test]
    fn vocabulary_listing_is_stable() {
        assert_eq!(canonical_vocabulary(), canonical_vocabulary());
        assert!(canonical_vocabulary().contains("INT32=int32_t;"));
        assert!(canonical_vocabulary().contains("TGID=bpf_get_current_pid_tgid() >> 32;"));
    }
}

//! IR instructions.

use crate::{arena::EntityId, Name};

/// Index of an instruction (and of the value it defines) within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub u32);

impl EntityId for ValueId {
    fn from_usize(index: usize) -> Self {
        ValueId(index as u32)
    }

    fn into_usize(self) -> usize {
        self.0 as usize
    }
}

/// Comparison kinds, matching the source-level operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpKind {
    Less,
    Greater,
    Equal,
    NotEqual,
    LessEq,
    GreaterEq,
}

/// What an instruction computes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    /// Block parameter (an SSA phi). `name` is the source-level variable the
    /// parameter stands for; `None` marks a parameter disabled by pruning.
    Parameter { name: Option<Name> },
    /// 32-bit integer constant.
    Int { constant: i32 },
    /// Integer addition.
    Add { a: ValueId, b: ValueId },
    /// Integer subtraction.
    Sub { a: ValueId, b: ValueId },
    /// Integer comparison producing a condition.
    Cmp { kind: CmpKind, a: ValueId, b: ValueId },
    /// Resolve a top-level name to a compiled function pointer.
    Global { name: Name },
    /// Indirect call; at most four arguments.
    Call { callee: ValueId, args: Vec<ValueId> },
    /// Allocate a fresh attribute-table object.
    NewObject,
    /// Address of the attribute slot `name` in `obj` (a location handle).
    GetAttr { obj: ValueId, name: Name },
    /// Read through a location handle.
    GetLoc { loc: ValueId },
    /// Write through a location handle.
    SetLoc { loc: ValueId, value: ValueId },
}

/// Static summary of the value an instruction produces, used to skip
/// redundant type guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Known to carry the integer tag.
    Int,
    /// Anything else; arithmetic on it is guarded.
    Unknown,
}

/// An IR instruction together with its use count.
#[derive(Debug, Clone)]
pub struct Inst {
    pub kind: InstKind,
    /// Number of uses (operand positions plus branch flows). Zero-use values
    /// without side effects are never emitted.
    pub refs: u32,
    pub ty: ValueType,
}

impl Inst {
    pub fn new(kind: InstKind) -> Self {
        let ty = match kind {
            InstKind::Int { .. } | InstKind::Add { .. } | InstKind::Sub { .. } | InstKind::Cmp { .. } => {
                ValueType::Int
            }
            _ => ValueType::Unknown,
        };
        Self { kind, refs: 0, ty }
    }

    /// The operand values this instruction reads.
    pub fn args(&self) -> Vec<ValueId> {
        match &self.kind {
            InstKind::Parameter { .. }
            | InstKind::Int { .. }
            | InstKind::Global { .. }
            | InstKind::NewObject => Vec::new(),
            InstKind::Add { a, b } | InstKind::Sub { a, b } | InstKind::Cmp { a, b, .. } => {
                vec![*a, *b]
            }
            InstKind::Call { callee, args } => {
                let mut all = vec![*callee];
                all.extend_from_slice(args);
                all
            }
            InstKind::GetAttr { obj, .. } => vec![*obj],
            InstKind::GetLoc { loc } => vec![*loc],
            InstKind::SetLoc { loc, value } => vec![*loc, *value],
        }
    }

    /// Whether the instruction must be emitted even when its result is
    /// never demanded.
    pub fn has_side_effects(&self) -> bool {
        matches!(self.kind, InstKind::Call { .. } | InstKind::SetLoc { .. })
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self.kind, InstKind::Parameter { .. })
    }
}

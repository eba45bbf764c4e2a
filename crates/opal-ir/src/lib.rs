//! Intermediate representation for the opal JIT.
//!
//! Functions own a typed arena of instructions and an ordered list of basic
//! blocks. Blocks use block parameters instead of phi instructions: each
//! predecessor passes matching arguments on its branch.

mod arena;
mod block;
mod dump;
mod function;
mod inst;
pub mod opt;

pub use arena::{Arena, EntityId};
pub use block::{Block, BlockId, Terminator};
pub use dump::dump_function;
pub use function::Function;
pub use inst::{CmpKind, Inst, InstKind, ValueId, ValueType};

/// An interned identifier.
///
/// Interned strings are stable for the lifetime of the process, so their
/// addresses may be baked into generated code.
pub type Name = internment::Intern<String>;

/// Intern a string slice as a [`Name`].
pub fn name(s: &str) -> Name {
    Name::from_ref(s)
}

//! IR builder for constructing opal IR.
//!
//! The builder exposes the append-only construction API the parser drives.
//! It tracks a current block and the per-block variable bindings; it never
//! walks predecessor blocks. Data flow between blocks exists because
//! [`FunctionBuilder::add_block`] turns every binding in scope into a named
//! block parameter of the new block, and terminator construction records the
//! matching flows.

mod function_builder;

pub use function_builder::{BuildError, FunctionBuilder};

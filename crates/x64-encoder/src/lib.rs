//! x86-64 instruction encoder.
//!
//! This crate provides byte-level emitters for the x86-64 subset used by the
//! JIT backend. Code is assembled back-to-front: every emitter pushes the
//! bytes of one instruction in reverse, so a sink that prepends each byte
//! ends up holding the instruction stream in execution order.

mod cond;
mod encode;
mod regs;
mod sink;

pub use cond::Cond;
pub use encode::*;
pub use regs::Reg;
pub use sink::{CodeSink, RevBuf};

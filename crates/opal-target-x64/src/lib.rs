//! x86-64 backend for the opal JIT.
//!
//! Lowering is a single backwards pass per block: the terminator is emitted
//! first, then the instructions in reverse order, so every consumer has
//! already demanded locations for its operands by the time the producer
//! emits. Blocks become chains of code, label and jump segments; the
//! stitcher lays the chains out and relaxes jumps to their short forms.

mod moves;
mod regalloc;
mod segment;
mod shims;
mod state;
mod stitch;
mod vloc;

pub(crate) mod lower;

use std::fmt;

use log::debug;
use opal_ir::{dump_function, opt, BlockId, Function, Name};
use opal_runtime::{HostCallbacks, Value, ERR_TYPE_GUARD};
use x64_encoder as enc;
use x64_encoder::Reg;

use crate::segment::{BlockWriter, LabelId, Segment};
use crate::state::Assembler;

pub use crate::vloc::VLoc;

/// Errors raised while lowering a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// More parameters than argument registers.
    TooManyParameters(usize),
    /// A block reached lowering without a terminator.
    MissingTerminator(BlockId),
    /// A conditional branch flows a name the branching block never bound.
    MissingFlow(Name),
    /// Both scratch registers busy when a stack operand needed one.
    OutOfScratch,
    /// No free register for a branch parameter destination.
    OutOfMoveRegisters,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::TooManyParameters(n) => {
                write!(f, "function has {n} parameters; at most 4 are supported")
            }
            CompileError::MissingTerminator(block) => {
                write!(f, "block {} has no terminator", block.0)
            }
            CompileError::MissingFlow(name) => {
                write!(f, "no binding for '{name}' flows into a branch target")
            }
            CompileError::OutOfScratch => write!(f, "both scratch registers are in use"),
            CompileError::OutOfMoveRegisters => {
                write!(f, "no free register for a branch parameter destination")
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// A lowered function: position-independent machine code, entry at byte 0.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub code: Vec<u8>,
}

/// Optimize and lower `func` to machine code.
///
/// The returned buffer still needs publishing to executable pages. Host
/// entry points from `callbacks` are baked into the code as absolute
/// 64-bit immediates.
pub fn compile_function(
    func: &mut Function,
    callbacks: HostCallbacks,
) -> Result<CompiledFunction, CompileError> {
    opt::optimize(func);
    debug!(
        "compiling '{}': {} blocks, {} values",
        func.name,
        func.block_count(),
        func.insts.len()
    );
    log::trace!("{}", dump_function(func));

    let err_label = LabelId(func.block_count() as u32 + 1);
    let mut asm = Assembler::new(func, callbacks, err_label);
    asm.assign_parameter_abi()?;

    let blocks: Vec<BlockId> = func.blocks.ids().collect();
    let mut lowered = Vec::with_capacity(blocks.len());
    for &block in &blocks {
        lowered.push(asm.lower_block(block)?);
    }

    let frame_bytes = align16(asm.next_slot * 8);
    let mut segments = Vec::new();
    segments.push(Segment::Label(LabelId(0)));
    segments.extend(prologue_segments(frame_bytes));
    for (block, block_segments) in blocks.into_iter().zip(lowered) {
        segments.push(Segment::Label(Assembler::block_label(block)));
        segments.extend(block_segments);
    }
    segments.push(Segment::Label(err_label));
    segments.extend(error_tail_segments(&callbacks));

    let stitched = stitch::stitch(&segments, func.block_count() + 2);
    debug!("compiled '{}' to {} bytes", func.name, stitched.code.len());
    Ok(CompiledFunction {
        code: stitched.code,
    })
}

fn align16(bytes: u32) -> u32 {
    (bytes + 15) & !15
}

/// Forward: `push rbp; mov rbp, rsp; sub rsp, frame`.
fn prologue_segments(frame_bytes: u32) -> Vec<Segment> {
    let mut writer = BlockWriter::new();
    if frame_bytes > 0 {
        enc::sub_r64_imm32(Reg::RSP, frame_bytes as i32, &mut writer);
    }
    enc::mov_r64_r64(Reg::RBP, Reg::RSP, &mut writer);
    enc::push_r64(Reg::RBP, &mut writer);
    writer.finish()
}

/// The shared tail type guards jump to. Forward: report the error through
/// the host callback, then return the error sentinel.
fn error_tail_segments(callbacks: &HostCallbacks) -> Vec<Segment> {
    let mut writer = BlockWriter::new();
    enc::ret(&mut writer);
    enc::pop_r64(Reg::RBP, &mut writer);
    enc::mov_r64_r64(Reg::RSP, Reg::RBP, &mut writer);
    enc::mov_r64_imm64(Reg::RAX, Value::error().raw(), &mut writer);
    enc::add_r64_imm32(Reg::RSP, 32, &mut writer);
    enc::call_r64(Reg::RAX, &mut writer);
    enc::sub_r64_imm32(Reg::RSP, 32, &mut writer);
    enc::mov_r64_imm64(Reg::RAX, callbacks.error, &mut writer);
    enc::mov_r64_imm64(Reg::RCX, u64::from(ERR_TYPE_GUARD), &mut writer);
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_builder::FunctionBuilder;
    use opal_ir::name;

    fn callbacks() -> HostCallbacks {
        HostCallbacks {
            ctx: 0x1000,
            resolve: 0x2000,
            heap: 0x3000,
            object_new: 0x4000,
            attr_ptr: 0x5000,
            error: 0x6000,
        }
    }

    #[test]
    fn test_constant_return_body() {
        // def f() { return 1 + 2; }
        let mut builder = FunctionBuilder::new(name("f"));
        let one = builder.int(1);
        let two = builder.int(2);
        let sum = builder.add(one, two);
        builder.ret(sum);
        let mut func = builder.finish();

        let compiled = compile_function(&mut func, callbacks()).unwrap();
        // Folding produces a single boxed constant; the body is one
        // immediate move plus the epilogue.
        let expected: Vec<u8> = vec![
            0x55, // push rbp
            0x48, 0x89, 0xE5, // mov rbp, rsp
            0x48, 0xB8, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, // mov rax, boxed 3
            0x48, 0x89, 0xEC, // mov rsp, rbp
            0x5D, // pop rbp
            0xC3, // ret
        ];
        assert!(
            compiled.code.starts_with(&expected),
            "unexpected body: {:02x?}",
            &compiled.code[..expected.len().min(compiled.code.len())]
        );
    }

    #[test]
    fn test_parameter_increment_body() {
        // def g(x) { return x + 1; }
        let mut builder = FunctionBuilder::new(name("g"));
        let x = builder.add_parameter(name("x"));
        builder.add_variable(name("x"), x).unwrap();
        let one = builder.int(1);
        let sum = builder.add(x, one);
        builder.ret(sum);
        let mut func = builder.finish();

        let compiled = compile_function(&mut func, callbacks()).unwrap();
        let expected: Vec<u8> = vec![
            0x55, // push rbp
            0x48, 0x89, 0xE5, // mov rbp, rsp
            0x49, 0x89, 0xCD, // mov r13, rcx      (type guard)
            0x49, 0xC1, 0xED, 0x30, // shr r13, 48
            0x41, 0x83, 0xFD, 0x01, // cmp r13d, 1
            0x75, 0x0F, // jne err
            0x89, 0xC8, // mov eax, ecx
            0x83, 0xC0, 0x01, // add eax, 1
            0x48, 0x0F, 0xBA, 0xE8, 0x30, // bts rax, 48
            0x48, 0x89, 0xEC, // mov rsp, rbp
            0x5D, // pop rbp
            0xC3, // ret
        ];
        assert!(
            compiled.code.starts_with(&expected),
            "unexpected body: {:02x?}",
            &compiled.code[..expected.len().min(compiled.code.len())]
        );
    }

    #[test]
    fn test_two_parameter_add_uses_abi_registers() {
        // def swap(a, b) { return a + b; }
        let mut builder = FunctionBuilder::new(name("swap"));
        let a = builder.add_parameter(name("a"));
        let b = builder.add_parameter(name("b"));
        builder.add_variable(name("a"), a).unwrap();
        builder.add_variable(name("b"), b).unwrap();
        let sum = builder.add(a, b);
        builder.ret(sum);
        let mut func = builder.finish();

        let compiled = compile_function(&mut func, callbacks()).unwrap();
        // After the guards: mov eax, ecx; add eax, edx; bts rax, 48.
        let body: &[u8] = &[
            0x89, 0xC8, // mov eax, ecx
            0x01, 0xD0, // add eax, edx
            0x48, 0x0F, 0xBA, 0xE8, 0x30, // bts rax, 48
            0x48, 0x89, 0xEC, // mov rsp, rbp
            0x5D, 0xC3,
        ];
        assert!(
            windows_contains(&compiled.code, body),
            "body sequence not found in {:02x?}",
            compiled.code
        );
    }

    #[test]
    fn test_too_many_parameters() {
        let mut builder = FunctionBuilder::new(name("f"));
        for i in 0..5 {
            let n = name(&format!("p{i}"));
            let p = builder.add_parameter(n);
            builder.add_variable(n, p).unwrap();
        }
        let zero = builder.int(0);
        builder.ret(zero);
        let mut func = builder.finish();

        assert!(matches!(
            compile_function(&mut func, callbacks()),
            Err(CompileError::TooManyParameters(5))
        ));
    }

    #[test]
    fn test_block_without_terminator() {
        let mut builder = FunctionBuilder::new(name("f"));
        builder.int(1);
        let mut func = builder.finish();

        assert!(matches!(
            compile_function(&mut func, callbacks()),
            Err(CompileError::MissingTerminator(_))
        ));
    }

    fn windows_contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }
}

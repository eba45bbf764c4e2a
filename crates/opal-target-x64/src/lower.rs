//! Block lowering: the backwards walk and shared emission helpers.

pub(crate) mod inst;
pub(crate) mod term;

use opal_ir::{BlockId, ValueId, ValueType};
use opal_runtime::Value;
use x64_encoder as enc;
use x64_encoder::{Cond, Reg};

use crate::segment::Segment;
use crate::shims::emit_mov;
use crate::state::Assembler;
use crate::vloc::{frame_disp, VLoc};
use crate::CompileError;

/// A value brought into a register for the span of one instruction.
///
/// Register locations pass through; stack locations borrow a scratch
/// register that the matching `end_*` call releases.
pub(crate) struct SpanReg {
    pub reg: Reg,
    slot: Option<u32>,
}

impl Assembler<'_> {
    /// Windows x64 parameter registers, in order.
    pub const ABI_ARGS: [Reg; 4] = [Reg::RCX, Reg::RDX, Reg::R8, Reg::R9];

    /// Pin the entry block's parameters to the calling convention.
    pub fn assign_parameter_abi(&mut self) -> Result<(), CompileError> {
        let entry = self.func.entry_block();
        let params = self.func.blocks[entry].params().to_vec();
        if params.len() > Self::ABI_ARGS.len() {
            return Err(CompileError::TooManyParameters(params.len()));
        }
        for (index, &param) in params.iter().enumerate() {
            self.set_entry_loc(param, VLoc::Reg(Self::ABI_ARGS[index]));
        }
        Ok(())
    }

    /// Lower one block: the terminator first, then the instructions in
    /// reverse. Consumers therefore run before producers and communicate
    /// demand through the location tables.
    pub fn lower_block(&mut self, block: BlockId) -> Result<Vec<Segment>, CompileError> {
        self.begin_block(block);
        let terminator = self.func.blocks[block]
            .terminator
            .clone()
            .ok_or(CompileError::MissingTerminator(block))?;
        term::emit_terminator(self, &terminator)?;

        let insts = self.func.blocks[block].insts.clone();
        for &value in insts.iter().rev() {
            inst::emit_instruction(self, value)?;
        }
        Ok(self.finish_block())
    }

    /// Begin reading `loc` through a register. `end_read` emits the load
    /// that fills a scratch register (it executes before everything emitted
    /// within the span) and releases it.
    pub fn begin_read(&mut self, loc: VLoc) -> Result<SpanReg, CompileError> {
        match loc {
            VLoc::Reg(reg) => Ok(SpanReg { reg, slot: None }),
            VLoc::Stack(slot) => {
                let reg = self.scratch()?;
                Ok(SpanReg {
                    reg,
                    slot: Some(slot),
                })
            }
        }
    }

    pub fn end_read(&mut self, span: SpanReg) {
        if let Some(slot) = span.slot {
            enc::load_r64_mem(span.reg, Reg::RBP, frame_disp(slot), &mut self.writer);
            self.unmark_reg(span.reg);
        }
    }

    /// Begin writing `loc` through a register. For stack locations this
    /// emits the store immediately (it executes after everything emitted
    /// within the span); the span code then fills the register.
    pub fn begin_write(&mut self, loc: VLoc) -> Result<SpanReg, CompileError> {
        match loc {
            VLoc::Reg(reg) => Ok(SpanReg { reg, slot: None }),
            VLoc::Stack(slot) => {
                let reg = self.scratch()?;
                enc::store_mem_r64(Reg::RBP, frame_disp(slot), reg, &mut self.writer);
                Ok(SpanReg {
                    reg,
                    slot: Some(slot),
                })
            }
        }
    }

    pub fn end_write(&mut self, span: SpanReg) {
        if span.slot.is_some() {
            self.unmark_reg(span.reg);
        }
    }

    /// Guard that `value` carries the integer tag at run time. Values whose
    /// producer is statically integer skip the check. The failing path
    /// jumps to the function's shared error tail.
    ///
    /// Forward shape: `mov tmp, loc; shr tmp, 48; cmp tmp, 1; jne err`.
    pub fn emit_type_guard(&mut self, value: ValueId) -> Result<(), CompileError> {
        if self.func.inst(value).ty == ValueType::Int {
            return Ok(());
        }
        let loc = self
            .loc(value)
            .expect("guarded operand must have been assigned");
        let tmp = self.scratch()?;
        self.writer
            .emit_jump(enc::jcc_forms(Cond::NotEqual), self.err_label);
        enc::cmp_r32_imm32(tmp, Value::INT_TAG as i32, &mut self.writer);
        enc::shr_r64_imm8(tmp, Value::INT_TAG_BIT, &mut self.writer);
        emit_mov(VLoc::Reg(tmp), loc, &mut self.writer);
        self.unmark_reg(tmp);
        Ok(())
    }

    /// Which of the caller-saved RAX/RCX/RDX currently hold live values and
    /// must be preserved around a runtime call.
    pub fn call_live(&self) -> [bool; 3] {
        [
            self.used[Reg::RAX.num() as usize],
            self.used[Reg::RCX.num() as usize],
            self.used[Reg::RDX.num() as usize],
        ]
    }
}

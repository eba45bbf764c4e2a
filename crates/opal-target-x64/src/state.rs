//! Per-compilation assembler state.

use opal_ir::{BlockId, Function, ValueId};
use opal_runtime::HostCallbacks;
use x64_encoder::Reg;

use crate::segment::{BlockWriter, LabelId, Segment};
use crate::vloc::VLoc;

/// State threaded through the lowering of one function.
///
/// Location tables and the stack-slot high-water mark live for the whole
/// function; the used-register vector and the segment writer restart with
/// every block.
pub(crate) struct Assembler<'f> {
    pub func: &'f Function,
    pub callbacks: HostCallbacks,
    /// Result location of each value, assigned at most once.
    pub locs: Vec<Option<VLoc>>,
    /// Where each block parameter's value arrives at block entry.
    pub entry_locs: Vec<Option<VLoc>>,
    /// Stack-slot high-water mark; slots are never released.
    pub next_slot: u32,
    pub used: [bool; 16],
    pub writer: BlockWriter,
    pub block: BlockId,
    pub err_label: LabelId,
}

impl<'f> Assembler<'f> {
    pub fn new(func: &'f Function, callbacks: HostCallbacks, err_label: LabelId) -> Self {
        let values = func.insts.len();
        Self {
            func,
            callbacks,
            locs: vec![None; values],
            entry_locs: vec![None; values],
            next_slot: 0,
            used: [false; 16],
            writer: BlockWriter::new(),
            block: func.entry_block(),
            err_label,
        }
    }

    /// Reset the per-block state. The sentinel slots (RSP, RBP) and the
    /// callee-saved registers start marked so the allocator never hands
    /// them out; the scratch registers stay outside the general pool.
    pub fn begin_block(&mut self, block: BlockId) {
        self.block = block;
        self.writer = BlockWriter::new();
        self.used = [false; 16];
        for reg in [
            Reg::RBX,
            Reg::RSP,
            Reg::RBP,
            Reg::RSI,
            Reg::RDI,
            Reg::R14,
            Reg::R15,
        ] {
            self.used[reg.num() as usize] = true;
        }
    }

    pub fn finish_block(&mut self) -> Vec<Segment> {
        std::mem::take(&mut self.writer).finish()
    }

    /// Label of a block's entry point. Label 0 is the function start.
    pub fn block_label(block: BlockId) -> LabelId {
        LabelId(block.0 + 1)
    }

    pub fn loc(&self, value: ValueId) -> Option<VLoc> {
        self.locs[value.0 as usize]
    }

    pub fn entry_loc(&self, value: ValueId) -> Option<VLoc> {
        self.entry_locs[value.0 as usize]
    }

    pub fn mark_reg(&mut self, reg: Reg) {
        debug_assert!(
            !self.used[reg.num() as usize],
            "marking a register that is already in use"
        );
        self.used[reg.num() as usize] = true;
    }

    pub fn unmark_reg(&mut self, reg: Reg) {
        debug_assert!(
            self.used[reg.num() as usize],
            "releasing a register that is not in use"
        );
        self.used[reg.num() as usize] = false;
    }

    pub fn mark_loc(&mut self, loc: VLoc) {
        if let VLoc::Reg(reg) = loc {
            self.mark_reg(reg);
        }
    }

    pub fn unmark_loc(&mut self, loc: VLoc) {
        if let VLoc::Reg(reg) = loc {
            self.unmark_reg(reg);
        }
    }

    /// Whether adopting `loc` would collide with a live register. Stack
    /// locations are never tracked here.
    pub fn is_marked(&self, loc: VLoc) -> bool {
        match loc {
            VLoc::Reg(reg) => self.used[reg.num() as usize],
            VLoc::Stack(_) => false,
        }
    }
}

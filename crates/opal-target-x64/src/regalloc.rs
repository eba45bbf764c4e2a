//! Demand-driven location assignment.
//!
//! Emission walks each block backwards, so a value's consumers run before
//! its producer. A consumer demands an operand by assigning it a location
//! and marking that location used; the producer later releases the location
//! and emits code that materialises the value there.

use log::trace;
use opal_ir::{EntityId, InstKind, ValueId};
use x64_encoder::Reg;

use crate::state::Assembler;
use crate::vloc::VLoc;
use crate::CompileError;

/// Registers the allocator may hand out, lowest encoding first.
const POOL: [Reg; 7] = [
    Reg::RAX,
    Reg::RCX,
    Reg::RDX,
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
];

impl Assembler<'_> {
    /// Lowest-numbered free register of the general pool.
    pub fn get_unused(&self) -> Option<Reg> {
        POOL.into_iter().find(|r| !self.used[r.num() as usize])
    }

    /// Acquire a free scratch register (R12/R13). The scratch registers are
    /// reserved for stack-slot traffic and type guards and are never
    /// assigned to values.
    pub fn scratch(&mut self) -> Result<Reg, CompileError> {
        for reg in [Reg::TMP2, Reg::TMP1] {
            if !self.used[reg.num() as usize] {
                self.mark_reg(reg);
                return Ok(reg);
            }
        }
        Err(CompileError::OutOfScratch)
    }

    pub fn alloc_slot(&mut self) -> u32 {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    /// Assign a location to `value` if it does not have one yet.
    ///
    /// Order of preference: the existing location; the value's own
    /// parameter entry location when free; the caller's suggestion when
    /// free; the lowest free pool register; a fresh stack slot. The chosen
    /// location is marked used.
    pub fn assign_value_loc(&mut self, value: ValueId, suggested: Option<VLoc>) -> VLoc {
        if let Some(loc) = self.loc(value) {
            return loc;
        }
        let inst = self.func.inst(value);
        let entry = if inst.is_parameter() {
            self.entry_loc(value)
        } else {
            None
        };
        let loc = if let Some(entry) = entry.filter(|&e| !self.is_marked(e)) {
            entry
        } else if let Some(suggested) = suggested.filter(|&s| !self.is_marked(s)) {
            suggested
        } else if let Some(reg) = self.get_unused() {
            VLoc::Reg(reg)
        } else {
            VLoc::Stack(self.alloc_slot())
        };
        trace!(
            "assign v{} -> {:?} ({:?})",
            value.into_usize(),
            loc,
            kind_name(&inst.kind)
        );
        self.locs[value.0 as usize] = Some(loc);
        self.mark_loc(loc);
        loc
    }

    /// Record where a block parameter's value must arrive at block entry.
    pub fn set_entry_loc(&mut self, param: ValueId, loc: VLoc) {
        debug_assert!(self.func.inst(param).is_parameter());
        self.entry_locs[param.0 as usize] = Some(loc);
    }
}

fn kind_name(kind: &InstKind) -> &'static str {
    match kind {
        InstKind::Parameter { .. } => "parameter",
        InstKind::Int { .. } => "int",
        InstKind::Add { .. } => "add",
        InstKind::Sub { .. } => "sub",
        InstKind::Cmp { .. } => "cmp",
        InstKind::Global { .. } => "global",
        InstKind::Call { .. } => "call",
        InstKind::NewObject => "new_object",
        InstKind::GetAttr { .. } => "get_attr",
        InstKind::GetLoc { .. } => "get_loc",
        InstKind::SetLoc { .. } => "set_loc",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_ir::{name, Function, InstKind};
    use opal_runtime::HostCallbacks;

    use crate::segment::LabelId;

    fn callbacks() -> HostCallbacks {
        HostCallbacks {
            ctx: 0,
            resolve: 0,
            heap: 0,
            object_new: 0,
            attr_ptr: 0,
            error: 0,
        }
    }

    fn test_func() -> Function {
        let mut func = Function::new(name("t"));
        let entry = func.entry_block();
        for _ in 0..12 {
            func.append_inst(entry, InstKind::Int { constant: 0 });
        }
        func
    }

    #[test]
    fn test_pool_order() {
        let func = test_func();
        let mut asm = Assembler::new(&func, callbacks(), LabelId(9));
        asm.begin_block(func.entry_block());

        let a = asm.assign_value_loc(ValueId(0), None);
        let b = asm.assign_value_loc(ValueId(1), None);
        assert_eq!(a, VLoc::Reg(Reg::RAX));
        assert_eq!(b, VLoc::Reg(Reg::RCX));
    }

    #[test]
    fn test_existing_location_wins() {
        let func = test_func();
        let mut asm = Assembler::new(&func, callbacks(), LabelId(9));
        asm.begin_block(func.entry_block());

        let first = asm.assign_value_loc(ValueId(0), None);
        let again = asm.assign_value_loc(ValueId(0), Some(VLoc::Reg(Reg::R10)));
        assert_eq!(first, again);
    }

    #[test]
    fn test_suggestion_taken_when_free() {
        let func = test_func();
        let mut asm = Assembler::new(&func, callbacks(), LabelId(9));
        asm.begin_block(func.entry_block());

        let loc = asm.assign_value_loc(ValueId(0), Some(VLoc::Reg(Reg::R10)));
        assert_eq!(loc, VLoc::Reg(Reg::R10));

        // A marked suggestion falls through to the pool.
        let other = asm.assign_value_loc(ValueId(1), Some(VLoc::Reg(Reg::R10)));
        assert_eq!(other, VLoc::Reg(Reg::RAX));
    }

    #[test]
    fn test_exhausted_pool_spills() {
        let func = test_func();
        let mut asm = Assembler::new(&func, callbacks(), LabelId(9));
        asm.begin_block(func.entry_block());

        for i in 0..7 {
            assert!(asm.assign_value_loc(ValueId(i), None).is_reg());
        }
        let spilled = asm.assign_value_loc(ValueId(7), None);
        assert_eq!(spilled, VLoc::Stack(0));
        let spilled2 = asm.assign_value_loc(ValueId(8), None);
        assert_eq!(spilled2, VLoc::Stack(1));
        assert_eq!(asm.next_slot, 2);
    }

    #[test]
    fn test_scratch_prefers_second_tmp() {
        let func = test_func();
        let mut asm = Assembler::new(&func, callbacks(), LabelId(9));
        asm.begin_block(func.entry_block());

        let first = asm.scratch().unwrap();
        let second = asm.scratch().unwrap();
        assert_eq!(first, Reg::TMP2);
        assert_eq!(second, Reg::TMP1);
        assert!(matches!(asm.scratch(), Err(CompileError::OutOfScratch)));
        asm.unmark_reg(first);
        asm.unmark_reg(second);
    }
}

//! Functions.

use crate::{Arena, Block, BlockId, Inst, InstKind, Name, Terminator, ValueId};

/// A function in the IR.
///
/// Owns the instruction arena and the ordered block list. Block 0 is the
/// entry block.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: Name,
    pub insts: Arena<ValueId, Inst>,
    pub blocks: Arena<BlockId, Block>,
}

impl Function {
    /// Create a function with an empty entry block.
    pub fn new(name: Name) -> Self {
        let mut blocks = Arena::new();
        blocks.alloc(Block::new());
        Self {
            name,
            insts: Arena::new(),
            blocks,
        }
    }

    pub fn entry_block(&self) -> BlockId {
        BlockId(0)
    }

    pub fn add_block(&mut self) -> BlockId {
        self.blocks.alloc(Block::new())
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn inst(&self, value: ValueId) -> &Inst {
        &self.insts[value]
    }

    pub fn inst_mut(&mut self, value: ValueId) -> &mut Inst {
        &mut self.insts[value]
    }

    /// Allocate an instruction and append it to `block`.
    pub fn append_inst(&mut self, block: BlockId, kind: InstKind) -> ValueId {
        let is_param = matches!(kind, InstKind::Parameter { .. });
        let value = self.insts.alloc(Inst::new(kind));
        let block = &mut self.blocks[block];
        if is_param {
            debug_assert_eq!(
                block.insts.len(),
                block.num_params as usize,
                "parameters must form the block prefix"
            );
            block.num_params += 1;
        }
        block.push_inst(value);
        value
    }

    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator) {
        self.blocks[block].terminator = Some(terminator);
    }

    /// Bump the use count of `value`.
    pub fn add_ref(&mut self, value: ValueId) {
        self.insts[value].refs += 1;
    }

    /// Drop one use of `value`.
    pub fn dec_ref(&mut self, value: ValueId) {
        let inst = &mut self.insts[value];
        debug_assert!(inst.refs > 0, "use count underflow");
        inst.refs = inst.refs.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name;

    #[test]
    fn test_function_creation() {
        let func = Function::new(name("f"));
        assert_eq!(func.block_count(), 1);
        assert_eq!(func.entry_block(), BlockId(0));
    }

    #[test]
    fn test_append_inst() {
        let mut func = Function::new(name("f"));
        let entry = func.entry_block();
        let v = func.append_inst(entry, InstKind::Int { constant: 42 });
        assert_eq!(v, ValueId(0));
        assert_eq!(func.blocks[entry].inst_count(), 1);
        assert_eq!(func.inst(v).kind, InstKind::Int { constant: 42 });
    }

    #[test]
    fn test_parameter_prefix_tracking() {
        let mut func = Function::new(name("f"));
        let entry = func.entry_block();
        let p0 = func.append_inst(entry, InstKind::Parameter { name: Some(name("a")) });
        let p1 = func.append_inst(entry, InstKind::Parameter { name: Some(name("b")) });
        func.append_inst(entry, InstKind::Int { constant: 1 });
        assert_eq!(func.blocks[entry].params(), &[p0, p1]);
    }

    #[test]
    fn test_ref_counting() {
        let mut func = Function::new(name("f"));
        let entry = func.entry_block();
        let v = func.append_inst(entry, InstKind::Int { constant: 1 });
        func.add_ref(v);
        func.add_ref(v);
        assert_eq!(func.inst(v).refs, 2);
        func.dec_ref(v);
        assert_eq!(func.inst(v).refs, 1);
    }
}

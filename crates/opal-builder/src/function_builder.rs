//! Function builder.

use std::fmt;

use opal_ir::{BlockId, CmpKind, Function, InstKind, Name, Terminator, ValueId};

/// Maximum number of call arguments the backend can place in registers.
const MAX_CALL_ARGS: usize = 4;

/// Errors raised while constructing IR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// `let` of a name already bound in the current block.
    DuplicateVariable(Name),
    /// Assignment to or flow of a name with no binding in the current block.
    UndefinedVariable(Name),
    /// More than [`MAX_CALL_ARGS`] arguments on one call.
    TooManyArguments,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::DuplicateVariable(name) => {
                write!(f, "variable '{name}' is already defined")
            }
            BuildError::UndefinedVariable(name) => write!(f, "undefined variable '{name}'"),
            BuildError::TooManyArguments => {
                write!(f, "calls support at most {MAX_CALL_ARGS} arguments")
            }
        }
    }
}

impl std::error::Error for BuildError {}

/// Builder for one function.
#[derive(Debug)]
pub struct FunctionBuilder {
    function: Function,
    current_block: BlockId,
}

impl FunctionBuilder {
    pub fn new(name: Name) -> Self {
        let function = Function::new(name);
        let current_block = function.entry_block();
        Self {
            function,
            current_block,
        }
    }

    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    pub fn is_terminated(&self) -> bool {
        self.function.blocks[self.current_block].is_terminated()
    }

    /// Create a new block whose parameters mirror every variable currently
    /// in scope. This is where phis come from: the branch that later targets
    /// the block passes the then-current bindings as arguments.
    pub fn add_block(&mut self) -> BlockId {
        let block = self.function.add_block();
        let names: Vec<Name> = self
            .function
            .blocks[self.current_block]
            .variables
            .keys()
            .copied()
            .collect();
        for name in names {
            let param = self
                .function
                .append_inst(block, InstKind::Parameter { name: Some(name) });
            self.function.blocks[block].variables.insert(name, param);
        }
        block
    }

    pub fn enter_block(&mut self, block: BlockId) {
        self.current_block = block;
    }

    /// Append a named parameter to the current block (function parameters).
    pub fn add_parameter(&mut self, name: Name) -> ValueId {
        self.function
            .append_inst(self.current_block, InstKind::Parameter { name: Some(name) })
    }

    pub fn add_variable(&mut self, name: Name, value: ValueId) -> Result<ValueId, BuildError> {
        let vars = &mut self.function.blocks[self.current_block].variables;
        if vars.contains_key(&name) {
            return Err(BuildError::DuplicateVariable(name));
        }
        vars.insert(name, value);
        Ok(value)
    }

    pub fn set_variable(&mut self, name: Name, value: ValueId) -> Result<ValueId, BuildError> {
        let vars = &mut self.function.blocks[self.current_block].variables;
        match vars.get_mut(&name) {
            Some(slot) => {
                *slot = value;
                Ok(value)
            }
            None => Err(BuildError::UndefinedVariable(name)),
        }
    }

    pub fn get_variable(&self, name: Name) -> Option<ValueId> {
        self.function.blocks[self.current_block]
            .variables
            .get(&name)
            .copied()
    }

    // region Instructions

    fn append(&mut self, kind: InstKind) -> ValueId {
        let operands: Vec<ValueId> = match &kind {
            InstKind::Add { a, b } | InstKind::Sub { a, b } | InstKind::Cmp { a, b, .. } => {
                vec![*a, *b]
            }
            InstKind::Call { callee, .. } => vec![*callee],
            InstKind::GetAttr { obj, .. } => vec![*obj],
            InstKind::GetLoc { loc } => vec![*loc],
            InstKind::SetLoc { loc, value } => vec![*loc, *value],
            _ => Vec::new(),
        };
        for operand in &operands {
            self.function.add_ref(*operand);
        }
        self.function.append_inst(self.current_block, kind)
    }

    pub fn int(&mut self, constant: i32) -> ValueId {
        self.append(InstKind::Int { constant })
    }

    pub fn add(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.append(InstKind::Add { a, b })
    }

    pub fn sub(&mut self, a: ValueId, b: ValueId) -> ValueId {
        self.append(InstKind::Sub { a, b })
    }

    pub fn cmp(&mut self, kind: CmpKind, a: ValueId, b: ValueId) -> ValueId {
        self.append(InstKind::Cmp { kind, a, b })
    }

    pub fn global(&mut self, name: Name) -> ValueId {
        self.append(InstKind::Global { name })
    }

    pub fn new_object(&mut self) -> ValueId {
        self.append(InstKind::NewObject)
    }

    pub fn get_attr(&mut self, obj: ValueId, name: Name) -> ValueId {
        self.append(InstKind::GetAttr { obj, name })
    }

    pub fn get_loc(&mut self, loc: ValueId) -> ValueId {
        self.append(InstKind::GetLoc { loc })
    }

    pub fn set_loc(&mut self, loc: ValueId, value: ValueId) -> ValueId {
        self.append(InstKind::SetLoc { loc, value })
    }

    pub fn call(&mut self, callee: ValueId) -> ValueId {
        self.append(InstKind::Call {
            callee,
            args: Vec::new(),
        })
    }

    /// Attach one more argument to a previously created call.
    pub fn call_argument(&mut self, call: ValueId, arg: ValueId) -> Result<(), BuildError> {
        let arity = match &self.function.inst(call).kind {
            InstKind::Call { args, .. } => args.len(),
            _ => unreachable!("call_argument on a non-call value"),
        };
        if arity >= MAX_CALL_ARGS {
            return Err(BuildError::TooManyArguments);
        }
        self.function.add_ref(arg);
        match &mut self.function.inst_mut(call).kind {
            InstKind::Call { args, .. } => args.push(arg),
            _ => unreachable!(),
        }
        Ok(())
    }

    // endregion

    // region Terminators

    pub fn ret(&mut self, value: ValueId) {
        self.function.add_ref(value);
        self.function
            .set_terminator(self.current_block, Terminator::Return { value });
    }

    /// Terminate the current block with a jump. Arguments are collected
    /// positionally: for every parameter of the target, the current binding
    /// of the parameter's name.
    pub fn branch(&mut self, target: BlockId) -> Result<(), BuildError> {
        let args = self.collect_flows(target)?;
        for &arg in &args {
            self.function.add_ref(arg);
        }
        self.function
            .set_terminator(self.current_block, Terminator::Branch { target, args });
        Ok(())
    }

    /// Terminate the current block with a conditional branch. No arguments
    /// are stored; the lowering resolves flows through the variable map. The
    /// flows still count as uses of the flowed values.
    pub fn cbranch(
        &mut self,
        cond: ValueId,
        true_target: BlockId,
        false_target: BlockId,
    ) -> Result<(), BuildError> {
        self.function.add_ref(cond);
        for target in [true_target, false_target] {
            let flows = self.collect_flows(target)?;
            for arg in flows {
                self.function.add_ref(arg);
            }
        }
        self.function.set_terminator(
            self.current_block,
            Terminator::CBranch {
                cond,
                true_target,
                false_target,
            },
        );
        Ok(())
    }

    fn collect_flows(&self, target: BlockId) -> Result<Vec<ValueId>, BuildError> {
        let params = self.function.blocks[target].params().to_vec();
        let vars = &self.function.blocks[self.current_block].variables;
        let mut args = Vec::with_capacity(params.len());
        for param in params {
            let name = match self.function.inst(param).kind {
                InstKind::Parameter { name: Some(name) } => name,
                _ => continue,
            };
            match vars.get(&name) {
                Some(&value) => args.push(value),
                None => return Err(BuildError::UndefinedVariable(name)),
            }
        }
        Ok(args)
    }

    // endregion

    pub fn finish(self) -> Function {
        self.function
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_ir::name;

    #[test]
    fn test_build_add_function() {
        // def add(a, b) { return a + b; }
        let mut builder = FunctionBuilder::new(name("add"));
        let a = builder.add_parameter(name("a"));
        let b = builder.add_parameter(name("b"));
        builder.add_variable(name("a"), a).unwrap();
        builder.add_variable(name("b"), b).unwrap();
        let sum = builder.add(a, b);
        builder.ret(sum);

        let func = builder.finish();
        let entry = func.entry_block();
        assert_eq!(func.blocks[entry].num_params, 2);
        assert_eq!(func.inst(a).refs, 1);
        assert_eq!(func.inst(b).refs, 1);
        assert_eq!(func.inst(sum).refs, 1);
        assert!(matches!(
            func.blocks[entry].terminator,
            Some(Terminator::Return { value }) if value == sum
        ));
    }

    #[test]
    fn test_add_block_copies_scope() {
        let mut builder = FunctionBuilder::new(name("f"));
        let x = builder.int(0);
        builder.add_variable(name("x"), x).unwrap();

        let next = builder.add_block();
        builder.branch(next).unwrap();

        let func = builder.finish();
        assert_eq!(func.blocks[next].num_params, 1);
        let param = func.blocks[next].params()[0];
        assert_eq!(
            func.inst(param).kind,
            InstKind::Parameter { name: Some(name("x")) }
        );
        // The branch flow counts as a use of x.
        assert_eq!(func.inst(x).refs, 1);
        assert!(matches!(
            &func.blocks[func.entry_block()].terminator,
            Some(Terminator::Branch { args, .. }) if args == &vec![x]
        ));
    }

    #[test]
    fn test_branch_args_follow_rebinding() {
        let mut builder = FunctionBuilder::new(name("f"));
        let x0 = builder.int(0);
        builder.add_variable(name("x"), x0).unwrap();
        let next = builder.add_block();

        // Rebind x after the target block was created.
        let x1 = builder.int(1);
        builder.set_variable(name("x"), x1).unwrap();
        builder.branch(next).unwrap();

        let func = builder.finish();
        assert!(matches!(
            &func.blocks[func.entry_block()].terminator,
            Some(Terminator::Branch { args, .. }) if args == &vec![x1]
        ));
        assert_eq!(func.inst(x0).refs, 0);
        assert_eq!(func.inst(x1).refs, 1);
    }

    #[test]
    fn test_duplicate_variable() {
        let mut builder = FunctionBuilder::new(name("f"));
        let v = builder.int(0);
        builder.add_variable(name("x"), v).unwrap();
        assert_eq!(
            builder.add_variable(name("x"), v),
            Err(BuildError::DuplicateVariable(name("x")))
        );
    }

    #[test]
    fn test_set_undefined_variable() {
        let mut builder = FunctionBuilder::new(name("f"));
        let v = builder.int(0);
        assert_eq!(
            builder.set_variable(name("y"), v),
            Err(BuildError::UndefinedVariable(name("y")))
        );
    }

    #[test]
    fn test_call_arity_limit() {
        let mut builder = FunctionBuilder::new(name("f"));
        let callee = builder.global(name("g"));
        let call = builder.call(callee);
        for _ in 0..4 {
            let arg = builder.int(1);
            builder.call_argument(call, arg).unwrap();
        }
        let extra = builder.int(5);
        assert_eq!(
            builder.call_argument(call, extra),
            Err(BuildError::TooManyArguments)
        );
    }

    #[test]
    fn test_cbranch_counts_flows() {
        let mut builder = FunctionBuilder::new(name("f"));
        let x = builder.int(3);
        builder.add_variable(name("x"), x).unwrap();
        let t = builder.add_block();
        let e = builder.add_block();
        let cond = builder.cmp(CmpKind::Less, x, x);
        builder.cbranch(cond, t, e).unwrap();

        let func = builder.finish();
        // Two cmp uses plus one flow per target.
        assert_eq!(func.inst(x).refs, 4);
        assert_eq!(func.inst(cond).refs, 1);
    }
}

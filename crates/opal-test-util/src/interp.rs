//! Reference interpreter for the integer subset of the IR.
//!
//! Covers parameters, constants, arithmetic, comparisons and control flow.
//! Compiled code must agree with it on every integer program; that is the
//! backend's core correctness contract.

use std::collections::BTreeMap;
use std::fmt;

use opal_ir::{CmpKind, Function, InstKind, Terminator, ValueId};

const STEP_LIMIT: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpError {
    /// The function uses instructions outside the integer subset.
    Unsupported(&'static str),
    /// The step budget ran out (probably a non-terminating loop).
    StepLimit,
    /// A value was read before any definition reached it.
    Undefined(ValueId),
    /// Fell off a block with no terminator.
    NoTerminator,
    /// Fewer arguments than entry parameters.
    MissingArgument(usize),
}

impl fmt::Display for InterpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpError::Unsupported(kind) => {
                write!(f, "instruction '{kind}' is outside the interpreted subset")
            }
            InterpError::StepLimit => write!(f, "step limit exceeded"),
            InterpError::Undefined(value) => write!(f, "value {} read before definition", value.0),
            InterpError::NoTerminator => write!(f, "block has no terminator"),
            InterpError::MissingArgument(index) => {
                write!(f, "no argument for parameter {index}")
            }
        }
    }
}

impl std::error::Error for InterpError {}

/// Evaluate `func` on integer arguments.
pub fn interpret(func: &Function, args: &[i32]) -> Result<i32, InterpError> {
    let mut env: BTreeMap<ValueId, i32> = BTreeMap::new();
    let entry = func.entry_block();
    for (index, &param) in func.blocks[entry].params().iter().enumerate() {
        let value = *args.get(index).ok_or(InterpError::MissingArgument(index))?;
        env.insert(param, value);
    }

    let mut block = entry;
    let mut steps = 0u64;
    loop {
        steps += 1;
        if steps > STEP_LIMIT {
            return Err(InterpError::StepLimit);
        }

        for &value in &func.blocks[block].insts {
            let result = match &func.inst(value).kind {
                InstKind::Parameter { .. } => continue,
                InstKind::Int { constant } => *constant,
                InstKind::Add { a, b } => get(&env, *a)?.wrapping_add(get(&env, *b)?),
                InstKind::Sub { a, b } => get(&env, *a)?.wrapping_sub(get(&env, *b)?),
                InstKind::Cmp { kind, a, b } => {
                    let a = get(&env, *a)?;
                    let b = get(&env, *b)?;
                    let holds = match kind {
                        CmpKind::Less => a < b,
                        CmpKind::Greater => a > b,
                        CmpKind::Equal => a == b,
                        CmpKind::NotEqual => a != b,
                        CmpKind::LessEq => a <= b,
                        CmpKind::GreaterEq => a >= b,
                    };
                    holds as i32
                }
                InstKind::Global { .. } => return Err(InterpError::Unsupported("global")),
                InstKind::Call { .. } => return Err(InterpError::Unsupported("call")),
                InstKind::NewObject => return Err(InterpError::Unsupported("new_object")),
                InstKind::GetAttr { .. } => return Err(InterpError::Unsupported("get_attr")),
                InstKind::GetLoc { .. } => return Err(InterpError::Unsupported("get_loc")),
                InstKind::SetLoc { .. } => return Err(InterpError::Unsupported("set_loc")),
            };
            env.insert(value, result);
        }

        match func.blocks[block]
            .terminator
            .as_ref()
            .ok_or(InterpError::NoTerminator)?
        {
            Terminator::Return { value } => return get(&env, *value),
            Terminator::Branch { target, args } => {
                let params = func.blocks[*target].params().to_vec();
                let mut bound = Vec::with_capacity(params.len());
                for (index, param) in params.iter().enumerate() {
                    if let Some(&arg) = args.get(index) {
                        bound.push((*param, get(&env, arg)?));
                    }
                }
                env.extend(bound);
                block = *target;
            }
            Terminator::CBranch {
                cond,
                true_target,
                false_target,
            } => {
                let target = if get(&env, *cond)? != 0 {
                    *true_target
                } else {
                    *false_target
                };
                // Flows resolve through the branching block's variable map,
                // exactly as the backend does it.
                let vars = &func.blocks[block].variables;
                let params = func.blocks[target].params().to_vec();
                let mut bound = Vec::with_capacity(params.len());
                for param in params {
                    if let InstKind::Parameter { name: Some(name) } = func.inst(param).kind {
                        if let Some(&flowed) = vars.get(&name) {
                            bound.push((param, get(&env, flowed)?));
                        }
                    }
                }
                env.extend(bound);
                block = target;
            }
        }
    }
}

fn get(env: &BTreeMap<ValueId, i32>, value: ValueId) -> Result<i32, InterpError> {
    env.get(&value).copied().ok_or(InterpError::Undefined(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(source: &str) -> Function {
        opal_lang::parse_source(source)
            .unwrap()
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn test_constant() {
        let func = parse_one("def f() { return 1 + 2; }");
        assert_eq!(interpret(&func, &[]), Ok(3));
    }

    #[test]
    fn test_parameters() {
        let func = parse_one("def f(a, b) { return a - b; }");
        assert_eq!(interpret(&func, &[10, 4]), Ok(6));
    }

    #[test]
    fn test_while_loop() {
        let func = parse_one("def h(x) { let y = x; while (y) { y = y - 1; } return y; }");
        assert_eq!(interpret(&func, &[5]), Ok(0));
    }

    #[test]
    fn test_if_else() {
        let func = parse_one("def max(a, b) { if (a < b) { return b; } else { return a; } }");
        assert_eq!(interpret(&func, &[2, 7]), Ok(7));
        assert_eq!(interpret(&func, &[7, 2]), Ok(7));
    }

    #[test]
    fn test_wrapping_add() {
        let func = parse_one("def f(x) { return x + 1; }");
        assert_eq!(interpret(&func, &[i32::MAX]), Ok(i32::MIN));
    }

    #[test]
    fn test_unsupported() {
        let func = parse_one("def f() { return g(); }");
        assert!(matches!(
            interpret(&func, &[]),
            Err(InterpError::Unsupported(_))
        ));
    }

    #[test]
    fn test_infinite_loop_hits_limit() {
        let func = parse_one("def f() { while (1) { let x = 0; } return 0; }");
        assert_eq!(interpret(&func, &[]), Err(InterpError::StepLimit));
    }
}

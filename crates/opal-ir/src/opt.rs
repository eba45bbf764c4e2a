//! IR optimization: local peephole folding and dead-parameter pruning.
//!
//! Runs once before lowering. Both passes are idempotent: a second run over
//! already-optimized IR changes nothing.

use crate::{Function, InstKind, Terminator, ValueId};

/// Optimize a function in place.
pub fn optimize(func: &mut Function) {
    let blocks: Vec<_> = func.blocks.ids().collect();
    for &block in &blocks {
        let insts = func.blocks[block].insts.clone();
        for value in insts {
            while try_fold(func, value) {}
        }
    }
    prune_dead_parameters(func);
}

/// Apply one folding rewrite to `value`; true if anything changed.
fn try_fold(func: &mut Function, value: ValueId) -> bool {
    let (a, b) = match func.inst(value).kind {
        InstKind::Add { a, b } => (a, b),
        _ => return false,
    };

    let a_const = as_int(func, a);
    let b_const = as_int(func, b);

    // Add(Int, Int) -> Int
    if let (Some(ca), Some(cb)) = (a_const, b_const) {
        func.inst_mut(value).kind = InstKind::Int {
            constant: ca.wrapping_add(cb),
        };
        func.dec_ref(a);
        func.dec_ref(b);
        return true;
    }

    // Add(Int c1, Add(Int c2, x)) -> Add(Int(c1+c2), x), and the three
    // symmetric orderings. The inner add, the inner constant and the outer
    // constant must all be single-use: the outer constant's instruction is
    // rewritten in place to hold the combined value.
    if let Some(outer) = a_const {
        if func.inst(a).refs == 1 {
            if let Some((inner_const_val, inner_const, inner_val)) = single_use_inner_add(func, b) {
                func.inst_mut(a).kind = InstKind::Int {
                    constant: outer.wrapping_add(inner_const_val),
                };
                func.inst_mut(value).kind = InstKind::Add { a, b: inner_val };
                func.dec_ref(b);
                func.dec_ref(inner_const);
                return true;
            }
        }
    }
    if let Some(outer) = b_const {
        if func.inst(b).refs == 1 {
            if let Some((inner_const_val, inner_const, inner_val)) = single_use_inner_add(func, a) {
                func.inst_mut(b).kind = InstKind::Int {
                    constant: outer.wrapping_add(inner_const_val),
                };
                func.inst_mut(value).kind = InstKind::Add { a: inner_val, b };
                func.dec_ref(a);
                func.dec_ref(inner_const);
                return true;
            }
        }
    }

    false
}

fn as_int(func: &Function, value: ValueId) -> Option<i32> {
    match func.inst(value).kind {
        InstKind::Int { constant } => Some(constant),
        _ => None,
    }
}

/// If `value` is a single-use `Add` with a single-use constant operand,
/// return `(constant, constant value id, other operand)`.
fn single_use_inner_add(func: &Function, value: ValueId) -> Option<(i32, ValueId, ValueId)> {
    if func.inst(value).refs != 1 {
        return None;
    }
    let (a, b) = match func.inst(value).kind {
        InstKind::Add { a, b } => (a, b),
        _ => return None,
    };
    if let Some(c) = as_int(func, a) {
        if func.inst(a).refs == 1 {
            return Some((c, a, b));
        }
    }
    if let Some(c) = as_int(func, b) {
        if func.inst(b).refs == 1 {
            return Some((c, b, a));
        }
    }
    None
}

/// Drop flows into block parameters that nothing reads.
///
/// A backwards pass over the blocks visits every branch edge; each dead
/// target parameter releases one use of the matching source value. A final
/// sweep disables the dead parameters so a second run is a no-op.
fn prune_dead_parameters(func: &mut Function) {
    let blocks: Vec<_> = func.blocks.ids().collect();
    for &block in blocks.iter().rev() {
        match func.blocks[block].terminator.clone() {
            Some(Terminator::Branch { target, args }) => {
                prune_edge_positional(func, target, &args);
            }
            Some(Terminator::CBranch {
                true_target,
                false_target,
                ..
            }) => {
                prune_edge_by_name(func, block, true_target);
                prune_edge_by_name(func, block, false_target);
            }
            _ => {}
        }
    }

    for &block in &blocks {
        let params = func.blocks[block].params().to_vec();
        for param in params {
            let inst = func.inst_mut(param);
            if inst.refs == 0 {
                if let InstKind::Parameter { name } = &mut inst.kind {
                    *name = None;
                }
            }
        }
    }
}

fn prune_edge_positional(func: &mut Function, target: crate::BlockId, args: &[ValueId]) {
    let params = func.blocks[target].params().to_vec();
    for (index, param) in params.into_iter().enumerate() {
        if is_live_param(func, param) || !is_named_param(func, param) {
            continue;
        }
        if let Some(&arg) = args.get(index) {
            func.dec_ref(arg);
        }
    }
}

fn prune_edge_by_name(func: &mut Function, source: crate::BlockId, target: crate::BlockId) {
    let params = func.blocks[target].params().to_vec();
    for param in params {
        if is_live_param(func, param) {
            continue;
        }
        let name = match func.inst(param).kind {
            InstKind::Parameter { name: Some(name) } => name,
            _ => continue,
        };
        if let Some(&arg) = func.blocks[source].variables.get(&name) {
            func.dec_ref(arg);
        }
    }
}

fn is_live_param(func: &Function, param: ValueId) -> bool {
    func.inst(param).refs > 0
}

fn is_named_param(func: &Function, param: ValueId) -> bool {
    matches!(func.inst(param).kind, InstKind::Parameter { name: Some(_) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{name, Function, InstKind, Terminator};

    fn add(func: &mut Function, a: ValueId, b: ValueId) -> ValueId {
        let entry = func.entry_block();
        let v = func.append_inst(entry, InstKind::Add { a, b });
        func.add_ref(a);
        func.add_ref(b);
        v
    }

    fn int(func: &mut Function, constant: i32) -> ValueId {
        let entry = func.entry_block();
        func.append_inst(entry, InstKind::Int { constant })
    }

    #[test]
    fn test_fold_int_int() {
        let mut func = Function::new(name("f"));
        let a = int(&mut func, 1);
        let b = int(&mut func, 2);
        let sum = add(&mut func, a, b);
        func.add_ref(sum);

        optimize(&mut func);

        assert_eq!(func.inst(sum).kind, InstKind::Int { constant: 3 });
        assert_eq!(func.inst(a).refs, 0);
        assert_eq!(func.inst(b).refs, 0);
    }

    #[test]
    fn test_fold_reassociates_chain() {
        // 1 + (2 + x) -> 3 + x
        let mut func = Function::new(name("f"));
        let entry = func.entry_block();
        let x = func.append_inst(entry, InstKind::Parameter { name: Some(name("x")) });
        let c2 = int(&mut func, 2);
        let inner = add(&mut func, c2, x);
        let c1 = int(&mut func, 1);
        let outer = add(&mut func, c1, inner);
        func.add_ref(outer);

        optimize(&mut func);

        assert_eq!(func.inst(outer).kind, InstKind::Add { a: c1, b: x });
        assert_eq!(func.inst(c1).kind, InstKind::Int { constant: 3 });
        assert_eq!(func.inst(inner).refs, 0);
        assert_eq!(func.inst(c2).refs, 0);
        // x is still used exactly once, now by the outer add.
        assert_eq!(func.inst(x).refs, 1);
    }

    #[test]
    fn test_no_fold_through_shared_inner() {
        // The inner add has a second consumer; the chain must stay.
        let mut func = Function::new(name("f"));
        let entry = func.entry_block();
        let x = func.append_inst(entry, InstKind::Parameter { name: Some(name("x")) });
        let c2 = int(&mut func, 2);
        let inner = add(&mut func, c2, x);
        func.add_ref(inner); // extra consumer
        let c1 = int(&mut func, 1);
        let outer = add(&mut func, c1, inner);
        func.add_ref(outer);

        optimize(&mut func);

        assert_eq!(func.inst(outer).kind, InstKind::Add { a: c1, b: inner });
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let mut func = Function::new(name("f"));
        let entry = func.entry_block();
        let x = func.append_inst(entry, InstKind::Parameter { name: Some(name("x")) });
        let c2 = int(&mut func, 2);
        let inner = add(&mut func, c2, x);
        let c1 = int(&mut func, 1);
        let outer = add(&mut func, c1, inner);
        func.add_ref(outer);
        func.set_terminator(entry, Terminator::Return { value: outer });

        optimize(&mut func);
        let after_first: Vec<_> = func.insts.iter().map(|(_, i)| (i.kind.clone(), i.refs)).collect();
        optimize(&mut func);
        let after_second: Vec<_> = func.insts.iter().map(|(_, i)| (i.kind.clone(), i.refs)).collect();

        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_prune_dead_parameter() {
        let mut func = Function::new(name("f"));
        let entry = func.entry_block();
        let v = int(&mut func, 7);

        let target = func.add_block();
        let p = func.append_inst(target, InstKind::Parameter { name: Some(name("v")) });
        // The flow into the parameter is the value's only use.
        func.add_ref(v);
        func.set_terminator(
            entry,
            Terminator::Branch {
                target,
                args: vec![v],
            },
        );
        let ret = int(&mut func, 0);
        func.add_ref(ret);
        func.set_terminator(target, Terminator::Return { value: ret });

        optimize(&mut func);

        assert_eq!(func.inst(v).refs, 0);
        assert_eq!(func.inst(p).kind, InstKind::Parameter { name: None });
    }
}

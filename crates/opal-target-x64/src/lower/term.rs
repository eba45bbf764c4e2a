//! Terminator emission and branch-edge resolution.

use opal_ir::{BlockId, InstKind, Terminator, ValueId};
use x64_encoder as enc;
use x64_encoder::{Cond, Reg};

use crate::lower::inst;
use crate::moves::resolve_parallel_moves;
use crate::shims::emit_mov;
use crate::state::Assembler;
use crate::vloc::VLoc;
use crate::CompileError;

/// Registers tried, in order, when a parameter needs a destination that no
/// argument location can provide.
const MOVE_PREFERENCE: [Reg; 7] = [
    Reg::RAX,
    Reg::RCX,
    Reg::RDX,
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
];

pub(crate) fn emit_terminator(
    asm: &mut Assembler,
    terminator: &Terminator,
) -> Result<(), CompileError> {
    match terminator {
        Terminator::Return { value } => emit_return(asm, *value),
        Terminator::Branch { target, args } => emit_branch(asm, *target, args),
        Terminator::CBranch {
            cond,
            true_target,
            false_target,
        } => emit_cbranch(asm, *cond, *true_target, *false_target),
    }
}

fn emit_return(asm: &mut Assembler, value: ValueId) -> Result<(), CompileError> {
    enc::ret(&mut asm.writer);
    enc::pop_r64(Reg::RBP, &mut asm.writer);
    enc::mov_r64_r64(Reg::RSP, Reg::RBP, &mut asm.writer);
    let loc = asm.assign_value_loc(value, Some(VLoc::Reg(Reg::RAX)));
    emit_mov(VLoc::Reg(Reg::RAX), loc, &mut asm.writer);
    Ok(())
}

fn emit_branch(
    asm: &mut Assembler,
    target: BlockId,
    args: &[ValueId],
) -> Result<(), CompileError> {
    asm.writer
        .emit_jump(enc::jmp_forms(), Assembler::block_label(target));
    let flows = branch_flows(asm, target, args);
    resolve_edge(asm, &flows)
}

fn emit_cbranch(
    asm: &mut Assembler,
    cond: ValueId,
    true_target: BlockId,
    false_target: BlockId,
) -> Result<(), CompileError> {
    // A comparison nobody else consumes fuses with the branch: the compare
    // leaves its flags and the jump tests them directly, with no
    // materialised boolean in between. The branch owns one use; any other
    // use (including a flow into a successor) needs the boolean built.
    let cond_inst = asm.func.inst(cond);
    let fused = match cond_inst.kind {
        InstKind::Cmp { kind, a, b } if asm.loc(cond).is_none() && cond_inst.refs == 1 => {
            Some(inst::effective_cond(asm, kind, a, b))
        }
        _ => None,
    };

    asm.writer
        .emit_jump(enc::jmp_forms(), Assembler::block_label(false_target));
    let flows = cbranch_flows(asm, false_target)?;
    resolve_edge(asm, &flows)?;

    let true_cc = fused.unwrap_or(Cond::NotEqual);
    asm.writer
        .emit_jump(enc::jcc_forms(true_cc), Assembler::block_label(true_target));
    let flows = cbranch_flows(asm, true_target)?;
    resolve_edge(asm, &flows)?;

    match (fused, asm.func.inst(cond).kind.clone()) {
        (Some(_), InstKind::Cmp { kind, a, b }) => {
            inst::emit_cmp(asm, cond, kind, a, b, false)?;
        }
        _ => {
            // Truthiness of the materialised condition: the low 32 bits, so
            // a boxed integer zero is falsy.
            let cond_loc = asm.assign_value_loc(cond, None);
            let span = asm.begin_read(cond_loc)?;
            enc::test_r32_r32(span.reg, span.reg, &mut asm.writer);
            asm.end_read(span);
        }
    }
    Ok(())
}

/// Pair each live target parameter with its positional branch argument.
fn branch_flows(
    asm: &Assembler,
    target: BlockId,
    args: &[ValueId],
) -> Vec<(ValueId, ValueId)> {
    let params = asm.func.blocks[target].params();
    params
        .iter()
        .zip(args)
        .filter(|&(&param, _)| asm.func.inst(param).refs > 0)
        .map(|(&param, &arg)| (param, arg))
        .collect()
}

/// Pair each live target parameter with the value its name is bound to in
/// the branching block.
fn cbranch_flows(
    asm: &Assembler,
    target: BlockId,
) -> Result<Vec<(ValueId, ValueId)>, CompileError> {
    let params = asm.func.blocks[target].params().to_vec();
    let vars = &asm.func.blocks[asm.block].variables;
    let mut flows = Vec::with_capacity(params.len());
    for param in params {
        let inst = asm.func.inst(param);
        if inst.refs == 0 {
            continue;
        }
        let name = match inst.kind {
            InstKind::Parameter { name: Some(name) } => name,
            _ => continue,
        };
        let arg = vars.get(&name).copied().ok_or(CompileError::MissingFlow(name))?;
        flows.push((param, arg));
    }
    Ok(flows)
}

/// Fix destinations for one branch edge, then emit its parallel move.
///
/// Arguments that already have locations (and block parameters, which are
/// about to get their entry locations) resolve first so their locations can
/// be adopted as parameter destinations; the rest follow. A parameter whose
/// preferred destination is claimed by another parameter of the same edge
/// takes the first preference-list register that is neither claimed nor
/// live.
fn resolve_edge(
    asm: &mut Assembler,
    flows: &[(ValueId, ValueId)],
) -> Result<(), CompileError> {
    let mut claimed: Vec<VLoc> = Vec::new();
    let mut pairs: Vec<Option<(VLoc, VLoc)>> = vec![None; flows.len()];

    for pass in 0..2 {
        for (index, &(param, arg)) in flows.iter().enumerate() {
            if pairs[index].is_some() {
                continue;
            }
            let defined = asm.loc(arg).is_some() || asm.func.inst(arg).is_parameter();
            if pass == 0 && !defined {
                continue;
            }
            let suggestion = asm.entry_loc(param);
            let arg_loc = asm.assign_value_loc(arg, suggestion);
            let entry = match asm.entry_loc(param) {
                Some(entry) => entry,
                None => {
                    let chosen = if claimed.contains(&arg_loc) {
                        pick_move_register(asm, &claimed)?
                    } else {
                        arg_loc
                    };
                    asm.set_entry_loc(param, chosen);
                    chosen
                }
            };
            claimed.push(entry);
            pairs[index] = Some((arg_loc, entry));
        }
    }

    let pairs: Vec<(VLoc, VLoc)> = pairs.into_iter().flatten().collect();
    resolve_parallel_moves(&pairs, &mut asm.writer);
    Ok(())
}

fn pick_move_register(asm: &Assembler, claimed: &[VLoc]) -> Result<VLoc, CompileError> {
    MOVE_PREFERENCE
        .into_iter()
        .map(VLoc::Reg)
        .find(|loc| !claimed.contains(loc) && !asm.is_marked(*loc))
        .ok_or(CompileError::OutOfMoveRegisters)
}

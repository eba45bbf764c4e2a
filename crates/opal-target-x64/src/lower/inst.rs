//! Per-instruction emission.
//!
//! Every emitter follows the same protocol: skip if nothing demanded the
//! result (unless the instruction has side effects), release the result
//! location, assign operand locations, then emit the encoding backwards so
//! the forward order produces the result from the operands.

use opal_ir::{CmpKind, InstKind, Name, ValueId};
use opal_runtime::Value;
use x64_encoder as enc;
use x64_encoder::{Cond, Reg};

use crate::shims::{emit_add32, emit_cmp32, emit_mov, emit_mov32, emit_sub32};
use crate::moves::resolve_parallel_moves;
use crate::state::Assembler;
use crate::vloc::VLoc;
use crate::CompileError;

pub(crate) fn emit_instruction(asm: &mut Assembler, value: ValueId) -> Result<(), CompileError> {
    match asm.func.inst(value).kind.clone() {
        InstKind::Parameter { .. } => emit_parameter(asm, value),
        InstKind::Int { constant } => emit_int(asm, value, constant),
        InstKind::Add { a, b } => emit_arith(asm, value, ArithOp::Add, a, b),
        InstKind::Sub { a, b } => emit_arith(asm, value, ArithOp::Sub, a, b),
        InstKind::Cmp { kind, a, b } => emit_cmp(asm, value, kind, a, b, true),
        InstKind::Global { name } => emit_global(asm, value, name),
        InstKind::Call { callee, args } => emit_call(asm, value, callee, &args),
        InstKind::NewObject => emit_new_object(asm, value),
        InstKind::GetAttr { obj, name } => emit_get_attr(asm, value, obj, name),
        InstKind::GetLoc { loc } => emit_get_loc(asm, value, loc),
        InstKind::SetLoc { loc, value: stored } => emit_set_loc(asm, value, loc, stored),
    }
}

/// Block parameters emit no computation. If the demanded location differs
/// from where predecessors deliver the value, a fix-up move bridges the
/// two; if no predecessor has been lowered yet, the demanded location
/// becomes the delivery target.
fn emit_parameter(asm: &mut Assembler, value: ValueId) -> Result<(), CompileError> {
    let Some(loc) = asm.loc(value) else {
        return Ok(());
    };
    asm.unmark_loc(loc);
    match asm.entry_loc(value) {
        None => asm.set_entry_loc(value, loc),
        Some(entry) if entry != loc => emit_mov(loc, entry, &mut asm.writer),
        Some(_) => {}
    }
    Ok(())
}

fn emit_int(asm: &mut Assembler, value: ValueId, constant: i32) -> Result<(), CompileError> {
    let Some(loc) = asm.loc(value) else {
        return Ok(());
    };
    asm.unmark_loc(loc);
    let boxed = Value::from_i32(constant).raw();
    let span = asm.begin_write(loc)?;
    enc::mov_r64_imm64(span.reg, boxed, &mut asm.writer);
    asm.end_write(span);
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
}

fn emit_arith(
    asm: &mut Assembler,
    value: ValueId,
    op: ArithOp,
    a: ValueId,
    b: ValueId,
) -> Result<(), CompileError> {
    let Some(this_loc) = asm.loc(value) else {
        return Ok(());
    };
    // Releasing the result location first lets an operand share it.
    asm.unmark_loc(this_loc);

    // One constant operand folds into the immediate form. A constant left
    // operand of a subtraction negates afterwards: c - x == -(x - c).
    let fold = match (op, as_const(asm, a), as_const(asm, b)) {
        (ArithOp::Add, Some(c), None) => Some((b, c, false)),
        (ArithOp::Add, None, Some(c)) => Some((a, c, false)),
        (ArithOp::Sub, None, Some(c)) => Some((a, c, false)),
        (ArithOp::Sub, Some(c), None) => Some((b, c, true)),
        _ => None,
    };
    if let Some((other, constant, negate)) = fold {
        let other_loc = asm.assign_value_loc(other, Some(this_loc));
        let span = asm.begin_write(this_loc)?;
        enc::bts_r64_imm8(span.reg, Value::INT_TAG_BIT, &mut asm.writer);
        if negate {
            enc::neg_r32(span.reg, &mut asm.writer);
        }
        match op {
            ArithOp::Add => enc::add_r32_imm32(span.reg, constant, &mut asm.writer),
            ArithOp::Sub => enc::sub_r32_imm32(span.reg, constant, &mut asm.writer),
        }
        emit_mov32(VLoc::Reg(span.reg), other_loc, &mut asm.writer);
        asm.end_write(span);
        return asm.emit_type_guard(other);
    }

    let a_loc = asm.assign_value_loc(a, Some(this_loc));
    let b_loc = asm.assign_value_loc(b, Some(this_loc));

    match this_loc {
        VLoc::Reg(t) => {
            enc::bts_r64_imm8(t, Value::INT_TAG_BIT, &mut asm.writer);
            match op {
                ArithOp::Add => {
                    if a_loc == this_loc {
                        emit_add32(this_loc, b_loc, &mut asm.writer);
                    } else if b_loc == this_loc {
                        emit_add32(this_loc, a_loc, &mut asm.writer);
                    } else {
                        emit_add32(this_loc, b_loc, &mut asm.writer);
                        emit_mov32(this_loc, a_loc, &mut asm.writer);
                    }
                }
                ArithOp::Sub => {
                    if a_loc == this_loc {
                        emit_sub32(this_loc, b_loc, &mut asm.writer);
                    } else if b_loc == this_loc {
                        // t holds b; a - b == -(b - a).
                        enc::neg_r32(t, &mut asm.writer);
                        emit_sub32(this_loc, a_loc, &mut asm.writer);
                    } else {
                        emit_sub32(this_loc, b_loc, &mut asm.writer);
                        emit_mov32(this_loc, a_loc, &mut asm.writer);
                    }
                }
            }
        }
        VLoc::Stack(_) => {
            let span = asm.begin_write(this_loc)?;
            let target = VLoc::Reg(span.reg);
            enc::bts_r64_imm8(span.reg, Value::INT_TAG_BIT, &mut asm.writer);
            match op {
                ArithOp::Add => emit_add32(target, b_loc, &mut asm.writer),
                ArithOp::Sub => emit_sub32(target, b_loc, &mut asm.writer),
            }
            emit_mov32(target, a_loc, &mut asm.writer);
            asm.end_write(span);
        }
    }

    asm.emit_type_guard(a)?;
    asm.emit_type_guard(b)
}

fn as_const(asm: &Assembler, value: ValueId) -> Option<i32> {
    match asm.func.inst(value).kind {
        InstKind::Int { constant } => Some(constant),
        _ => None,
    }
}

fn cond_of(kind: CmpKind) -> Cond {
    match kind {
        CmpKind::Less => Cond::Less,
        CmpKind::Greater => Cond::Greater,
        CmpKind::Equal => Cond::Equal,
        CmpKind::NotEqual => Cond::NotEqual,
        CmpKind::LessEq => Cond::LessEq,
        CmpKind::GreaterEq => Cond::GreaterEq,
    }
}

/// The condition a fused or stored comparison actually tests, accounting
/// for the operand mirroring a constant left operand forces.
pub(crate) fn effective_cond(asm: &Assembler, kind: CmpKind, a: ValueId, b: ValueId) -> Cond {
    if as_const(asm, a).is_some() && as_const(asm, b).is_none() {
        cond_of(kind).mirror()
    } else {
        cond_of(kind)
    }
}

/// Emit the compare itself (with guards and spill loads). Flags are left
/// set for a consumer emitted earlier (a fused conditional branch or a
/// `setcc`), which must test [`effective_cond`].
fn emit_compare(
    asm: &mut Assembler,
    a: ValueId,
    b: ValueId,
) -> Result<(), CompileError> {
    let a_const = as_const(asm, a);
    let b_const = as_const(asm, b);
    if let (None, Some(c)) = (a_const, b_const) {
        let a_loc = asm.assign_value_loc(a, None);
        let span = asm.begin_read(a_loc)?;
        enc::cmp_r32_imm32(span.reg, c, &mut asm.writer);
        asm.end_read(span);
        asm.emit_type_guard(a)
    } else if let (Some(c), None) = (a_const, b_const) {
        let b_loc = asm.assign_value_loc(b, None);
        let span = asm.begin_read(b_loc)?;
        enc::cmp_r32_imm32(span.reg, c, &mut asm.writer);
        asm.end_read(span);
        asm.emit_type_guard(b)
    } else {
        let a_loc = asm.assign_value_loc(a, None);
        let b_loc = asm.assign_value_loc(b, None);
        emit_cmp32(a_loc, b_loc, &mut asm.writer);
        asm.emit_type_guard(a)?;
        asm.emit_type_guard(b)
    }
}

/// `store = true` materialises a boxed 0/1; `store = false` only sets the
/// flags for a fused conditional branch (the value then has no location
/// and its stream slot is skipped).
pub(crate) fn emit_cmp(
    asm: &mut Assembler,
    value: ValueId,
    kind: CmpKind,
    a: ValueId,
    b: ValueId,
    store: bool,
) -> Result<(), CompileError> {
    if !store {
        return emit_compare(asm, a, b);
    }
    let Some(this_loc) = asm.loc(value) else {
        return Ok(());
    };
    // The result stays marked while operands are assigned: the zeroing xor
    // executes before the compare reads them, so they must not share.
    let cc = effective_cond(asm, kind, a, b);
    let span = asm.begin_write(this_loc)?;
    enc::bts_r64_imm8(span.reg, Value::INT_TAG_BIT, &mut asm.writer);
    enc::setcc(cc, span.reg, &mut asm.writer);
    emit_compare(asm, a, b)?;
    enc::xor_r32_r32(span.reg, span.reg, &mut asm.writer);
    asm.end_write(span);
    asm.unmark_loc(this_loc);
    Ok(())
}

/// Address of an interned name, for baking into generated code.
fn name_addr(name: Name) -> u64 {
    let ptr: *const String = &*name;
    ptr as u64
}

/// Shared shape of every lowering that calls into the host.
///
/// Forward order: push live RAX/RDX/RCX; parallel moves; immediate
/// argument loads; `mov rax, target`; `sub rsp, home`; `call rax`;
/// `add rsp, home`; move RAX to the result; pops. When `target` is `None`
/// the callee address is expected in RAX already (placed by `pairs`). The
/// home space widens from 32 to 40 bytes when an odd push count would
/// leave the call site misaligned.
fn emit_host_call(
    asm: &mut Assembler,
    result: Option<VLoc>,
    target: Option<u64>,
    imm_args: &[(u64, Reg)],
    pairs: &[(VLoc, VLoc)],
    live: [bool; 3],
) {
    let saved = [(live[0], Reg::RAX), (live[2], Reg::RDX), (live[1], Reg::RCX)];
    let pushes = live.iter().filter(|&&l| l).count();
    let home = if pushes % 2 == 1 { 40 } else { 32 };

    for &(is_live, reg) in &saved {
        if is_live {
            enc::pop_r64(reg, &mut asm.writer);
        }
    }
    if let Some(result) = result {
        emit_mov(result, VLoc::Reg(Reg::RAX), &mut asm.writer);
    }
    enc::add_r64_imm32(Reg::RSP, home, &mut asm.writer);
    enc::call_r64(Reg::RAX, &mut asm.writer);
    enc::sub_r64_imm32(Reg::RSP, home, &mut asm.writer);
    if let Some(target) = target {
        enc::mov_r64_imm64(Reg::RAX, target, &mut asm.writer);
    }
    for &(imm, reg) in imm_args {
        enc::mov_r64_imm64(reg, imm, &mut asm.writer);
    }
    resolve_parallel_moves(pairs, &mut asm.writer);
    for &(is_live, reg) in saved.iter().rev() {
        if is_live {
            enc::push_r64(reg, &mut asm.writer);
        }
    }
}

fn emit_global(asm: &mut Assembler, value: ValueId, name: Name) -> Result<(), CompileError> {
    let Some(this_loc) = asm.loc(value) else {
        return Ok(());
    };
    asm.unmark_loc(this_loc);
    let live = asm.call_live();
    let (resolve, ctx) = (asm.callbacks.resolve, asm.callbacks.ctx);
    emit_host_call(
        asm,
        Some(this_loc),
        Some(resolve),
        &[(ctx, Reg::RCX), (name_addr(name), Reg::RDX)],
        &[],
        live,
    );
    Ok(())
}

fn emit_new_object(asm: &mut Assembler, value: ValueId) -> Result<(), CompileError> {
    let Some(this_loc) = asm.loc(value) else {
        return Ok(());
    };
    asm.unmark_loc(this_loc);
    let live = asm.call_live();
    let (object_new, heap) = (asm.callbacks.object_new, asm.callbacks.heap);
    emit_host_call(
        asm,
        Some(this_loc),
        Some(object_new),
        &[(heap, Reg::RCX)],
        &[],
        live,
    );
    Ok(())
}

fn emit_get_attr(
    asm: &mut Assembler,
    value: ValueId,
    obj: ValueId,
    name: Name,
) -> Result<(), CompileError> {
    let Some(this_loc) = asm.loc(value) else {
        return Ok(());
    };
    asm.unmark_loc(this_loc);
    let live = asm.call_live();
    let obj_loc = asm.assign_value_loc(obj, Some(VLoc::Reg(Reg::RCX)));
    let attr_ptr = asm.callbacks.attr_ptr;
    emit_host_call(
        asm,
        Some(this_loc),
        Some(attr_ptr),
        &[(name_addr(name), Reg::RDX)],
        &[(obj_loc, VLoc::Reg(Reg::RCX))],
        live,
    );
    Ok(())
}

/// Calls are emitted even when the result is unused: they have effects.
fn emit_call(
    asm: &mut Assembler,
    value: ValueId,
    callee: ValueId,
    args: &[ValueId],
) -> Result<(), CompileError> {
    debug_assert!(args.len() <= Assembler::ABI_ARGS.len());
    let this_loc = asm.loc(value);
    if let Some(loc) = this_loc {
        asm.unmark_loc(loc);
    }
    let live = asm.call_live();

    let callee_loc = asm.assign_value_loc(callee, Some(VLoc::Reg(Reg::RAX)));
    let mut pairs = vec![(callee_loc, VLoc::Reg(Reg::RAX))];
    for (index, &arg) in args.iter().enumerate() {
        let abi = VLoc::Reg(Assembler::ABI_ARGS[index]);
        let arg_loc = asm.assign_value_loc(arg, Some(abi));
        pairs.push((arg_loc, abi));
    }
    emit_host_call(asm, this_loc, None, &[], &pairs, live);
    Ok(())
}

fn emit_get_loc(
    asm: &mut Assembler,
    value: ValueId,
    handle: ValueId,
) -> Result<(), CompileError> {
    let Some(this_loc) = asm.loc(value) else {
        return Ok(());
    };
    asm.unmark_loc(this_loc);
    let handle_loc = asm.assign_value_loc(handle, Some(this_loc));

    let dest = asm.begin_write(this_loc)?;
    let base = asm.begin_read(handle_loc)?;
    enc::load_r64_mem(dest.reg, base.reg, 0, &mut asm.writer);
    asm.end_read(base);
    asm.end_write(dest);
    Ok(())
}

/// Stores are emitted even when the result is unused: they have effects.
/// When the assignment's value is itself consumed, it is forwarded to the
/// demanded location as well.
fn emit_set_loc(
    asm: &mut Assembler,
    value: ValueId,
    handle: ValueId,
    stored: ValueId,
) -> Result<(), CompileError> {
    let this_loc = asm.loc(value);
    if let Some(loc) = this_loc {
        asm.unmark_loc(loc);
    }
    let handle_loc = asm.assign_value_loc(handle, None);
    let stored_loc = asm.assign_value_loc(stored, this_loc);

    if let Some(this_loc) = this_loc {
        emit_mov(this_loc, stored_loc, &mut asm.writer);
    }
    let base = asm.begin_read(handle_loc)?;
    let src = asm.begin_read(stored_loc)?;
    enc::store_mem_r64(base.reg, 0, src.reg, &mut asm.writer);
    asm.end_read(src);
    asm.end_read(base);
    Ok(())
}

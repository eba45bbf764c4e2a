//! Location-aware emission shims.
//!
//! These wrap the raw encoders so callers can emit against [`VLoc`]s
//! directly; stack operands become RBP-indexed forms, and memory-to-memory
//! shapes route through the first scratch register (which is never
//! allocated to values, and the scratch-span helpers hand it out last).

use x64_encoder as enc;
use x64_encoder::Reg;

use crate::segment::BlockWriter;
use crate::vloc::{frame_disp, VLoc};

pub(crate) fn emit_mov(dest: VLoc, src: VLoc, w: &mut BlockWriter) {
    match (dest, src) {
        _ if dest == src => {}
        (VLoc::Reg(d), VLoc::Reg(s)) => enc::mov_r64_r64(d, s, w),
        (VLoc::Reg(d), VLoc::Stack(s)) => enc::load_r64_mem(d, Reg::RBP, frame_disp(s), w),
        (VLoc::Stack(d), VLoc::Reg(s)) => enc::store_mem_r64(Reg::RBP, frame_disp(d), s, w),
        (VLoc::Stack(d), VLoc::Stack(s)) => {
            enc::store_mem_r64(Reg::RBP, frame_disp(d), Reg::TMP1, w);
            enc::load_r64_mem(Reg::TMP1, Reg::RBP, frame_disp(s), w);
        }
    }
}

pub(crate) fn emit_mov32(dest: VLoc, src: VLoc, w: &mut BlockWriter) {
    match (dest, src) {
        _ if dest == src => {}
        (VLoc::Reg(d), VLoc::Reg(s)) => enc::mov_r32_r32(d, s, w),
        (VLoc::Reg(d), VLoc::Stack(s)) => enc::load_r32_mem(d, Reg::RBP, frame_disp(s), w),
        (VLoc::Stack(d), VLoc::Reg(s)) => enc::store_mem_r32(Reg::RBP, frame_disp(d), s, w),
        (VLoc::Stack(d), VLoc::Stack(s)) => {
            enc::store_mem_r32(Reg::RBP, frame_disp(d), Reg::TMP1, w);
            enc::load_r32_mem(Reg::TMP1, Reg::RBP, frame_disp(s), w);
        }
    }
}

pub(crate) fn emit_xchg(a: VLoc, b: VLoc, w: &mut BlockWriter) {
    match (a, b) {
        _ if a == b => {}
        (VLoc::Reg(a), VLoc::Reg(b)) => enc::xchg_r64_r64(a, b, w),
        (VLoc::Reg(a), VLoc::Stack(b)) => enc::xchg_r64_mem(a, Reg::RBP, frame_disp(b), w),
        (VLoc::Stack(a), VLoc::Reg(b)) => enc::xchg_r64_mem(b, Reg::RBP, frame_disp(a), w),
        (VLoc::Stack(a), VLoc::Stack(b)) => {
            // Forward: load tmp from b, exchange with a, store tmp to b.
            enc::store_mem_r64(Reg::RBP, frame_disp(b), Reg::TMP1, w);
            enc::xchg_r64_mem(Reg::TMP1, Reg::RBP, frame_disp(a), w);
            enc::load_r64_mem(Reg::TMP1, Reg::RBP, frame_disp(b), w);
        }
    }
}

pub(crate) fn emit_add32(dest: VLoc, src: VLoc, w: &mut BlockWriter) {
    match (dest, src) {
        (VLoc::Reg(d), VLoc::Reg(s)) => enc::add_r32_r32(d, s, w),
        (VLoc::Reg(d), VLoc::Stack(s)) => enc::add_r32_mem(d, Reg::RBP, frame_disp(s), w),
        (VLoc::Stack(d), VLoc::Reg(s)) => enc::add_mem_r32(Reg::RBP, frame_disp(d), s, w),
        (VLoc::Stack(d), VLoc::Stack(s)) => {
            enc::add_mem_r32(Reg::RBP, frame_disp(d), Reg::TMP1, w);
            enc::load_r32_mem(Reg::TMP1, Reg::RBP, frame_disp(s), w);
        }
    }
}

pub(crate) fn emit_sub32(dest: VLoc, src: VLoc, w: &mut BlockWriter) {
    match (dest, src) {
        (VLoc::Reg(d), VLoc::Reg(s)) => enc::sub_r32_r32(d, s, w),
        (VLoc::Reg(d), VLoc::Stack(s)) => enc::sub_r32_mem(d, Reg::RBP, frame_disp(s), w),
        (VLoc::Stack(d), VLoc::Reg(s)) => enc::sub_mem_r32(Reg::RBP, frame_disp(d), s, w),
        (VLoc::Stack(d), VLoc::Stack(s)) => {
            enc::sub_mem_r32(Reg::RBP, frame_disp(d), Reg::TMP1, w);
            enc::load_r32_mem(Reg::TMP1, Reg::RBP, frame_disp(s), w);
        }
    }
}

pub(crate) fn emit_cmp32(a: VLoc, b: VLoc, w: &mut BlockWriter) {
    match (a, b) {
        (VLoc::Reg(a), VLoc::Reg(b)) => enc::cmp_r32_r32(a, b, w),
        (VLoc::Reg(a), VLoc::Stack(b)) => enc::cmp_r32_mem(a, Reg::RBP, frame_disp(b), w),
        (VLoc::Stack(a), VLoc::Reg(b)) => enc::cmp_mem_r32(Reg::RBP, frame_disp(a), b, w),
        (VLoc::Stack(a), VLoc::Stack(b)) => {
            enc::cmp_r32_mem(Reg::TMP1, Reg::RBP, frame_disp(b), w);
            enc::load_r32_mem(Reg::TMP1, Reg::RBP, frame_disp(a), w);
        }
    }
}

pub(crate) fn emit_call_loc(callee: VLoc, w: &mut BlockWriter) {
    match callee {
        VLoc::Reg(r) => enc::call_r64(r, w),
        VLoc::Stack(s) => enc::call_mem(Reg::RBP, frame_disp(s), w),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::BlockWriter;

    fn code(f: impl FnOnce(&mut BlockWriter)) -> Vec<u8> {
        let mut w = BlockWriter::new();
        f(&mut w);
        let segs = w.finish();
        assert!(segs.len() <= 1);
        segs.first().map(|s| s.code_bytes().to_vec()).unwrap_or_default()
    }

    #[test]
    fn test_mov_shapes() {
        assert_eq!(
            code(|w| emit_mov(VLoc::Reg(Reg::RAX), VLoc::Reg(Reg::RCX), w)),
            [0x48, 0x89, 0xC8]
        );
        assert_eq!(
            code(|w| emit_mov(VLoc::Reg(Reg::RAX), VLoc::Stack(0), w)),
            [0x48, 0x8B, 0x45, 0xF8]
        );
        assert_eq!(
            code(|w| emit_mov(VLoc::Stack(0), VLoc::Reg(Reg::RAX), w)),
            [0x48, 0x89, 0x45, 0xF8]
        );
        // Identical locations are a no-op.
        assert_eq!(code(|w| emit_mov(VLoc::Stack(2), VLoc::Stack(2), w)), []);
        // Memory to memory goes through the scratch register.
        assert_eq!(
            code(|w| emit_mov(VLoc::Stack(1), VLoc::Stack(0), w)),
            [
                0x4C, 0x8B, 0x65, 0xF8, // mov r12, [rbp-8]
                0x4C, 0x89, 0x65, 0xF0, // mov [rbp-16], r12
            ]
        );
    }

    #[test]
    fn test_xchg_with_stack() {
        assert_eq!(
            code(|w| emit_xchg(VLoc::Reg(Reg::RCX), VLoc::Reg(Reg::RDX), w)),
            [0x48, 0x87, 0xD1]
        );
        assert_eq!(
            code(|w| emit_xchg(VLoc::Reg(Reg::RAX), VLoc::Stack(0), w)),
            [0x48, 0x87, 0x45, 0xF8]
        );
    }

    #[test]
    fn test_arith_shapes() {
        assert_eq!(
            code(|w| emit_add32(VLoc::Reg(Reg::RAX), VLoc::Stack(0), w)),
            [0x03, 0x45, 0xF8]
        );
        assert_eq!(
            code(|w| emit_sub32(VLoc::Stack(0), VLoc::Reg(Reg::RCX), w)),
            [0x29, 0x4D, 0xF8]
        );
        assert_eq!(
            code(|w| emit_cmp32(VLoc::Reg(Reg::RAX), VLoc::Reg(Reg::RCX), w)),
            [0x39, 0xC8]
        );
    }
}

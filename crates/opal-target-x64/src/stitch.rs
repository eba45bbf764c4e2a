//! Segment stitching and jump relaxation.
//!
//! Two linear passes. The first lays segments out pessimistically at their
//! maximum sizes; the second shrinks jumps (to nothing when the target
//! immediately follows, to the two-byte short form when the displacement
//! fits a signed byte) and slides every later segment down by the bytes
//! saved so far. Offsets only ever shrink, so a jump judged short can never
//! become long again and the pass is sound. A final walk copies code and
//! materialises each jump with its relaxed displacement.

use log::trace;

use crate::segment::{LabelId, Segment};

/// The output of stitching: contiguous code plus the resolved label offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stitched {
    pub code: Vec<u8>,
    pub label_offsets: Vec<u32>,
}

/// Lay out `segments`, relax jumps and produce the final byte buffer.
///
/// Stitching does not mutate its input; running it twice yields identical
/// bytes.
pub fn stitch(segments: &[Segment], num_labels: usize) -> Stitched {
    // Pass 1: pessimistic offsets using maximum sizes.
    let mut offsets: Vec<u32> = Vec::with_capacity(segments.len());
    let mut tentative_labels = vec![0u32; num_labels];
    let mut offset = 0u32;
    for segment in segments {
        offsets.push(offset);
        if let Segment::Label(label) = segment {
            tentative_labels[label.0 as usize] = offset;
        }
        offset += segment.max_size();
    }

    // Pass 2: relaxation. Walk forward, shrinking jumps and sliding later
    // segments down by the running savings.
    let mut final_sizes: Vec<u32> = Vec::with_capacity(segments.len());
    let mut final_labels = vec![0u32; num_labels];
    let mut label_done = vec![false; num_labels];
    let mut saved = 0u32;
    for (index, segment) in segments.iter().enumerate() {
        offsets[index] -= saved;
        match segment {
            Segment::Label(label) => {
                final_labels[label.0 as usize] = offsets[index];
                label_done[label.0 as usize] = true;
                final_sizes.push(0);
            }
            Segment::Code { len, .. } => {
                final_sizes.push(*len as u32);
            }
            Segment::Jump { forms, target } => {
                let max = forms.long_len as u32;
                // Backward targets are final; forward targets can only move
                // closer, so the estimate never under-reports the distance.
                let target_offset = if label_done[target.0 as usize] {
                    final_labels[target.0 as usize] as i64
                } else {
                    tentative_labels[target.0 as usize] as i64 - saved as i64
                };
                let dist_max = target_offset - (offsets[index] + max) as i64;
                // A short forward jump pulls its own target closer by the
                // bytes it saves, so the displacement ends up at most
                // `dist_max`; a backward target is already final and the
                // displacement is exactly `dist_max + (max - 2)`.
                let dist_short = dist_max + (max as i64 - 2);
                let size = if dist_max == 0 {
                    0
                } else if dist_max > 0 && dist_max < 128 {
                    2
                } else if dist_max < 0 && dist_short >= -128 {
                    2
                } else {
                    max
                };
                saved += max - size;
                final_sizes.push(size);
            }
        }
    }

    // Pass 3: copy code and materialise jumps against the final layout.
    let total = offsets
        .last()
        .map(|&last| last + final_sizes.last().copied().unwrap_or(0))
        .unwrap_or(0);
    let mut code = vec![0u8; total as usize];
    for (index, segment) in segments.iter().enumerate() {
        let at = offsets[index] as usize;
        match segment {
            Segment::Label(_) => {}
            Segment::Code { .. } => {
                let bytes = segment.code_bytes();
                code[at..at + bytes.len()].copy_from_slice(bytes);
            }
            Segment::Jump { forms, target } => {
                let size = final_sizes[index];
                if size == 0 {
                    continue;
                }
                let disp = final_labels[target.0 as usize] as i64
                    - (offsets[index] + size) as i64;
                if size == 2 {
                    code[at] = forms.short[0];
                    code[at + 1] = disp as u8;
                } else {
                    let opcode_len = forms.long_len as usize - 4;
                    code[at..at + opcode_len].copy_from_slice(&forms.long[..opcode_len]);
                    code[at + opcode_len..at + opcode_len + 4]
                        .copy_from_slice(&(disp as i32).to_le_bytes());
                }
            }
        }
    }

    trace!(
        "stitched {} segments into {} bytes ({} saved by relaxation)",
        segments.len(),
        total,
        saved
    );
    Stitched {
        code,
        label_offsets: final_labels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::CODE_CAPACITY;
    use x64_encoder::{jcc_forms, jmp_forms, Cond};

    fn code_segment(bytes: &[u8]) -> Segment {
        let mut buf = Box::new([0u8; CODE_CAPACITY]);
        buf[CODE_CAPACITY - bytes.len()..].copy_from_slice(bytes);
        Segment::Code {
            buf,
            len: bytes.len(),
        }
    }

    fn jump_to(label: u32) -> Segment {
        Segment::Jump {
            forms: jmp_forms(),
            target: LabelId(label),
        }
    }

    #[test]
    fn test_jump_to_next_label_is_elided() {
        let segments = vec![
            Segment::Label(LabelId(0)),
            jump_to(1),
            Segment::Label(LabelId(1)),
            code_segment(&[0xC3]),
        ];
        let out = stitch(&segments, 2);
        assert_eq!(out.code, vec![0xC3]);
        assert_eq!(out.label_offsets, vec![0, 0]);
    }

    #[test]
    fn test_short_backward_jump() {
        let segments = vec![
            Segment::Label(LabelId(0)),
            code_segment(&[0x90, 0x90]),
            jump_to(0),
        ];
        let out = stitch(&segments, 1);
        // jmp rel8 back over two nops and itself: -4.
        assert_eq!(out.code, vec![0x90, 0x90, 0xEB, 0xFC]);
    }

    #[test]
    fn test_short_jump_boundary_negative() {
        // Distance of exactly -128 still uses the short form.
        let body = vec![0x90u8; 126];
        let segments = vec![
            Segment::Label(LabelId(0)),
            code_segment(&body),
            jump_to(0),
        ];
        let out = stitch(&segments, 1);
        assert_eq!(out.code.len(), 128);
        assert_eq!(out.code[126], 0xEB);
        assert_eq!(out.code[127] as i8, -128);
    }

    #[test]
    fn test_long_jump_boundary_negative() {
        // One more byte of body forces the long form (-129 short-form reach).
        let body = vec![0x90u8; 127];
        let segments = vec![
            Segment::Label(LabelId(0)),
            code_segment(&body),
            jump_to(0),
        ];
        let out = stitch(&segments, 1);
        assert_eq!(out.code.len(), 127 + 5);
        assert_eq!(out.code[127], 0xE9);
        let disp = i32::from_le_bytes(out.code[128..132].try_into().unwrap());
        assert_eq!(disp, -132);
    }

    #[test]
    fn test_short_forward_jump_over_code() {
        let segments = vec![
            jump_to(0),
            code_segment(&[0x90; 8]),
            Segment::Label(LabelId(0)),
            code_segment(&[0xC3]),
        ];
        let out = stitch(&segments, 1);
        assert_eq!(out.code[0], 0xEB);
        assert_eq!(out.code[1], 8);
        assert_eq!(out.code.len(), 11);
        assert_eq!(out.label_offsets[0], 10);
    }

    #[test]
    fn test_forward_jump_boundary_long() {
        // 128 bytes between the short jump's end and the target: long form.
        let segments = vec![
            jump_to(0),
            code_segment(&vec![0x90; 128]),
            Segment::Label(LabelId(0)),
            code_segment(&[0xC3]),
        ];
        let out = stitch(&segments, 1);
        assert_eq!(out.code[0], 0xE9);
        let disp = i32::from_le_bytes(out.code[1..5].try_into().unwrap());
        assert_eq!(disp, 128);

        // One byte less and it relaxes to the short form.
        let segments = vec![
            jump_to(0),
            code_segment(&vec![0x90; 127]),
            Segment::Label(LabelId(0)),
            code_segment(&[0xC3]),
        ];
        let out = stitch(&segments, 1);
        assert_eq!(out.code[0], 0xEB);
        assert_eq!(out.code[1], 127);
    }

    #[test]
    fn test_conditional_jump_forms() {
        let segments = vec![
            Segment::Label(LabelId(0)),
            code_segment(&[0x90, 0x90]),
            Segment::Jump {
                forms: jcc_forms(Cond::Less),
                target: LabelId(0),
            },
        ];
        let out = stitch(&segments, 1);
        assert_eq!(out.code, vec![0x90, 0x90, 0x7C, 0xFC]);
    }

    #[test]
    fn test_offsets_and_sizes_are_consistent() {
        let segments = vec![
            Segment::Label(LabelId(0)),
            code_segment(&[0x90; 10]),
            jump_to(1),
            code_segment(&[0x90; 100]),
            Segment::Label(LabelId(1)),
            code_segment(&[0xC3]),
            jump_to(0),
        ];
        let out = stitch(&segments, 2);
        // Both jumps relax to the short form; every later offset slides down.
        assert_eq!(out.label_offsets[1], 10 + 2 + 100);
        assert_eq!(out.code.len(), 10 + 2 + 100 + 1 + 2);
        // Displacement equation: target - (jump offset + final size).
        assert_eq!(out.code[113], 0xEB);
        assert_eq!(out.code[114] as i8, -115);
    }

    #[test]
    fn test_stitch_is_idempotent() {
        let segments = vec![
            jump_to(0),
            code_segment(&[0x90; 64]),
            Segment::Label(LabelId(0)),
            code_segment(&[0xC3]),
        ];
        let first = stitch(&segments, 1);
        let second = stitch(&segments, 1);
        assert_eq!(first, second);
    }
}

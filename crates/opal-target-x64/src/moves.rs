//! Parallel-move resolution.
//!
//! A branch implies an atomic rearrangement of values from source locations
//! to destination locations. Pairs are processed from last to first (so the
//! emitted code, being written backwards, executes them first to last). A
//! pair whose source is the destination of a pair executing before it must
//! swap instead of move, and a destination already captured by a pending
//! swap is renamed to wherever the swap put its contents.

use crate::segment::BlockWriter;
use crate::shims::{emit_mov, emit_xchg};
use crate::vloc::VLoc;

/// Emit the moves realising `pairs` (`(source, destination)` per element).
/// After the emitted code runs, the value originally at each source sits at
/// the matching destination.
pub(crate) fn resolve_parallel_moves(pairs: &[(VLoc, VLoc)], writer: &mut BlockWriter) {
    let n = pairs.len();
    let mut pending: Vec<Option<(VLoc, VLoc)>> = vec![None; n];

    for i in (0..n).rev() {
        let (from, to) = pairs[i];
        let must_xchg = pairs[..i].iter().any(|&(_, other_to)| other_to == from);

        // Follow the rename chain: if a pending swap already moved the
        // contents of `to` elsewhere, write there instead.
        let mut into = to;
        for k in (0..n).rev() {
            if let Some((swapped_from, swapped_to)) = pending[k] {
                if swapped_from == to {
                    into = swapped_to;
                    pending[k] = None;
                    break;
                }
            }
        }

        if must_xchg {
            for k in (0..n).rev() {
                if pending[k].is_none() {
                    pending[k] = Some((from, into));
                    break;
                }
            }
            emit_xchg(into, from, writer);
        } else {
            emit_mov(into, from, writer);
        }
    }
}

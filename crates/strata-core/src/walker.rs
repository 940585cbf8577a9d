//! The contiguous-run walker.
//!
//! Pack and unpack both reduce to the same question: which bytes of the
//! user's buffer correspond to `[offset, offset + len)` of the logical
//! packed stream? The walker answers it as an ordered sequence of
//! `(delta, run_length)` pairs, where `delta` is the signed byte offset
//! from the buffer pointer. The sequence is deterministic for a given
//! `(type, count, offset, len)` tuple, run lengths are never zero, and runs
//! appear in ascending stream order.
//!
//! Contiguous subtrees short-circuit to a single run; everything else
//! descends by locating the child block holding the next stream byte
//! (division for uniform kinds, a forward scan for indexed kinds).

use crate::node::{TypeKind, TypeNode};

/// A maximal contiguous run of bytes within a typed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    /// Signed byte offset from the buffer pointer.
    pub delta: isize,
    /// Bytes in the run.
    pub len: usize,
}

/// Emit the runs covering `[offset, offset + len)` of the packed stream of
/// `count` elements of `ty`. `offset + len` must not exceed
/// `count * ty.size()`.
pub fn for_each_run<F>(ty: &TypeNode, count: usize, offset: usize, len: usize, emit: &mut F)
where
    F: FnMut(isize, usize),
{
    let size = ty.size();
    if size == 0 || count == 0 || len == 0 {
        return;
    }
    debug_assert!(offset + len <= count * size);

    let mut k = offset / size;
    let mut local = offset - k * size;
    let mut rem = len;
    while rem > 0 && k < count {
        let want = rem.min(size - local);
        let base = k as isize * ty.extent();
        let took = element_runs(ty, base, local, want, emit);
        debug_assert_eq!(took, want);
        rem -= took;
        k += 1;
        local = 0;
    }
    debug_assert_eq!(rem, 0);
}

/// Collect runs into a vector. Convenience for tests and diagnostics; the
/// hot paths stream through [`for_each_run`].
pub fn collect_runs(ty: &TypeNode, count: usize, offset: usize, len: usize) -> Vec<Run> {
    let mut runs = Vec::new();
    for_each_run(ty, count, offset, len, &mut |delta, len| {
        runs.push(Run { delta, len })
    });
    runs
}

/// Emit runs for `[off, off + len)` of a single element based at `base`.
/// Returns the bytes covered, which is always `len`.
fn element_runs<F>(ty: &TypeNode, base: isize, off: usize, len: usize, emit: &mut F) -> usize
where
    F: FnMut(isize, usize),
{
    debug_assert!(off + len <= ty.size());
    if len == 0 {
        return 0;
    }
    if ty.is_contig() {
        emit(base + ty.true_lb() + off as isize, len);
        return len;
    }

    match ty.kind() {
        // Builtins are contiguous; the fast path above already returned.
        TypeKind::Builtin(_) => unreachable!("builtin types are contiguous"),

        TypeKind::Contig { child, .. } => {
            let csize = child.size();
            let mut idx = off / csize;
            let mut coff = off - idx * csize;
            let mut done = 0;
            while done < len {
                let want = (len - done).min(csize - coff);
                done += element_runs(
                    child,
                    base + idx as isize * child.extent(),
                    coff,
                    want,
                    emit,
                );
                idx += 1;
                coff = 0;
            }
            done
        }

        TypeKind::Hvector {
            blocklen,
            stride,
            child,
            ..
        } => {
            let bsize = blocklen * child.size();
            let mut b = off / bsize;
            let mut boff = off - b * bsize;
            let mut done = 0;
            while done < len {
                done += block_runs(
                    child,
                    base + b as isize * stride,
                    *blocklen,
                    boff,
                    len - done,
                    emit,
                );
                b += 1;
                boff = 0;
            }
            done
        }

        TypeKind::BlkHindexed {
            blocklen,
            displs,
            child,
        } => {
            let bsize = blocklen * child.size();
            let mut b = off / bsize;
            let mut boff = off - b * bsize;
            let mut done = 0;
            while done < len && b < displs.len() {
                done += block_runs(child, base + displs[b], *blocklen, boff, len - done, emit);
                b += 1;
                boff = 0;
            }
            done
        }

        TypeKind::Hindexed { blocks, child } => {
            let csize = child.size();
            let mut cursor = 0usize;
            let mut done = 0;
            for block in blocks {
                if done == len {
                    break;
                }
                let bsize = block.blocklen * csize;
                let bend = cursor + bsize;
                if bsize == 0 || off + done >= bend {
                    cursor = bend;
                    continue;
                }
                let boff = off + done - cursor;
                done += block_runs(
                    child,
                    base + block.disp,
                    block.blocklen,
                    boff,
                    len - done,
                    emit,
                );
                cursor = bend;
            }
            done
        }

        TypeKind::Struct { fields } => {
            let mut cursor = 0usize;
            let mut done = 0;
            for field in fields {
                if done == len {
                    break;
                }
                let bsize = field.blocklen * field.child.size();
                let bend = cursor + bsize;
                if bsize == 0 || off + done >= bend {
                    cursor = bend;
                    continue;
                }
                let boff = off + done - cursor;
                done += block_runs(
                    &field.child,
                    base + field.disp,
                    field.blocklen,
                    boff,
                    len - done,
                    emit,
                );
                cursor = bend;
            }
            done
        }

        // Resizing changes element stepping, not byte addresses.
        TypeKind::Resized { child } => element_runs(child, base, off, len, emit),

        // The nest describes the sub-box as if every start were zero; the
        // start offset is the gap between the node's and the nest's first
        // referenced byte.
        TypeKind::Subarray { nest, .. } => {
            let shift = ty.true_lb() - nest.true_lb();
            element_runs(nest, base + shift, off, len, emit)
        }
    }
}

/// Runs for a block of `blocklen` child elements based at `bbase`, starting
/// `boff` bytes into the block's packed image, up to `limit` bytes.
fn block_runs<F>(
    child: &TypeNode,
    bbase: isize,
    blocklen: usize,
    boff: usize,
    limit: usize,
    emit: &mut F,
) -> usize
where
    F: FnMut(isize, usize),
{
    let csize = child.size();
    let mut j = boff / csize;
    let mut coff = boff - j * csize;
    let mut done = 0;
    while done < limit && j < blocklen {
        let want = (limit - done).min(csize - coff);
        done += element_runs(child, bbase + j as isize * child.extent(), coff, want, emit);
        j += 1;
        coff = 0;
    }
    done
}

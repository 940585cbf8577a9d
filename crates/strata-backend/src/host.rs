//! Host copy routines.
//!
//! The host path has no kernels and no events: it walks the type's runs and
//! memcpys each one on the calling thread. Contiguous types collapse to a
//! single copy inside the walker.

use std::ptr;

use strata_core::node::TypeNode;
use strata_core::walker::for_each_run;

/// Pack `[offset, offset + len)` of the stream of `count` `ty` elements at
/// `src` into `dst`.
///
/// # Safety
/// `src` must be valid for reads over the type footprint of every touched
/// element, `dst` for `len` bytes of writes, and the two must not overlap.
pub unsafe fn pack(
    src: *const u8,
    count: usize,
    ty: &TypeNode,
    offset: usize,
    dst: *mut u8,
    len: usize,
) {
    let mut out = dst;
    for_each_run(ty, count, offset, len, &mut |delta, n| unsafe {
        ptr::copy_nonoverlapping(src.offset(delta), out, n);
        out = out.add(n);
    });
}

/// Scatter the `len` stream bytes at `src` into `[offset, offset + len)` of
/// the typed buffer `dst` holding `count` `ty` elements.
///
/// # Safety
/// `src` must be valid for `len` bytes of reads, `dst` over the touched
/// type footprint for writes, and the two must not overlap.
pub unsafe fn unpack(
    src: *const u8,
    len: usize,
    dst: *mut u8,
    count: usize,
    ty: &TypeNode,
    offset: usize,
) {
    let mut cur = src;
    for_each_run(ty, count, offset, len, &mut |delta, n| unsafe {
        ptr::copy_nonoverlapping(cur, dst.offset(delta), n);
        cur = cur.add(n);
    });
}

//! The pack/unpack engine.
//!
//! Every operation reduces to: clamp the requested byte window against the
//! stream, work out where the two buffers live, and route. Host-to-host
//! work runs on the calling thread over walker runs (a contiguous type is
//! one memcpy); anything touching a device goes to the owning backend's
//! kernel; transfers between two devices stage through the pre-reserved
//! slabs, chunked when the payload exceeds the slab, with the hops chained
//! inside the returned request.

use std::sync::Arc;

use log::debug;

use strata_backend::{host, CopyDirection, StageMemory};
use strata_core::handle::TypeHandle;
use strata_core::node::TypeNode;

use crate::error::Error;
use crate::info::{Info, MemHint};
use crate::request::{Request, Stage, StageOp};
use crate::runtime::{runtime, Runtime};

/// Resolved placement of one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemKind {
    Host,
    Device { slot: usize, device: u32 },
}

fn resolve_kind(rt: &Runtime, ptr: *const u8, hint: Option<MemHint>) -> MemKind {
    match hint {
        Some(MemHint::Host) => MemKind::Host,
        Some(MemHint::Device(device)) => {
            if rt.registry.is_empty() {
                // Recoverable: the hint names a device kind nothing
                // registered; fall back to the host path.
                debug!("device hint with no registered backends; assuming host");
                MemKind::Host
            } else {
                MemKind::Device { slot: 0, device }
            }
        }
        None => match rt.registry.resolve(ptr) {
            Some((slot, device)) => MemKind::Device { slot, device },
            None => MemKind::Host,
        },
    }
}

/// Non-blocking pack: produce at most `max_bytes` bytes of the logical
/// stream of `count` `ty` elements at `src`, starting at stream byte
/// `offset`, into `dst`. Returns the byte count actually produced (also
/// bounded by the stream remainder) and the in-flight request.
///
/// # Safety
/// `src` must be valid for reads over the type footprint of every element
/// touched by the window, `dst` for the returned byte count of writes, and
/// both must stay valid until the request is waited or dropped.
pub unsafe fn ipack(
    src: *const u8,
    count: usize,
    ty: TypeHandle,
    offset: usize,
    dst: *mut u8,
    max_bytes: usize,
    info: Option<&Info>,
) -> Result<(usize, Request), Error> {
    let rt = runtime()?;
    let node = rt.table.lookup(ty)?;
    let total = count * node.size();
    let actual = max_bytes.min(total.saturating_sub(offset));
    if actual == 0 {
        return Ok((0, Request::completed(rt, node, count)));
    }

    let src_kind = resolve_kind(&rt, src, info.and_then(|i| i.src_hint()));
    let dst_kind = resolve_kind(&rt, dst.cast_const(), info.and_then(|i| i.dst_hint()));

    let request = match (src_kind, dst_kind) {
        (MemKind::Host, MemKind::Host) => {
            debug!(
                "pack path=host type={} contig={} len={}",
                node.kind().name(),
                node.is_contig(),
                actual
            );
            unsafe { host::pack(src, count, &node, offset, dst, actual) };
            Request::completed(rt, node, count)
        }
        (
            MemKind::Device { slot, device },
            MemKind::Device {
                slot: dslot,
                device: ddevice,
            },
        ) if (slot, device) != (dslot, ddevice) => unsafe {
            staged_pack(rt, node, count, src, offset, dst, actual, slot, dslot)?
        },
        (src_k, dst_k) => {
            let slot = match (src_k, dst_k) {
                (MemKind::Device { slot, .. }, _) | (_, MemKind::Device { slot, .. }) => slot,
                _ => unreachable!("host-host handled above"),
            };
            debug!(
                "pack path=device backend={} len={}",
                rt.registry.backend(slot).name(),
                actual
            );
            Request::launch(
                rt,
                node,
                count,
                vec![Stage {
                    backend: slot,
                    op: StageOp::Pack {
                        src,
                        offset,
                        len: actual,
                        dst,
                    },
                }],
                Vec::new(),
            )?
        }
    };
    Ok((actual, request))
}

/// Non-blocking unpack: scatter at most `src_len` stream bytes at `src`
/// into `[offset, offset + len)` of the typed buffer `dst` holding `count`
/// `ty` elements.
///
/// # Safety
/// As [`ipack`], with the type footprint writable.
pub unsafe fn iunpack(
    src: *const u8,
    src_len: usize,
    dst: *mut u8,
    count: usize,
    ty: TypeHandle,
    offset: usize,
    info: Option<&Info>,
) -> Result<(usize, Request), Error> {
    let rt = runtime()?;
    let node = rt.table.lookup(ty)?;
    let total = count * node.size();
    let actual = src_len.min(total.saturating_sub(offset));
    if actual == 0 {
        return Ok((0, Request::completed(rt, node, count)));
    }

    let src_kind = resolve_kind(&rt, src, info.and_then(|i| i.src_hint()));
    let dst_kind = resolve_kind(&rt, dst.cast_const(), info.and_then(|i| i.dst_hint()));

    let request = match (src_kind, dst_kind) {
        (MemKind::Host, MemKind::Host) => {
            debug!(
                "unpack path=host type={} contig={} len={}",
                node.kind().name(),
                node.is_contig(),
                actual
            );
            unsafe { host::unpack(src, actual, dst, count, &node, offset) };
            Request::completed(rt, node, count)
        }
        (
            MemKind::Device { slot, device },
            MemKind::Device {
                slot: dslot,
                device: ddevice,
            },
        ) if (slot, device) != (dslot, ddevice) => unsafe {
            staged_unpack(rt, node, count, src, dst, offset, actual, slot, dslot)?
        },
        (src_k, dst_k) => {
            let slot = match (src_k, dst_k) {
                (MemKind::Device { slot, .. }, _) | (_, MemKind::Device { slot, .. }) => slot,
                _ => unreachable!("host-host handled above"),
            };
            debug!(
                "unpack path=device backend={} len={}",
                rt.registry.backend(slot).name(),
                actual
            );
            Request::launch(
                rt,
                node,
                count,
                vec![Stage {
                    backend: slot,
                    op: StageOp::Unpack {
                        src,
                        len: actual,
                        dst,
                        offset,
                    },
                }],
                Vec::new(),
            )?
        }
    };
    Ok((actual, request))
}

/// Blocking [`ipack`].
///
/// # Safety
/// As [`ipack`]; the buffers only need to outlive the call.
pub unsafe fn pack(
    src: *const u8,
    count: usize,
    ty: TypeHandle,
    offset: usize,
    dst: *mut u8,
    max_bytes: usize,
    info: Option<&Info>,
) -> Result<usize, Error> {
    let (actual, request) = unsafe { ipack(src, count, ty, offset, dst, max_bytes, info) }?;
    request.wait()?;
    Ok(actual)
}

/// Blocking [`iunpack`].
///
/// # Safety
/// As [`iunpack`]; the buffers only need to outlive the call.
pub unsafe fn unpack(
    src: *const u8,
    src_len: usize,
    dst: *mut u8,
    count: usize,
    ty: TypeHandle,
    offset: usize,
    info: Option<&Info>,
) -> Result<usize, Error> {
    let (actual, request) = unsafe { iunpack(src, src_len, dst, count, ty, offset, info) }?;
    request.wait()?;
    Ok(actual)
}

/// Device-to-device pack through a staging buffer: alternate pack-to-stage
/// and stage-to-destination hops, chunked by the stage size. Same-backend
/// transfers stage through that backend's device slab; cross-backend ones
/// through the source backend's host slab.
#[allow(clippy::too_many_arguments)]
unsafe fn staged_pack(
    rt: Arc<Runtime>,
    node: Arc<TypeNode>,
    count: usize,
    src: *const u8,
    offset: usize,
    dst: *mut u8,
    len: usize,
    src_slot: usize,
    dst_slot: usize,
) -> Result<Request, Error> {
    let same_backend = src_slot == dst_slot;
    let (memory, dir) = if same_backend {
        (StageMemory::Device, CopyDirection::DeviceToDevice)
    } else {
        (StageMemory::Host, CopyDirection::HostToDevice)
    };
    let lease = rt.registry.acquire_stage(src_slot, memory, len)?;
    let chunk = lease.len().min(len);

    let mut stages = Vec::new();
    let mut done = 0;
    while done < len {
        let n = chunk.min(len - done);
        stages.push(Stage {
            backend: src_slot,
            op: StageOp::Pack {
                src,
                offset: offset + done,
                len: n,
                dst: lease.ptr(),
            },
        });
        stages.push(Stage {
            backend: dst_slot,
            op: StageOp::Copy {
                src: lease.ptr().cast_const(),
                dst: unsafe { dst.add(done) },
                len: n,
                dir,
            },
        });
        done += n;
    }
    debug!(
        "pack path=staged chunks={} stage={:?} len={}",
        stages.len() / 2,
        memory,
        len
    );
    Request::launch(rt, node, count, stages, vec![lease])
}

/// Device-to-device unpack through a staging buffer; mirror of
/// [`staged_pack`] with the flat stream on the source side.
#[allow(clippy::too_many_arguments)]
unsafe fn staged_unpack(
    rt: Arc<Runtime>,
    node: Arc<TypeNode>,
    count: usize,
    src: *const u8,
    dst: *mut u8,
    offset: usize,
    len: usize,
    src_slot: usize,
    dst_slot: usize,
) -> Result<Request, Error> {
    let same_backend = src_slot == dst_slot;
    let (memory, dir) = if same_backend {
        (StageMemory::Device, CopyDirection::DeviceToDevice)
    } else {
        (StageMemory::Host, CopyDirection::DeviceToHost)
    };
    let lease = rt.registry.acquire_stage(src_slot, memory, len)?;
    let chunk = lease.len().min(len);

    let mut stages = Vec::new();
    let mut done = 0;
    while done < len {
        let n = chunk.min(len - done);
        stages.push(Stage {
            backend: src_slot,
            op: StageOp::Copy {
                src: unsafe { src.add(done) },
                dst: lease.ptr(),
                len: n,
                dir,
            },
        });
        stages.push(Stage {
            backend: dst_slot,
            op: StageOp::Unpack {
                src: lease.ptr().cast_const(),
                len: n,
                dst,
                offset: offset + done,
            },
        });
        done += n;
    }
    debug!(
        "unpack path=staged chunks={} stage={:?} len={}",
        stages.len() / 2,
        memory,
        len
    );
    Request::launch(rt, node, count, stages, vec![lease])
}

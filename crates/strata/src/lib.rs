//! Strata: derived datatypes and an asynchronous pack/unpack engine.
//!
//! A derived datatype describes a possibly non-contiguous memory layout
//! (strided vectors, indexed blocks, structs, n-dimensional sub-boxes)
//! built recursively from primitive leaves. Packing serializes a typed
//! view of a buffer into a flat byte stream (any sub-window of it, in any
//! tiling); unpacking is the inverse. Buffers may live in host memory or
//! on a device; transfers between placements run asynchronously and are
//! joined through [`Request`]s.
//!
//! ```no_run
//! use strata::{Order, TypeHandle};
//!
//! strata::init()?;
//!
//! // A 2x2 box out of a 3x3 row-major i32 array.
//! let ty = strata::create_subarray(&[3, 3], &[2, 2], &[1, 1], Order::C, TypeHandle::I32)?;
//! let grid: Vec<i32> = (0..9).collect();
//! let mut payload = vec![0u8; strata::type_size(ty)?];
//!
//! let n = unsafe {
//!     strata::pack(grid.as_ptr().cast(), 1, ty, 0, payload.as_mut_ptr(), payload.len(), None)?
//! };
//! assert_eq!(n, payload.len());
//!
//! strata::type_free(ty)?;
//! strata::finalize()?;
//! # Ok::<(), strata::Error>(())
//! ```

pub mod describe;
pub mod engine;
pub mod error;
pub mod info;
pub mod request;

mod runtime;

pub use describe::{describe, describe_json, TypeDescription};
pub use engine::{ipack, iunpack, pack, unpack};
pub use error::Error;
pub use info::Info;
pub use request::{Request, RequestState};
pub use runtime::{finalize, init, init_with, Config};

pub use strata_core::builtin::Builtin;
pub use strata_core::handle::{TypeHandle, PREDEFINED_LAST};
pub use strata_core::metrics::{Metrics, Order};

use runtime::runtime;

/// Share `oldtype` under a fresh handle. The underlying node is not
/// copied; its reference count grows by the new table entry.
pub fn create_dup(oldtype: TypeHandle) -> Result<TypeHandle, Error> {
    let rt = runtime()?;
    let node = rt.table.lookup(oldtype)?;
    Ok(rt.table.publish(node)?)
}

/// `count` consecutive `oldtype` elements.
pub fn create_contig(count: usize, oldtype: TypeHandle) -> Result<TypeHandle, Error> {
    let rt = runtime()?;
    let child = rt.table.lookup(oldtype)?;
    let node = rt.factory.contig(count, &child)?;
    Ok(rt.table.publish(node)?)
}

/// `count` blocks of `blocklen` elements, `stride` bytes apart.
pub fn create_hvector(
    count: usize,
    blocklen: usize,
    stride: isize,
    oldtype: TypeHandle,
) -> Result<TypeHandle, Error> {
    let rt = runtime()?;
    let child = rt.table.lookup(oldtype)?;
    let node = rt.factory.hvector(count, blocklen, stride, &child)?;
    Ok(rt.table.publish(node)?)
}

/// Blocks of elements at explicit byte displacements.
pub fn create_hindexed(
    blocklens: &[usize],
    displs: &[isize],
    oldtype: TypeHandle,
) -> Result<TypeHandle, Error> {
    let rt = runtime()?;
    let child = rt.table.lookup(oldtype)?;
    let node = rt.factory.hindexed(blocklens, displs, &child)?;
    Ok(rt.table.publish(node)?)
}

/// Uniform-length blocks at explicit byte displacements.
pub fn create_blkhindexed(
    blocklen: usize,
    displs: &[isize],
    oldtype: TypeHandle,
) -> Result<TypeHandle, Error> {
    let rt = runtime()?;
    let child = rt.table.lookup(oldtype)?;
    let node = rt.factory.blkhindexed(blocklen, displs, &child)?;
    Ok(rt.table.publish(node)?)
}

/// Heterogeneous blocks: one child type per block.
pub fn create_struct(
    blocklens: &[usize],
    displs: &[isize],
    oldtypes: &[TypeHandle],
) -> Result<TypeHandle, Error> {
    let rt = runtime()?;
    let children = oldtypes
        .iter()
        .map(|&h| rt.table.lookup(h))
        .collect::<Result<Vec<_>, _>>()?;
    let node = rt.factory.strukt(blocklens, displs, &children)?;
    Ok(rt.table.publish(node)?)
}

/// `oldtype` with overridden lower bound and extent.
pub fn create_resized(
    oldtype: TypeHandle,
    lb: isize,
    extent: isize,
) -> Result<TypeHandle, Error> {
    let rt = runtime()?;
    let child = rt.table.lookup(oldtype)?;
    let node = rt.factory.resized(&child, lb, extent)?;
    Ok(rt.table.publish(node)?)
}

/// An n-dimensional sub-box of an n-dimensional `oldtype` array. Zero
/// dimensions yield the null type.
pub fn create_subarray(
    sizes: &[usize],
    subsizes: &[usize],
    starts: &[usize],
    order: Order,
    oldtype: TypeHandle,
) -> Result<TypeHandle, Error> {
    if sizes.is_empty() && subsizes.is_empty() && starts.is_empty() {
        return Ok(TypeHandle::NULL);
    }
    let rt = runtime()?;
    let child = rt.table.lookup(oldtype)?;
    let node = rt.factory.subarray(sizes, subsizes, starts, order, &child)?;
    Ok(rt.table.publish(node)?)
}

/// Total meaningful bytes in one element.
pub fn type_size(handle: TypeHandle) -> Result<usize, Error> {
    Ok(runtime()?.table.lookup(handle)?.size())
}

/// Logical `(lb, extent)`.
pub fn type_extent(handle: TypeHandle) -> Result<(isize, isize), Error> {
    let node = runtime()?.table.lookup(handle)?;
    Ok((node.lb(), node.extent()))
}

/// Tight `(true_lb, true_extent)` over the referenced bytes.
pub fn type_true_extent(handle: TypeHandle) -> Result<(isize, isize), Error> {
    let node = runtime()?.table.lookup(handle)?;
    Ok((node.true_lb(), node.true_ub() - node.true_lb()))
}

/// Live references to the node behind `handle`: handle-table entries plus
/// parents sharing it.
pub fn type_refcount(handle: TypeHandle) -> Result<usize, Error> {
    Ok(runtime()?.table.refcount(handle)?)
}

/// Release the table's reference. The node survives while parents or dup
/// handles still share it; predefined handles cannot be freed.
pub fn type_free(handle: TypeHandle) -> Result<(), Error> {
    Ok(runtime()?.table.free(handle)?)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Mutex, MutexGuard};

    static LOCK: Mutex<()> = Mutex::new(());

    /// Serializes tests around the process-global runtime; init/finalize
    /// are not thread-safe against themselves.
    pub(crate) fn lock() -> MutexGuard<'static, ()> {
        LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    struct FinalizeGuard;

    impl Drop for FinalizeGuard {
        fn drop(&mut self) {
            let _ = crate::finalize();
        }
    }

    pub(crate) fn with_runtime_config(config: crate::Config, f: impl FnOnce()) {
        let _guard = lock();
        let _ = env_logger::builder().is_test(true).try_init();
        crate::init_with(config).unwrap();
        let _finalize = FinalizeGuard;
        f();
    }

    pub(crate) fn with_runtime(f: impl FnOnce()) {
        with_runtime_config(crate::Config::default(), f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{lock, with_runtime};
    use std::sync::Arc;

    #[test]
    fn lifecycle() {
        let _guard = lock();
        assert!(matches!(finalize(), Err(Error::NotInitialized)));
        assert!(matches!(
            type_size(TypeHandle::I32),
            Err(Error::NotInitialized)
        ));

        init().unwrap();
        assert!(matches!(init(), Err(Error::AlreadyInitialized)));
        assert_eq!(type_size(TypeHandle::I32).unwrap(), 4);
        finalize().unwrap();

        assert!(matches!(finalize(), Err(Error::NotInitialized)));
    }

    #[test]
    fn predefined_types_are_published() {
        with_runtime(|| {
            assert_eq!(type_size(TypeHandle::BYTE).unwrap(), 1);
            assert_eq!(type_size(TypeHandle::F64).unwrap(), 8);
            assert_eq!(type_extent(TypeHandle::I64).unwrap(), (0, 8));
            assert_eq!(type_true_extent(TypeHandle::U16).unwrap(), (0, 2));
        });
    }

    #[test]
    fn metric_laws_through_the_api() {
        with_runtime(|| {
            let t = create_contig(5, TypeHandle::I32).unwrap();
            assert_eq!(type_size(t).unwrap(), 5 * 4);

            let v = create_hvector(3, 2, 16, TypeHandle::I32).unwrap();
            let (_, extent) = type_extent(v).unwrap();
            assert_eq!(extent, 2 * 16 + 2 * 4);

            type_free(t).unwrap();
            type_free(v).unwrap();
        });
    }

    #[test]
    fn refcount_scenario() {
        with_runtime(|| {
            let a = create_contig(2, TypeHandle::I32).unwrap();
            let b = create_contig(3, a).unwrap();
            let c = create_dup(b).unwrap();
            assert_ne!(b.raw(), c.raw());

            // `a`'s node: its table slot plus `b`'s child reference.
            assert_eq!(type_refcount(a).unwrap(), 2);
            // `b` and `c` share one node from two slots.
            assert_eq!(type_refcount(b).unwrap(), 2);
            assert_eq!(type_refcount(c).unwrap(), 2);

            type_free(c).unwrap();
            assert_eq!(type_refcount(b).unwrap(), 1);

            type_free(b).unwrap();
            assert_eq!(type_refcount(a).unwrap(), 1);

            type_free(a).unwrap();
            assert!(matches!(
                type_size(a),
                Err(Error::Layout(strata_core::LayoutError::InvalidHandle(_)))
            ));
        });
    }

    #[test]
    fn freed_parent_keeps_shared_child_alive() {
        with_runtime(|| {
            let a = create_contig(2, TypeHandle::I32).unwrap();
            let b = create_contig(3, a).unwrap();
            let node_a = crate::runtime::runtime().unwrap().table.lookup(a).unwrap();

            type_free(a).unwrap();
            // Handle gone, node alive under `b`.
            assert!(type_size(a).is_err());
            assert_eq!(Arc::strong_count(&node_a), 2);

            type_free(b).unwrap();
            assert_eq!(Arc::strong_count(&node_a), 1);
        });
    }

    #[test]
    fn null_subarray() {
        with_runtime(|| {
            let h = create_subarray(&[], &[], &[], Order::C, TypeHandle::I32).unwrap();
            assert!(h.is_null());
            assert!(type_size(h).is_err());
        });
    }

    #[test]
    fn invalid_handles_are_rejected() {
        with_runtime(|| {
            let bogus = TypeHandle::from_raw(0x7fff_0000);
            assert!(type_size(bogus).is_err());
            assert!(create_contig(2, bogus).is_err());
            assert!(matches!(
                type_free(TypeHandle::I32),
                Err(Error::Layout(strata_core::LayoutError::FreePredefined(_)))
            ));
        });
    }

    #[test]
    fn struct_of_mixed_children() {
        with_runtime(|| {
            let s = create_struct(
                &[2, 1],
                &[0, 8],
                &[TypeHandle::I32, TypeHandle::F64],
            )
            .unwrap();
            assert_eq!(type_size(s).unwrap(), 16);
            let (lb, extent) = type_extent(s).unwrap();
            assert_eq!((lb, extent), (0, 16));
            type_free(s).unwrap();
        });
    }
}

//! The device backend contract.
//!
//! Each device kind (CUDA, ZE, HIP, or the in-tree simulator) implements
//! [`DeviceBackend`]. The engine never talks to a device any other way: it
//! asks a backend to classify pointers, allocate staging memory, and launch
//! pack/unpack/copy work, and it observes completion through the returned
//! [`Event`]s. Stream selection is internal to an implementation.

use std::any::Any;

use strata_core::node::{BackendState, TypeNode};

use crate::error::BackendError;
use crate::event::Event;

/// Where a pointer lives, as judged by one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrKind {
    /// Not owned by the queried backend.
    Host,
    /// Owned by the queried backend, on the given device.
    Device(u32),
}

/// Direction of a contiguous staging copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

/// One device kind. Object-safe: the registry stores `Box<dyn
/// DeviceBackend>` and fans hook calls out across every registered
/// implementation.
pub trait DeviceBackend: Send + Sync {
    /// Stable identifier for logs and registration.
    fn name(&self) -> &'static str;

    /// Devices this backend exposes.
    fn device_count(&self) -> u32;

    /// Release device resources. Called once, after the staging slabs have
    /// been returned.
    fn finalize(&self) -> Result<(), BackendError>;

    /// Attach cached per-type state (e.g. a compiled kernel) to a freshly
    /// built node. `None` means this backend keeps nothing for the type.
    fn type_create(&self, node: &TypeNode) -> Result<Option<BackendState>, BackendError>;

    /// Release whatever `type_create` attached. The boxed state itself is
    /// dropped with the node.
    fn type_free(&self, node: &TypeNode, state: Option<&(dyn Any + Send + Sync)>);

    /// Allocate registered host memory (staging-capable).
    fn host_alloc(&self, len: usize) -> Result<*mut u8, BackendError>;

    /// Free memory from [`DeviceBackend::host_alloc`].
    ///
    /// # Safety
    /// `ptr` must come from `host_alloc` on this backend and not be freed
    /// twice.
    unsafe fn host_free(&self, ptr: *mut u8);

    /// Allocate memory on `device`.
    fn device_alloc(&self, len: usize, device: u32) -> Result<*mut u8, BackendError>;

    /// Free memory from [`DeviceBackend::device_alloc`].
    ///
    /// # Safety
    /// `ptr` must come from `device_alloc` on this backend and not be freed
    /// twice.
    unsafe fn device_free(&self, ptr: *mut u8);

    /// Launch a pack kernel: produce `[offset, offset + len)` of the packed
    /// stream of `count` `ty` elements at `src` into `dst`. At least one of
    /// the two buffers is on this backend's devices.
    ///
    /// # Safety
    /// `src` must cover the touched type footprint, `dst` must hold `len`
    /// writable bytes, and both must stay valid until the event completes.
    #[allow(clippy::too_many_arguments)]
    unsafe fn ipack(
        &self,
        src: *const u8,
        count: usize,
        ty: &TypeNode,
        state: Option<&(dyn Any + Send + Sync)>,
        offset: usize,
        dst: *mut u8,
        len: usize,
    ) -> Result<Box<dyn Event>, BackendError>;

    /// Launch an unpack kernel: scatter the `len` stream bytes at `src`
    /// into `[offset, offset + len)` of the typed buffer `dst`.
    ///
    /// # Safety
    /// As [`DeviceBackend::ipack`], with the footprint writable.
    #[allow(clippy::too_many_arguments)]
    unsafe fn iunpack(
        &self,
        src: *const u8,
        len: usize,
        dst: *mut u8,
        count: usize,
        ty: &TypeNode,
        state: Option<&(dyn Any + Send + Sync)>,
        offset: usize,
    ) -> Result<Box<dyn Event>, BackendError>;

    /// Launch a contiguous copy between host and device memory (the
    /// staging hop).
    ///
    /// # Safety
    /// `src` and `dst` must be valid for `len` bytes and must not overlap.
    unsafe fn icopy(
        &self,
        src: *const u8,
        dst: *mut u8,
        len: usize,
        dir: CopyDirection,
    ) -> Result<Box<dyn Event>, BackendError>;

    /// Classify a pointer. `Host` means "not mine", including foreign
    /// device memory.
    fn pointer_kind(&self, ptr: *const u8) -> PtrKind;
}

//! The backend registry.
//!
//! Backends register once at init into an ordered list. Type create/free
//! hooks fan out across every entry, pointer queries ask each backend in
//! registration order, and each entry carries its pre-reserved host and
//! device staging slabs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};

use strata_core::node::{TypeHooks, TypeNode};

use crate::backend::DeviceBackend;
use crate::error::BackendError;
use crate::slab::Slab;

struct RegisteredBackend {
    backend: Box<dyn DeviceBackend>,
    host_slab: Slab,
    /// Absent for a backend exposing no devices.
    device_slab: Option<Slab>,
}

/// Ordered list of registered device backends plus their staging slabs.
pub struct BackendRegistry {
    backends: Vec<RegisteredBackend>,
    finalized: AtomicBool,
}

/// Which staging slab a lease borrows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMemory {
    Host,
    Device,
}

impl BackendRegistry {
    pub fn new() -> Self {
        BackendRegistry {
            backends: Vec::new(),
            finalized: AtomicBool::new(false),
        }
    }

    /// Register a backend and reserve its staging slabs. Returns the
    /// backend's slot, which is also its index into every node's cached
    /// backend state.
    pub fn register(
        &mut self,
        backend: Box<dyn DeviceBackend>,
        slab_bytes: usize,
    ) -> Result<usize, BackendError> {
        let host_ptr = backend.host_alloc(slab_bytes)?;
        let device_slab = if backend.device_count() > 0 {
            match backend.device_alloc(slab_bytes, 0) {
                Ok(ptr) => Some(Slab::new(ptr, slab_bytes)),
                Err(e) => {
                    unsafe { backend.host_free(host_ptr) };
                    return Err(e);
                }
            }
        } else {
            None
        };
        debug!(
            "registered backend {} ({} devices, {}-byte slabs)",
            backend.name(),
            backend.device_count(),
            slab_bytes
        );
        self.backends.push(RegisteredBackend {
            host_slab: Slab::new(host_ptr, slab_bytes),
            device_slab,
            backend,
        });
        Ok(self.backends.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn backend(&self, slot: usize) -> &dyn DeviceBackend {
        self.backends[slot].backend.as_ref()
    }

    /// Classify a pointer across all backends, in registration order.
    pub fn resolve(&self, ptr: *const u8) -> Option<(usize, u32)> {
        for (slot, rb) in self.backends.iter().enumerate() {
            if let crate::backend::PtrKind::Device(dev) = rb.backend.pointer_kind(ptr) {
                return Some((slot, dev));
            }
        }
        None
    }

    /// Borrow a staging slab, or fall back to a one-shot allocation of
    /// `bytes` when the slab is busy under a concurrent request.
    pub fn acquire_stage(
        self: &Arc<Self>,
        slot: usize,
        memory: StageMemory,
        bytes: usize,
    ) -> Result<StageLease, BackendError> {
        let rb = &self.backends[slot];
        let slab = match memory {
            StageMemory::Host => Some(&rb.host_slab),
            StageMemory::Device => rb.device_slab.as_ref(),
        };
        if let Some(slab) = slab {
            if slab.try_acquire() {
                return Ok(StageLease {
                    registry: Arc::clone(self),
                    slot,
                    memory,
                    owned: false,
                    ptr: slab.ptr(),
                    len: slab.len(),
                });
            }
        }
        debug!(
            "{} staging slab busy; one-shot {bytes}-byte allocation",
            rb.backend.name()
        );
        let ptr = match memory {
            StageMemory::Host => rb.backend.host_alloc(bytes)?,
            StageMemory::Device => rb.backend.device_alloc(bytes, 0)?,
        };
        Ok(StageLease {
            registry: Arc::clone(self),
            slot,
            memory,
            owned: true,
            ptr,
            len: bytes,
        })
    }

    /// Return the slabs and finalize every backend. Idempotent; the first
    /// backend error is reported after all backends have been attempted.
    pub fn finalize(&self) -> Result<(), BackendError> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut first_err = None;
        for rb in &self.backends {
            if rb.host_slab.try_acquire() {
                rb.host_slab.release();
            } else {
                warn!(
                    "{}: staging slab still leased at finalize",
                    rb.backend.name()
                );
            }
            unsafe { rb.backend.host_free(rb.host_slab.ptr()) };
            if let Some(ds) = &rb.device_slab {
                unsafe { rb.backend.device_free(ds.ptr()) };
            }
            if let Err(e) = rb.backend.finalize() {
                error!("{} finalize failed: {e}", rb.backend.name());
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        BackendRegistry::new()
    }
}

impl TypeHooks for BackendRegistry {
    fn type_create(&self, node: &mut TypeNode) -> Result<(), String> {
        for (slot, rb) in self.backends.iter().enumerate() {
            let state = rb.backend.type_create(node).map_err(|e| e.to_string())?;
            node.set_backend_state(slot, state);
        }
        Ok(())
    }

    fn type_free(&self, node: &TypeNode) {
        for (slot, rb) in self.backends.iter().enumerate() {
            rb.backend.type_free(node, node.backend_state(slot));
        }
    }
}

/// A borrowed staging slab or a one-shot staging allocation. Dropping the
/// lease releases the slab (or frees the allocation), so a request that
/// unwinds cannot strand staging memory.
pub struct StageLease {
    registry: Arc<BackendRegistry>,
    slot: usize,
    memory: StageMemory,
    owned: bool,
    ptr: *mut u8,
    len: usize,
}

// The lease owns exclusive access to its bytes until dropped.
unsafe impl Send for StageLease {}

impl StageLease {
    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for StageLease {
    fn drop(&mut self) {
        let rb = &self.registry.backends[self.slot];
        if self.owned {
            unsafe {
                match self.memory {
                    StageMemory::Host => rb.backend.host_free(self.ptr),
                    StageMemory::Device => rb.backend.device_free(self.ptr),
                }
            }
        } else {
            if self.registry.finalized.load(Ordering::SeqCst) {
                warn!("staging lease outlived finalize");
                return;
            }
            match self.memory {
                StageMemory::Host => rb.host_slab.release(),
                StageMemory::Device => {
                    if let Some(ds) = &rb.device_slab {
                        ds.release();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBackend;
    use strata_core::builtin::Builtin;
    use strata_core::node::TypeFactory;

    fn registry_with(backends: Vec<Box<dyn DeviceBackend>>) -> Arc<BackendRegistry> {
        let mut reg = BackendRegistry::new();
        for b in backends {
            reg.register(b, 256).unwrap();
        }
        Arc::new(reg)
    }

    #[test]
    fn hooks_fan_out_across_backends() {
        let reg = registry_with(vec![
            Box::new(SimBackend::new(1)),
            Box::new(SimBackend::named("sim2", 1)),
        ]);
        let factory = TypeFactory::new(reg.clone() as Arc<dyn TypeHooks>);
        let node = factory.builtin(Builtin::I32).unwrap();

        assert!(node.backend_state(0).is_some());
        assert!(node.backend_state(1).is_some());

        drop(node);
        reg.finalize().unwrap();
    }

    #[test]
    fn resolve_finds_the_owning_backend() {
        let reg = registry_with(vec![
            Box::new(SimBackend::new(1)),
            Box::new(SimBackend::named("sim2", 2)),
        ]);
        let p = reg.backend(1).device_alloc(32, 1).unwrap();
        assert_eq!(reg.resolve(p), Some((1, 1)));

        let stack = 0u8;
        assert_eq!(reg.resolve(&stack as *const u8), None);

        unsafe { reg.backend(1).device_free(p) };
        reg.finalize().unwrap();
    }

    #[test]
    fn busy_slab_falls_back_to_allocation() {
        let reg = registry_with(vec![Box::new(SimBackend::new(1))]);

        let a = reg.acquire_stage(0, StageMemory::Host, 64).unwrap();
        assert_eq!(a.len(), 256);
        let b = reg.acquire_stage(0, StageMemory::Host, 64).unwrap();
        assert_eq!(b.len(), 64);
        assert_ne!(a.ptr(), b.ptr());

        drop(a);
        let c = reg.acquire_stage(0, StageMemory::Host, 64).unwrap();
        assert_eq!(c.len(), 256);

        drop(b);
        drop(c);
        reg.finalize().unwrap();
    }

    #[test]
    fn device_stage_lease() {
        let reg = registry_with(vec![Box::new(SimBackend::new(2))]);
        let lease = reg.acquire_stage(0, StageMemory::Device, 32).unwrap();
        assert_eq!(lease.len(), 256);
        drop(lease);
        reg.finalize().unwrap();
    }

    #[test]
    fn finalize_is_idempotent() {
        let reg = registry_with(vec![Box::new(SimBackend::new(1))]);
        reg.finalize().unwrap();
        reg.finalize().unwrap();
    }
}

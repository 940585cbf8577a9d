//! The simulated device backend.
//!
//! Models a GPU-like device kind entirely in host memory: device
//! allocations come from a tracked arena so pointer classification is
//! exact, kernels are the host copy routines, and completion goes through
//! the same event machinery a real backend would use. Kernels execute at
//! submission; an optional latency makes events report `Pending` for a
//! configurable number of probes so callers exercise the asynchronous
//! paths.
//!
//! Real device kinds (CUDA, ZE, HIP) implement the same trait out of tree.

use std::any::Any;
use std::sync::Mutex;

use log::{debug, trace};

use strata_core::node::{BackendState, TypeNode};

use crate::backend::{CopyDirection, DeviceBackend, PtrKind};
use crate::error::BackendError;
use crate::event::{Event, EventStatus};
use crate::host;

/// Cached kernel descriptor the sim backend attaches to every type.
#[derive(Debug)]
pub struct SimTypeState {
    pub runs_per_element: usize,
    pub element_size: usize,
}

struct Region {
    base: usize,
    len: usize,
    device: u32,
}

#[derive(Default)]
struct Arena {
    device: Vec<Region>,
    host: Vec<Region>,
}

/// A simulated device kind with `devices` devices.
pub struct SimBackend {
    name: &'static str,
    devices: u32,
    latency: u32,
    arena: Mutex<Arena>,
}

impl SimBackend {
    pub fn new(devices: u32) -> Self {
        SimBackend::named("sim", devices)
    }

    /// A second instance under a different name, for multi-backend setups.
    pub fn named(name: &'static str, devices: u32) -> Self {
        SimBackend {
            name,
            devices,
            latency: 0,
            arena: Mutex::new(Arena::default()),
        }
    }

    /// Events report `Pending` for `latency` probes before completing.
    pub fn with_latency(mut self, latency: u32) -> Self {
        self.latency = latency;
        self
    }

    fn event(&self) -> Box<dyn Event> {
        Box::new(SimEvent {
            remaining: self.latency,
        })
    }
}

fn raw_alloc(len: usize) -> *mut u8 {
    let buf = vec![0u8; len].into_boxed_slice();
    Box::into_raw(buf) as *mut u8
}

unsafe fn raw_free(ptr: *mut u8, len: usize) {
    let slice = std::ptr::slice_from_raw_parts_mut(ptr, len);
    drop(unsafe { Box::from_raw(slice) });
}

impl DeviceBackend for SimBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn device_count(&self) -> u32 {
        self.devices
    }

    fn finalize(&self) -> Result<(), BackendError> {
        let mut arena = self.arena.lock().unwrap();
        let leaked = arena.device.len() + arena.host.len();
        if leaked > 0 {
            debug!("{}: freeing {} leaked allocations", self.name, leaked);
        }
        let mut regions: Vec<_> = arena.device.drain(..).collect();
        regions.extend(arena.host.drain(..));
        for region in regions {
            unsafe { raw_free(region.base as *mut u8, region.len) };
        }
        Ok(())
    }

    fn type_create(&self, node: &TypeNode) -> Result<Option<BackendState>, BackendError> {
        Ok(Some(Box::new(SimTypeState {
            runs_per_element: node.num_contig(),
            element_size: node.size(),
        })))
    }

    fn type_free(&self, _node: &TypeNode, _state: Option<&(dyn Any + Send + Sync)>) {
        // The descriptor drops with the node; nothing device-side to tear
        // down.
    }

    fn host_alloc(&self, len: usize) -> Result<*mut u8, BackendError> {
        debug_assert!(len > 0);
        let ptr = raw_alloc(len);
        self.arena.lock().unwrap().host.push(Region {
            base: ptr as usize,
            len,
            device: 0,
        });
        Ok(ptr)
    }

    unsafe fn host_free(&self, ptr: *mut u8) {
        let mut arena = self.arena.lock().unwrap();
        let idx = arena
            .host
            .iter()
            .position(|r| r.base == ptr as usize)
            .expect("host_free of a pointer this backend never allocated");
        let region = arena.host.swap_remove(idx);
        unsafe { raw_free(region.base as *mut u8, region.len) };
    }

    fn device_alloc(&self, len: usize, device: u32) -> Result<*mut u8, BackendError> {
        if device >= self.devices {
            return Err(BackendError::UnknownDevice(device));
        }
        debug_assert!(len > 0);
        let ptr = raw_alloc(len);
        self.arena.lock().unwrap().device.push(Region {
            base: ptr as usize,
            len,
            device,
        });
        Ok(ptr)
    }

    unsafe fn device_free(&self, ptr: *mut u8) {
        let mut arena = self.arena.lock().unwrap();
        let idx = arena
            .device
            .iter()
            .position(|r| r.base == ptr as usize)
            .expect("device_free of a pointer this backend never allocated");
        let region = arena.device.swap_remove(idx);
        unsafe { raw_free(region.base as *mut u8, region.len) };
    }

    unsafe fn ipack(
        &self,
        src: *const u8,
        count: usize,
        ty: &TypeNode,
        state: Option<&(dyn Any + Send + Sync)>,
        offset: usize,
        dst: *mut u8,
        len: usize,
    ) -> Result<Box<dyn Event>, BackendError> {
        let runs = state
            .and_then(|s| s.downcast_ref::<SimTypeState>())
            .map(|s| s.runs_per_element);
        trace!(
            "{}: pack kernel type={} runs={:?} offset={} len={}",
            self.name,
            ty.kind().name(),
            runs,
            offset,
            len
        );
        unsafe { host::pack(src, count, ty, offset, dst, len) };
        Ok(self.event())
    }

    unsafe fn iunpack(
        &self,
        src: *const u8,
        len: usize,
        dst: *mut u8,
        count: usize,
        ty: &TypeNode,
        state: Option<&(dyn Any + Send + Sync)>,
        offset: usize,
    ) -> Result<Box<dyn Event>, BackendError> {
        let runs = state
            .and_then(|s| s.downcast_ref::<SimTypeState>())
            .map(|s| s.runs_per_element);
        trace!(
            "{}: unpack kernel type={} runs={:?} offset={} len={}",
            self.name,
            ty.kind().name(),
            runs,
            offset,
            len
        );
        unsafe { host::unpack(src, len, dst, count, ty, offset) };
        Ok(self.event())
    }

    unsafe fn icopy(
        &self,
        src: *const u8,
        dst: *mut u8,
        len: usize,
        dir: CopyDirection,
    ) -> Result<Box<dyn Event>, BackendError> {
        trace!("{}: copy {:?} len={}", self.name, dir, len);
        unsafe { std::ptr::copy_nonoverlapping(src, dst, len) };
        Ok(self.event())
    }

    fn pointer_kind(&self, ptr: *const u8) -> PtrKind {
        let p = ptr as usize;
        let arena = self.arena.lock().unwrap();
        for region in &arena.device {
            if p >= region.base && p < region.base + region.len {
                return PtrKind::Device(region.device);
            }
        }
        PtrKind::Host
    }
}

struct SimEvent {
    remaining: u32,
}

impl Event for SimEvent {
    fn query(&mut self) -> Result<EventStatus, BackendError> {
        if self.remaining > 0 {
            self.remaining -= 1;
            Ok(EventStatus::Pending)
        } else {
            Ok(EventStatus::Complete)
        }
    }

    fn wait(&mut self) -> Result<(), BackendError> {
        self.remaining = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::builtin::Builtin;
    use strata_core::node::TypeFactory;

    #[test]
    fn device_pointers_are_classified() {
        let sim = SimBackend::new(2);
        let a = sim.device_alloc(64, 1).unwrap();
        let stack = 0u64;

        assert_eq!(sim.pointer_kind(a), PtrKind::Device(1));
        assert_eq!(sim.pointer_kind(unsafe { a.add(63) }), PtrKind::Device(1));
        assert_eq!(
            sim.pointer_kind(&stack as *const u64 as *const u8),
            PtrKind::Host
        );

        unsafe { sim.device_free(a) };
        sim.finalize().unwrap();
    }

    #[test]
    fn unknown_device_is_rejected() {
        let sim = SimBackend::new(1);
        assert!(matches!(
            sim.device_alloc(16, 3),
            Err(BackendError::UnknownDevice(3))
        ));
        sim.finalize().unwrap();
    }

    #[test]
    fn latency_events_report_pending_first() {
        let sim = SimBackend::new(1).with_latency(2);
        let mut ev = sim.event();
        assert_eq!(ev.query().unwrap(), EventStatus::Pending);
        assert_eq!(ev.query().unwrap(), EventStatus::Pending);
        assert_eq!(ev.query().unwrap(), EventStatus::Complete);

        let mut ev = sim.event();
        ev.wait().unwrap();
        assert_eq!(ev.query().unwrap(), EventStatus::Complete);
        sim.finalize().unwrap();
    }

    #[test]
    fn pack_kernel_works_on_device_memory() {
        let _ = env_logger::builder().is_test(true).try_init();
        let sim = SimBackend::new(1);
        let factory = TypeFactory::detached();
        let leaf = factory.builtin(Builtin::I32).unwrap();
        let ty = factory.hvector(2, 1, 12, &leaf).unwrap();

        let src: Vec<i32> = vec![5, 6, 7, 8, 9, 10];
        let dev = sim.device_alloc(24, 0).unwrap();
        let out = sim.device_alloc(8, 0).unwrap();
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr().cast::<u8>(), dev, 24);
            let state = sim.type_create(&ty).unwrap();
            let mut ev = sim
                .ipack(dev, 1, &ty, state.as_deref(), 0, out, 8)
                .unwrap();
            ev.wait().unwrap();

            let mut got = [0i32; 2];
            std::ptr::copy_nonoverlapping(out, got.as_mut_ptr().cast(), 8);
            assert_eq!(got, [5, 8]);

            sim.device_free(dev);
            sim.device_free(out);
        }
        sim.finalize().unwrap();
    }

    #[test]
    fn finalize_reclaims_leaks() {
        let sim = SimBackend::new(1);
        let _ = sim.device_alloc(32, 0).unwrap();
        let _ = sim.host_alloc(16).unwrap();
        sim.finalize().unwrap();
        let arena = sim.arena.lock().unwrap();
        assert!(arena.device.is_empty() && arena.host.is_empty());
    }
}

//! Pre-reserved staging slabs.

use std::sync::atomic::{AtomicBool, Ordering};

/// A fixed staging buffer owned by the registry for one backend. At most
/// one request borrows it at a time; contenders fall back to one-shot
/// allocations.
pub struct Slab {
    ptr: *mut u8,
    len: usize,
    busy: AtomicBool,
}

// The raw pointer is owned by the registry for the library's lifetime and
// handed out only through exclusive leases.
unsafe impl Send for Slab {}
unsafe impl Sync for Slab {}

impl Slab {
    pub(crate) fn new(ptr: *mut u8, len: usize) -> Self {
        Slab {
            ptr,
            len,
            busy: AtomicBool::new(false),
        }
    }

    pub(crate) fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn try_acquire(&self) -> bool {
        !self.busy.swap(true, Ordering::Acquire)
    }

    pub(crate) fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_acquire() {
        let mut backing = [0u8; 8];
        let slab = Slab::new(backing.as_mut_ptr(), 8);
        assert!(slab.try_acquire());
        assert!(!slab.try_acquire());
        slab.release();
        assert!(slab.try_acquire());
    }
}

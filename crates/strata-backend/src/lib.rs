//! Device backends for Strata.
//!
//! The engine treats every device kind as a [`DeviceBackend`] trait object:
//! memory allocation, pointer classification, pack/unpack kernels, and
//! completion events all go through that one contract. This crate holds the
//! contract, the ordered [`BackendRegistry`] with its pre-reserved staging
//! slabs, the host copy routines (the no-device path, which needs no
//! events), and the in-tree [`SimBackend`] that stands in for a GPU so
//! every cross-placement path can run anywhere.

pub mod backend;
pub mod error;
pub mod event;
pub mod host;
pub mod registry;
pub mod sim;

mod slab;

pub use backend::{CopyDirection, DeviceBackend, PtrKind};
pub use error::BackendError;
pub use event::{CompletedEvent, Event, EventStatus};
pub use registry::{BackendRegistry, StageLease, StageMemory};
pub use sim::SimBackend;

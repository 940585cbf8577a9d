//! Core layout machinery for Strata.
//!
//! A derived datatype is a tree describing a possibly non-contiguous memory
//! layout: builtin leaves composed through contig, hvector, hindexed,
//! block-hindexed, struct, resized, and subarray nodes. This crate owns the
//! tree itself: node construction with shared children, the derived
//! metrics of every node, the 32-bit handle table, and the walker that
//! turns any byte interval of the logical packed stream into contiguous
//! runs of the underlying buffer.
//!
//! Moving actual bytes (host copies, device kernels, staging) lives in the
//! backend and engine crates layered on top.

pub mod builtin;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod node;
pub mod walker;

pub use builtin::Builtin;
pub use error::LayoutError;
pub use handle::{HandleTable, TypeHandle, PREDEFINED_LAST};
pub use metrics::{Metrics, Order};
pub use node::{BackendState, TypeFactory, TypeHooks, TypeKind, TypeNode};
pub use walker::{collect_runs, for_each_run, Run};

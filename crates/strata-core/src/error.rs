//! Layout construction and handle errors.

use thiserror::Error;

/// Errors produced while constructing or inspecting a datatype tree.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// The handle does not name a live type.
    #[error("invalid type handle: {0}")]
    InvalidHandle(u32),

    #[error("predefined type handle {0} cannot be freed")]
    FreePredefined(u32),

    #[error("block lengths ({blocklens}) and displacements ({displs}) differ in length")]
    MismatchedBlocks { blocklens: usize, displs: usize },

    #[error(
        "struct arguments differ in length: {blocklens} block lengths, \
         {displs} displacements, {children} child types"
    )]
    MismatchedFields {
        blocklens: usize,
        displs: usize,
        children: usize,
    },

    #[error(
        "subarray arguments differ in length: {sizes} sizes, \
         {subsizes} subsizes, {starts} starts"
    )]
    MismatchedDims {
        sizes: usize,
        subsizes: usize,
        starts: usize,
    },

    #[error(
        "subarray dimension {dim} out of bounds: \
         start {start} + subsize {subsize} exceeds size {size}"
    )]
    SubarrayBounds {
        dim: usize,
        size: usize,
        subsize: usize,
        start: usize,
    },

    /// A backend refused to attach per-type state to a fresh node.
    #[error("backend create hook failed: {message}")]
    CreateHook { message: String },

    #[error("no free slots in the type handle table")]
    TableFull,
}

//! Engine-level errors.

use thiserror::Error;

use strata_backend::BackendError;
use strata_core::LayoutError;

/// Errors returned by the public Strata operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("library not initialized")]
    NotInitialized,

    #[error("library already initialized")]
    AlreadyInitialized,

    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// A request that already reported failure was probed again.
    #[error("request failed")]
    RequestFailed,

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

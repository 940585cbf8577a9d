//! Backend errors.

use thiserror::Error;

/// Errors surfaced by device backends and the backend registry.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("{backend} backend does not support {op}")]
    NotSupported {
        backend: &'static str,
        op: &'static str,
    },

    #[error("{backend} backend failure: {message}")]
    Device {
        backend: &'static str,
        message: String,
    },

    #[error("no registered backend owns device {0}")]
    UnknownDevice(u32),
}

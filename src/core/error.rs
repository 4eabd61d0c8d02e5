//! Error types for proxy decomposition and geometry construction

use thiserror::Error;

use crate::geometry::device::DeviceError;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    /// Wrong operation for a proxy's variant or state. Never retried.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Geometry cache build failed: {0}")]
    CacheBuild(#[from] DeviceError),

    #[error("Inconsistent scene data: {0}")]
    InconsistentScene(String),

    #[error("Mesh error: {0}")]
    Mesh(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

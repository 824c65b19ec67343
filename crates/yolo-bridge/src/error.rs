//! Error types for the detection interop layer

use thiserror::Error;

/// Result type for interop operations
pub type Result<T> = std::result::Result<T, InteropError>;

/// Errors surfaced to callers of the interop layer.
///
/// An empty detection list is never an error; it means "no objects found".
#[derive(Debug, Error)]
pub enum InteropError {
    /// Engine configuration rejected before any native call
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// The native engine refused to construct (bad path, corrupt artifact, ...)
    #[error("failed to create native engine from {0}")]
    EngineCreate(String),

    /// The engine handle was used after `dispose`
    #[error("engine has been disposed")]
    EngineDisposed,

    /// Host image geometry does not match its buffer
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// The native side returned no matrix for the given pixels
    #[error("failed to create native matrix ({width}x{height}, {channels} channels)")]
    MatrixCreate {
        width: u32,
        height: u32,
        channels: u32,
    },

    /// A prediction call returned no result handle
    #[error("inference failed: {0}")]
    Inference(String),

    /// A batched result collection held a null entry
    #[error("batched result set {index} is missing")]
    MissingResultSet { index: usize },

    /// The engine returned a different number of result sets than images submitted
    #[error("batch size mismatch: submitted {expected} images, engine returned {actual} result sets")]
    BatchSizeMismatch { expected: usize, actual: usize },

    /// A string handed back by the native side could not be copied
    #[error("native string error: {0}")]
    NativeString(&'static str),

    /// IO error (model files, streams)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image file could not be decoded
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON configuration error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

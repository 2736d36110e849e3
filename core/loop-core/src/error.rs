//! Error types for loop-core operations.

use std::path::PathBuf;

/// All errors that can occur in loop-core operations.
///
/// Poll-loop and sweep failures are isolated per item and only logged; this
/// type surfaces from the explicit operations (publish, submit, config load).
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Request Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid request id: {0:?}")]
    InvalidRequestId(String),

    #[error("Invalid image data: {0}")]
    InvalidImageData(String),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl LoopError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LoopError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        LoopError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using LoopError.
pub type Result<T> = std::result::Result<T, LoopError>;

// Conversion for string error compatibility
impl From<LoopError> for String {
    fn from(err: LoopError) -> String {
        err.to_string()
    }
}

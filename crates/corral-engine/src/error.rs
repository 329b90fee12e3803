//! Error types for engine operations.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur when talking to the container engine.
///
/// Only [`EngineError::NotFound`] and [`EngineError::Conflict`] are tested
/// by callers; everything else is opaque and retried on the next tick.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The named resource does not exist on the engine.
    #[error("not found: {0}")]
    NotFound(String),

    /// A resource with the same name already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The engine accepted an exec-create request but returned a blank id.
    #[error("engine returned an empty exec id")]
    EmptyExecId,

    /// The engine answered with an unexpected status code.
    #[error("engine error (status {status}): {message}")]
    Api {
        /// HTTP status returned by the engine.
        status: u16,
        /// Message taken from the engine's error body.
        message: String,
    },

    /// Transport-level failure: socket, handshake or payload decoding.
    #[error("engine transport error: {0}")]
    Transport(String),
}

impl EngineError {
    /// Returns true if this is the not-found sentinel.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is a name-conflict error.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

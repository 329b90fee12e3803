//! Error types for the supervisor core.

use thiserror::Error;

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Errors that terminate or fail supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The declaration file could not be read or parsed.
    #[error("cannot read declaration: {0}")]
    Config(#[from] figment::Error),

    /// An engine call failed.
    #[error(transparent)]
    Engine(#[from] corral_engine::EngineError),

    /// The health endpoint could not be served.
    #[error("cannot serve http: {0}")]
    Http(String),

    /// A signal handler could not be installed.
    #[error("cannot install signal handler: {0}")]
    Signal(String),
}

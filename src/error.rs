//! # Structured Error Handling
//!
//! Crate-wide error taxonomy. Configuration and contract violations surface
//! synchronously to callers; transient infrastructure failures never do — they
//! are recorded via `infra::InfraStatus`/`infra::OutageDeduper` and callers
//! degrade to local-only behavior.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ColonyError {
    /// Bad or missing configuration detected at startup or registration time.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Enqueue of a job name that was never registered. Programmer error,
    /// surfaced synchronously to the caller.
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    /// A job definition failed validation at registration time.
    #[error("Invalid job definition for '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },

    /// Event bus failure that cannot be absorbed (e.g. payload serialization).
    #[error("Event error: {0}")]
    EventError(String),

    /// Remote store operation failure. Internal to connectors and store
    /// implementations; publish/enqueue paths absorb these and degrade.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Job middleware/execute failure, reported per job by the pump loop.
    #[error("Job execution error: {0}")]
    ExecutionError(String),
}

pub type Result<T> = std::result::Result<T, ColonyError>;

impl From<serde_json::Error> for ColonyError {
    fn from(e: serde_json::Error) -> Self {
        ColonyError::EventError(format!("serialization failed: {e}"))
    }
}

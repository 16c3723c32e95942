//! Domain errors for the stage-run engine.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the engine.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No run with this id
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    /// No card with this id
    #[error("Card not found: {0}")]
    CardNotFound(Uuid),

    /// A status change the state machine does not allow
    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    /// The retry would exceed the configured attempt limit
    #[error("Run cannot be retried: attempt {attempt} has reached the limit of {max_attempts}")]
    MaxAttemptsExceeded { attempt: u32, max_attempts: u32 },

    /// The run already has a terminal retry; only the newest attempt can be retried
    #[error("Run {run_id} was already retried as {retry_id}; retry that run instead")]
    AlreadyRetried { run_id: Uuid, retry_id: Uuid },

    /// A stage program needs a document that does not exist yet
    #[error("Missing prerequisite for {stage}: no '{document_type}' document exists")]
    MissingPrerequisite { stage: String, document_type: String },

    /// The stage has no automation (inbox, build, release)
    #[error("No automation is defined for stage {0}")]
    NoAutomation(String),

    /// Transient provider outage (rate limited, overloaded, unreachable)
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Execution could not be carried out
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Input failed validation
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Persistence layer error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DomainError {
    /// Transient errors are worth retrying at the call site; everything else
    /// should surface as a failed run.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }
}

/// Result alias used throughout the domain and services
pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

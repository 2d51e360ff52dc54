//! Domain error model.

use thiserror::Error;

use crate::id::JobId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// These are caller mistakes reported back unchanged; none of them mutates
/// queue state. Storage failures belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A submitted job payload could not be understood.
    #[error("malformed job: {0}")]
    MalformedJob(String),

    /// The configuration schema has no such key.
    #[error("unknown config key: {key} (available: {available})")]
    UnknownConfigKey { key: String, available: String },

    /// A configuration value failed coercion or range validation.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidConfigValue {
        key: String,
        value: String,
        reason: String,
    },

    /// A listing was requested for a state that does not exist.
    #[error("unknown state: {0} (expected pending, processed or failed)")]
    UnknownListState(String),

    /// No job with this id exists where it was looked up.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// A job with this id is already tracked by the queue.
    #[error("job already exists: {0}")]
    DuplicateJob(JobId),
}

impl DomainError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedJob(msg.into())
    }

    pub fn invalid_value(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidConfigValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

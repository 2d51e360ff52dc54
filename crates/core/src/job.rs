//! Job records and the states that hold them.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Key under which the queue keeps its own per-job bookkeeping.
///
/// Callers may not submit it; every other field they send is theirs.
pub const TRACKING_KEY: &str = "_queue";

/// A unit of work.
///
/// Fields the queue does not know about are kept in `metadata` and written
/// back verbatim on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Command line handed to the executor.
    pub command: String,
    /// Failed attempts so far.
    #[serde(default)]
    pub retries: u32,
    #[serde(rename = "_queue", default, skip_serializing_if = "Tracking::is_empty")]
    pub tracking: Tracking,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// Queue-owned job bookkeeping, stored apart from caller fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tracking {
    /// Failure message of the most recent attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl Tracking {
    pub fn is_empty(&self) -> bool {
        self.last_error.is_none() && self.enqueued_at.is_none()
    }
}

impl Job {
    pub fn new(id: impl Into<JobId>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            retries: 0,
            tracking: Tracking::default(),
            metadata: Map::new(),
        }
    }

    /// Parse a caller-submitted job.
    ///
    /// The payload must be a JSON object with a string `command`. A missing
    /// `id` is generated and a missing `retries` defaults to zero. The
    /// bookkeeping key is rejected so caller data never passes for it.
    pub fn parse(input: &str) -> DomainResult<Self> {
        let value: Value = serde_json::from_str(input)
            .map_err(|e| DomainError::malformed(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> DomainResult<Self> {
        let Value::Object(mut fields) = value else {
            return Err(DomainError::malformed("job must be a JSON object"));
        };

        if fields.contains_key(TRACKING_KEY) {
            return Err(DomainError::malformed(format!(
                "field `{TRACKING_KEY}` is reserved for the queue"
            )));
        }
        if !fields.contains_key("id") {
            fields.insert("id".into(), Value::String(JobId::generate().to_string()));
        }

        let job: Job = serde_json::from_value(Value::Object(fields))
            .map_err(|e| DomainError::malformed(e.to_string()))?;

        if job.id.as_str().trim().is_empty() {
            return Err(DomainError::malformed("job id must not be empty"));
        }
        if job.command.trim().is_empty() {
            return Err(DomainError::malformed("job command must not be empty"));
        }

        Ok(job)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn last_error(&self) -> Option<&str> {
        self.tracking.last_error.as_deref()
    }

    pub fn enqueued_at(&self) -> Option<DateTime<Utc>> {
        self.tracking.enqueued_at
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.retries = self.retries.saturating_add(1);
        self.tracking.last_error = Some(error.into());
    }

    /// Reset the attempt history so the job behaves like a fresh submission.
    pub fn reset_retries(&mut self) {
        self.retries = 0;
        self.tracking.last_error = None;
    }
}

/// The durable collections a job can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be picked up
    Pending,
    /// Completed successfully (terminal)
    Processed,
    /// Exhausted retries, dead-lettered until retried by hand
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 3] = [JobState::Pending, JobState::Processed, JobState::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processed => "processed",
            JobState::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "processed" => Ok(JobState::Processed),
            "failed" => Ok(JobState::Failed),
            _ => Err(DomainError::UnknownListState(s.to_string())),
        }
    }
}

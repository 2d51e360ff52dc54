//! `queuectl-core`: domain types for the job queue.
//!
//! This crate contains **pure domain** primitives (no I/O): jobs, their
//! lifecycle states, tunable configuration and the retry policy derived
//! from it.

pub mod config;
pub mod error;
pub mod id;
pub mod job;

pub use config::{Config, ConfigKey, RetryPolicy};
pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{Job, JobState, TRACKING_KEY, Tracking};

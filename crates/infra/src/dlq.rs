//! Dead-letter queue management.

use std::sync::Arc;

use tracing::info;

use queuectl_core::{DomainError, Job, JobId, JobState};

use crate::error::QueueResult;
use crate::store::JobStore;

/// Inspects the failed collection and moves jobs out of it.
#[derive(Debug)]
pub struct DeadLetterQueue<S> {
    store: Arc<S>,
}

impl<S> Clone for DeadLetterQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: JobStore> DeadLetterQueue<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Dead-lettered jobs, oldest first.
    pub fn list(&self) -> Vec<Job> {
        self.store.load_or_empty(JobState::Failed)
    }

    /// Move a failed job back to the tail of pending with a clean retry count.
    ///
    /// Both collections are locked for the whole move; on `JobNotFound`
    /// neither is touched.
    pub fn retry(&self, id: &JobId) -> QueueResult<Job> {
        let moved = self
            .store
            .modify_pair(JobState::Failed, JobState::Pending, |failed, pending| -> Option<Job> {
                let pos = failed.iter().position(|j| &j.id == id)?;
                let mut job = failed.remove(pos);
                job.reset_retries();
                pending.push(job.clone());
                Some(job)
            })?;

        let job = moved.ok_or_else(|| DomainError::JobNotFound(id.clone()))?;
        info!(job_id = %job.id, "dead-lettered job moved back to pending");
        Ok(job)
    }

    /// Permanently delete a failed job.
    pub fn discard(&self, id: &JobId) -> QueueResult<Job> {
        let removed = self.store.modify(JobState::Failed, |failed| -> Option<Job> {
            let pos = failed.iter().position(|j| &j.id == id)?;
            Some(failed.remove(pos))
        })?;

        let job = removed.ok_or_else(|| DomainError::JobNotFound(id.clone()))?;
        info!(job_id = %job.id, "dead-lettered job discarded");
        Ok(job)
    }
}

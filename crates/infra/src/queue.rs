//! The queue as seen by its command surface.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use queuectl_core::{DomainError, Job, JobState};

use crate::config_store::ConfigStore;
use crate::dlq::DeadLetterQueue;
use crate::error::QueueResult;
use crate::pool::{PoolActivity, PoolOptions, WorkerPool};
use crate::signal::ShutdownSignal;
use crate::store::{FileJobStore, JobStore};

/// File a running pool keeps in the data directory.
const ACTIVITY_MARKER: &str = "workers.json";

/// Whether a pool is serving this data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Running,
    /// Running, but a stop was requested
    Stopping,
    Stopped,
}

impl core::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            WorkerState::Running => "Running",
            WorkerState::Stopping => "Stopping",
            WorkerState::Stopped => "Stopped",
        })
    }
}

/// Read-only summary of the queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub processed: usize,
    pub failed: usize,
    pub workers: WorkerState,
    pub activity: Option<PoolActivity>,
    pub pending_jobs: Vec<Job>,
}

/// Store, config, dead-letter queue and shutdown signal of one data directory.
#[derive(Debug)]
pub struct Queue<S = FileJobStore> {
    dir: PathBuf,
    store: Arc<S>,
    config: Arc<ConfigStore>,
    signal: ShutdownSignal,
}

impl Queue<FileJobStore> {
    /// Open the file-backed queue in `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> QueueResult<Self> {
        let dir = dir.into();
        let store = Arc::new(FileJobStore::open(&dir)?);
        Self::with_store(dir, store)
    }
}

impl<S: JobStore + 'static> Queue<S> {
    /// Queue over any store; config and signal still live in `dir`.
    pub fn with_store(dir: impl Into<PathBuf>, store: Arc<S>) -> QueueResult<Self> {
        let dir = dir.into();
        Ok(Self {
            config: Arc::new(ConfigStore::open(&dir)?),
            signal: ShutdownSignal::at(&dir),
            store,
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }

    pub fn dlq(&self) -> DeadLetterQueue<S> {
        DeadLetterQueue::new(self.store.clone())
    }

    pub fn pool(&self, options: PoolOptions) -> WorkerPool<S> {
        WorkerPool::new(
            self.store.clone(),
            self.config.clone(),
            self.signal.clone(),
            options,
        )
        .with_activity_marker(self.activity_path())
    }

    /// Parse a JSON job and append it to pending.
    pub fn enqueue(&self, input: &str) -> QueueResult<Job> {
        self.enqueue_job(Job::parse(input)?)
    }

    /// Append a job to pending.
    ///
    /// Ids already known to the queue are rejected; pending is unchanged.
    pub fn enqueue_job(&self, mut job: Job) -> QueueResult<Job> {
        job.tracking.enqueued_at.get_or_insert_with(Utc::now);

        for state in [JobState::Processed, JobState::Failed] {
            if self.store.load_or_empty(state).iter().any(|j| j.id == job.id) {
                return Err(DomainError::DuplicateJob(job.id).into());
            }
        }

        self.store.modify(JobState::Pending, |pending| {
            if pending.iter().any(|j| j.id == job.id) {
                return Err(DomainError::DuplicateJob(job.id.clone()));
            }
            pending.push(job.clone());
            Ok(())
        })??;

        info!(job_id = %job.id, command = %job.command, "job enqueued");
        Ok(job)
    }

    /// Jobs in the named state (`pending`, `processed` or `failed`).
    pub fn list(&self, state: &str) -> QueueResult<Vec<Job>> {
        let state: JobState = state.parse()?;
        Ok(self.store.load_or_empty(state))
    }

    pub fn status(&self) -> QueueStatus {
        let pending_jobs = self.store.load_or_empty(JobState::Pending);
        let activity = PoolActivity::read(&self.activity_path());
        let workers = match (&activity, self.signal.is_requested()) {
            (None, _) => WorkerState::Stopped,
            (Some(_), false) => WorkerState::Running,
            (Some(_), true) => WorkerState::Stopping,
        };

        QueueStatus {
            pending: pending_jobs.len(),
            processed: self.store.load_or_empty(JobState::Processed).len(),
            failed: self.store.load_or_empty(JobState::Failed).len(),
            workers,
            activity,
            pending_jobs,
        }
    }

    /// Signal every pool on this data directory to stop.
    pub fn stop_workers(&self) -> QueueResult<()> {
        self.signal.request()?;
        info!(dir = %self.dir.display(), "stop signal sent");
        Ok(())
    }

    fn activity_path(&self) -> PathBuf {
        self.dir.join(ACTIVITY_MARKER)
    }
}

//! Worker pool controller.
//!
//! Spawns N workers sharing one [`WorkerContext`], waits for a stop request
//! (sentinel file or in-process interrupt) and joins every worker before
//! returning.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use queuectl_core::Config;

use crate::config_store::ConfigStore;
use crate::error::{QueueError, QueueResult};
use crate::executor::{CommandExecutor, ExecutorMode, JobExecutor};
use crate::lock::LockFile;
use crate::signal::ShutdownSignal;
use crate::store::JobStore;
use crate::store::file::{read_json, write_json_atomic};
use crate::worker::{Worker, WorkerContext, WorkerReport};

/// Runtime knobs that are not part of the persisted configuration.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// How often idle workers and the controller poll
    pub poll_interval: Duration,
    /// One backoff time unit (`backoff_base ^ retries` of these)
    pub backoff_unit: Duration,
    /// Maximum backoff delay cap
    pub max_backoff: Duration,
    pub executor: ExecutorMode,
    /// Per-job run time of the simulated executor
    pub simulated_delay: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            backoff_unit: Duration::from_secs(1),
            max_backoff: Duration::from_secs(3600),
            executor: ExecutorMode::Shell,
            simulated_delay: Duration::from_secs(1),
        }
    }
}

/// Aggregated result of a pool run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolReport {
    pub workers: usize,
    pub totals: WorkerReport,
}

/// Contents of the activity marker a running pool keeps in the data dir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolActivity {
    pub pid: u32,
    pub workers: usize,
    pub started_at: DateTime<Utc>,
}

impl PoolActivity {
    /// Read a marker; `None` when absent or unreadable.
    pub fn read(path: &Path) -> Option<Self> {
        read_json(path).ok().flatten()
    }
}

/// Holds the pool lock and removes the activity marker when the pool exits.
///
/// The lock makes a second pool on the same data directory fail fast instead
/// of sharing the marker and stop sentinel with the first.
#[derive(Debug)]
struct ActivityGuard {
    path: PathBuf,
    _lock: LockFile,
}

impl ActivityGuard {
    /// Claim the data directory for this pool.
    fn claim(path: PathBuf) -> QueueResult<Self> {
        match LockFile::try_acquire(path.with_extension("json.lock"))? {
            Some(lock) => Ok(Self { path, _lock: lock }),
            None => {
                let pid = PoolActivity::read(&path).map(|a| a.pid);
                Err(QueueError::AlreadyRunning { pid })
            }
        }
    }

    fn publish(&self, workers: usize) -> QueueResult<()> {
        let activity = PoolActivity {
            pid: std::process::id(),
            workers,
            started_at: Utc::now(),
        };
        write_json_atomic(&self.path, &activity)?;
        Ok(())
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to remove activity marker");
            }
        }
    }
}

/// Handle to running workers.
#[derive(Debug)]
pub struct PoolHandle {
    signal: ShutdownSignal,
    joins: Vec<JoinHandle<WorkerReport>>,
}

impl PoolHandle {
    pub fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Whether every worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.joins.iter().all(JoinHandle::is_finished)
    }

    /// Request graceful shutdown and wait for every worker to stop.
    pub fn shutdown(self) -> PoolReport {
        self.signal.interrupt();
        self.join()
    }

    /// Wait for every worker to stop on its own.
    pub fn join(self) -> PoolReport {
        let mut report = PoolReport {
            workers: self.joins.len(),
            ..PoolReport::default()
        };
        for join in self.joins {
            let name = join.thread().name().unwrap_or("worker").to_string();
            match join.join() {
                Ok(worker) => report.totals.merge(&worker),
                Err(_) => error!(worker = %name, "worker thread panicked"),
            }
        }
        report
    }
}

/// Starts and supervises workers over one store.
#[derive(Debug)]
pub struct WorkerPool<S> {
    store: Arc<S>,
    config: Arc<ConfigStore>,
    signal: ShutdownSignal,
    options: PoolOptions,
    activity: Option<PathBuf>,
}

impl<S: JobStore + 'static> WorkerPool<S> {
    pub fn new(
        store: Arc<S>,
        config: Arc<ConfigStore>,
        signal: ShutdownSignal,
        options: PoolOptions,
    ) -> Self {
        Self {
            store,
            config,
            signal,
            options,
            activity: None,
        }
    }

    /// Keep an activity marker at `path` while the pool runs.
    pub fn with_activity_marker(mut self, path: impl Into<PathBuf>) -> Self {
        self.activity = Some(path.into());
        self
    }

    pub fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }

    /// Ask running workers to stop; returns without waiting.
    pub fn stop(&self) -> QueueResult<()> {
        self.signal.request()?;
        info!("stop signal sent");
        Ok(())
    }

    /// Run `count` workers with the configured executor until stopped.
    ///
    /// Blocks until every worker has exited. Fails with
    /// [`QueueError::AlreadyRunning`] while another pool holds the marker.
    pub fn start(&self, count: usize) -> QueueResult<PoolReport> {
        let config = self.config.load()?;
        let executor =
            CommandExecutor::new(self.options.executor, &config, self.options.simulated_delay);
        self.run(count, &config, executor)
    }

    /// Like [`WorkerPool::start`] with an explicit config and executor.
    pub fn run<E>(&self, count: usize, config: &Config, executor: E) -> QueueResult<PoolReport>
    where
        E: JobExecutor + 'static,
    {
        if count == 0 {
            return Err(QueueError::NoWorkers);
        }
        let activity = match &self.activity {
            Some(path) => Some(ActivityGuard::claim(path.clone())?),
            None => None,
        };
        // A stop that arrives once the marker is visible must not be lost.
        self.signal.clear()?;
        if let Some(activity) = &activity {
            activity.publish(count)?;
        }

        let handle = self.spawn(count, config, executor)?;
        info!(workers = count, "workers started");

        while !self.signal.wait_timeout(self.options.poll_interval) {}
        info!("shutdown requested, waiting for workers to finish");

        let report = handle.shutdown();
        self.signal.clear()?;
        drop(activity);

        info!(
            workers = report.workers,
            completed = report.totals.completed,
            requeued = report.totals.requeued,
            dead_lettered = report.totals.dead_lettered,
            "all workers stopped"
        );
        Ok(report)
    }

    /// Spawn `count` workers and return immediately.
    pub fn spawn<E>(&self, count: usize, config: &Config, executor: E) -> QueueResult<PoolHandle>
    where
        E: JobExecutor + 'static,
    {
        if count == 0 {
            return Err(QueueError::NoWorkers);
        }
        let ctx = Arc::new(WorkerContext {
            store: self.store.clone(),
            executor,
            signal: self.signal.clone(),
            policy: config.retry_policy(self.options.backoff_unit, self.options.max_backoff),
            poll_interval: self.options.poll_interval,
        });

        let mut handle = PoolHandle {
            signal: self.signal.clone(),
            joins: Vec::with_capacity(count),
        };
        for id in 1..=count {
            let worker = Worker::new(id, ctx.clone());
            let spawned = thread::Builder::new()
                .name(worker.name().to_string())
                .spawn(move || worker.run());
            match spawned {
                Ok(join) => handle.joins.push(join),
                Err(err) => {
                    error!(error = %err, "failed to spawn worker thread");
                    handle.shutdown();
                    return Err(QueueError::Spawn(err));
                }
            }
        }
        Ok(handle)
    }
}

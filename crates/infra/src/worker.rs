//! The worker loop.
//!
//! Each worker repeatedly pulls the head of the pending collection, runs it
//! and routes the outcome: success to processed, failure back to pending
//! after a backoff, or to failed once retries are exhausted. Locks are only
//! held for the dequeue and for each append, never while a job runs or a
//! worker sleeps.
//!
//! A dequeued job is owned by no collection until it is routed; a crash in
//! that window loses it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use queuectl_core::{Job, JobState, RetryPolicy};

use crate::executor::{JobExecutor, JobResult};
use crate::signal::ShutdownSignal;
use crate::store::JobStore;

/// Attempts at persisting a routed job before it is given up as lost.
const ROUTE_ATTEMPTS: u32 = 3;

/// Everything a worker needs, handed over at spawn time.
#[derive(Debug)]
pub struct WorkerContext<S, E> {
    pub store: S,
    pub executor: E,
    pub signal: ShutdownSignal,
    pub policy: RetryPolicy,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
}

/// What one iteration of the loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Shutdown observed; the loop ends
    Stopped,
    /// Nothing to do (or the queue was unreadable)
    Idle,
    /// Job succeeded and was recorded as processed
    Completed,
    /// Job failed and went back to pending
    Requeued,
    /// Job exhausted its retries and went to failed
    DeadLettered,
    /// Job finished but could not be persisted anywhere
    Lost,
}

/// Per-worker counters returned when the loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub completed: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub lost: u64,
}

impl WorkerReport {
    fn record(&mut self, step: Step) {
        match step {
            Step::Completed => self.completed += 1,
            Step::Requeued => self.requeued += 1,
            Step::DeadLettered => self.dead_lettered += 1,
            Step::Lost => self.lost += 1,
            Step::Stopped | Step::Idle => {}
        }
    }

    pub fn merge(&mut self, other: &WorkerReport) {
        self.completed += other.completed;
        self.requeued += other.requeued;
        self.dead_lettered += other.dead_lettered;
        self.lost += other.lost;
    }
}

/// A single queue consumer.
#[derive(Debug)]
pub struct Worker<S, E> {
    name: String,
    ctx: Arc<WorkerContext<S, E>>,
}

impl<S: JobStore, E: JobExecutor> Worker<S, E> {
    pub fn new(id: usize, ctx: Arc<WorkerContext<S, E>>) -> Self {
        Self {
            name: format!("worker-{id}"),
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Loop until shutdown is observed.
    pub fn run(&self) -> WorkerReport {
        info!(worker = %self.name, "worker started");
        let mut report = WorkerReport::default();
        loop {
            match self.step() {
                Step::Stopped => break,
                step => report.record(step),
            }
        }
        info!(worker = %self.name, ?report, "worker stopped");
        report
    }

    /// Run one iteration of the worker protocol.
    pub fn step(&self) -> Step {
        let ctx = &*self.ctx;
        if ctx.signal.is_set() {
            return Step::Stopped;
        }

        let job = match ctx.store.pop_front(JobState::Pending) {
            Ok(Some(job)) => job,
            Ok(None) => return self.idle(),
            Err(err) => {
                error!(worker = %self.name, error = %err, "failed to dequeue job");
                return self.idle();
            }
        };

        info!(
            worker = %self.name,
            job_id = %job.id,
            command = %job.command,
            attempt = job.retries + 1,
            "executing job"
        );

        match self.execute(&job) {
            JobResult::Success => {
                info!(worker = %self.name, job_id = %job.id, "job completed");
                self.route(JobState::Processed, job, Step::Completed)
            }
            JobResult::Failure(reason) => self.fail(job, reason),
        }
    }

    fn idle(&self) -> Step {
        if self.ctx.signal.wait_timeout(self.ctx.poll_interval) {
            Step::Stopped
        } else {
            Step::Idle
        }
    }

    fn execute(&self, job: &Job) -> JobResult {
        panic::catch_unwind(AssertUnwindSafe(|| self.ctx.executor.execute(job)))
            .unwrap_or_else(|_| JobResult::Failure("executor panicked".to_string()))
    }

    fn fail(&self, mut job: Job, reason: String) -> Step {
        let policy = &self.ctx.policy;
        job.record_failure(reason);

        if !policy.should_retry(job.retries) {
            warn!(
                worker = %self.name,
                job_id = %job.id,
                retries = job.retries,
                error = job.last_error().unwrap_or_default(),
                "job moved to dead-letter queue"
            );
            return self.route(JobState::Failed, job, Step::DeadLettered);
        }

        let delay = policy.delay_for_retry(job.retries);
        warn!(
            worker = %self.name,
            job_id = %job.id,
            retries = job.retries,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            "job failed, retrying after backoff"
        );
        if self.ctx.signal.wait_timeout(delay) {
            debug!(worker = %self.name, job_id = %job.id, "backoff cut short by shutdown");
        }
        self.route(JobState::Pending, job, Step::Requeued)
    }

    /// Append a finished job to `collection`, retrying transient store errors.
    fn route(&self, collection: JobState, job: Job, step: Step) -> Step {
        let mut attempt = 1;
        loop {
            match self.ctx.store.push_back(collection, job.clone()) {
                Ok(()) => return step,
                Err(err) if err.is_retryable() && attempt < ROUTE_ATTEMPTS => {
                    warn!(
                        worker = %self.name,
                        job_id = %job.id,
                        collection = %collection,
                        error = %err,
                        attempt,
                        "failed to persist job, retrying"
                    );
                    attempt += 1;
                    std::thread::sleep(self.ctx.poll_interval);
                }
                Err(err) => {
                    let record = serde_json::to_string(&job).unwrap_or_default();
                    error!(
                        worker = %self.name,
                        job_id = %job.id,
                        collection = %collection,
                        error = %err,
                        job = %record,
                        "job lost: could not persist"
                    );
                    return Step::Lost;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryJobStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_base: 2.0,
            unit: Duration::from_millis(1),
            max_delay: Duration::from_millis(20),
        }
    }

    fn worker<E: JobExecutor>(
        store: Arc<InMemoryJobStore>,
        executor: E,
        max_retries: u32,
    ) -> Worker<Arc<InMemoryJobStore>, E> {
        let ctx = WorkerContext {
            store,
            executor,
            signal: ShutdownSignal::in_memory(),
            policy: policy(max_retries),
            poll_interval: Duration::from_millis(5),
        };
        Worker::new(1, Arc::new(ctx))
    }

    fn succeed(_: &Job) -> JobResult {
        JobResult::Success
    }

    fn fail(_: &Job) -> JobResult {
        JobResult::Failure("boom".to_string())
    }

    #[test]
    fn empty_queue_is_idle() {
        let store = InMemoryJobStore::arc();
        assert_eq!(worker(store, succeed, 3).step(), Step::Idle);
    }

    #[test]
    fn success_moves_job_unmodified_to_processed() {
        let job = Job::new("a", "true").with_metadata("owner", serde_json::json!("ops"));
        let store = Arc::new(
            InMemoryJobStore::new().with_jobs(JobState::Pending, vec![job.clone()]),
        );

        assert_eq!(worker(store.clone(), succeed, 3).step(), Step::Completed);
        assert!(store.load(JobState::Pending).unwrap().is_empty());
        assert_eq!(store.load(JobState::Processed).unwrap(), vec![job]);
    }

    #[test]
    fn failure_requeues_at_tail_with_incremented_retries() {
        let store = Arc::new(InMemoryJobStore::new().with_jobs(
            JobState::Pending,
            vec![Job::new("a", "false"), Job::new("b", "true")],
        ));

        assert_eq!(worker(store.clone(), fail, 3).step(), Step::Requeued);

        let pending = store.load(JobState::Pending).unwrap();
        let ids: Vec<_> = pending.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(pending[1].retries, 1);
        assert_eq!(pending[1].last_error(), Some("boom"));
    }

    #[test]
    fn exhausted_job_is_dead_lettered() {
        let mut job = Job::new("a", "false");
        job.retries = 2;
        let store = Arc::new(InMemoryJobStore::new().with_jobs(JobState::Pending, vec![job]));

        assert_eq!(worker(store.clone(), fail, 3).step(), Step::DeadLettered);

        let failed = store.load(JobState::Failed).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retries, 3);
    }

    #[test]
    fn panicking_executor_counts_as_failure() {
        let store = Arc::new(
            InMemoryJobStore::new().with_jobs(JobState::Pending, vec![Job::new("a", "x")]),
        );
        let executor = |_: &Job| -> JobResult { panic!("executor bug") };

        assert_eq!(worker(store.clone(), executor, 1).step(), Step::DeadLettered);
        let failed = store.load(JobState::Failed).unwrap();
        assert_eq!(failed[0].last_error(), Some("executor panicked"));
    }

    #[test]
    fn run_exits_on_signal_and_reports_counts() {
        let store = Arc::new(InMemoryJobStore::new().with_jobs(
            JobState::Pending,
            vec![Job::new("a", "true"), Job::new("b", "true")],
        ));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let worker = worker(
            store,
            move |_: &Job| {
                counter.fetch_add(1, Ordering::SeqCst);
                JobResult::Success
            },
            3,
        );

        let signal = worker.ctx.signal.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            signal.interrupt();
        });

        let report = worker.run();
        stopper.join().unwrap();

        assert_eq!(report.completed, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stop_during_backoff_still_requeues() {
        let store = Arc::new(
            InMemoryJobStore::new().with_jobs(JobState::Pending, vec![Job::new("a", "false")]),
        );
        let ctx = WorkerContext {
            store: store.clone(),
            executor: fail,
            signal: ShutdownSignal::in_memory(),
            policy: RetryPolicy {
                max_retries: 5,
                backoff_base: 2.0,
                unit: Duration::from_secs(60),
                max_delay: Duration::from_secs(3600),
            },
            poll_interval: Duration::from_millis(5),
        };
        let worker = Worker::new(1, Arc::new(ctx));
        let signal = worker.ctx.signal.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            signal.interrupt();
        });

        assert_eq!(worker.step(), Step::Requeued);
        stopper.join().unwrap();
        assert_eq!(worker.step(), Step::Stopped);

        let pending = store.load(JobState::Pending).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retries, 1);
    }
}

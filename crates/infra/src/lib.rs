//! Infrastructure layer: durable store, locking, workers and the pool.
//!
//! ## Components
//!
//! - `JobStore`: ordered pending/processed/failed collections (file or in-memory)
//! - `Coordinator`: per-record mutual exclusion across threads and processes
//! - `ConfigStore`: persisted tunables
//! - `JobExecutor`: runs a job's command (shell or simulated)
//! - `Worker`: dequeue → execute → route, with retry/backoff/dead-lettering
//! - `WorkerPool`: spawns workers, waits for a stop request, joins them
//! - `DeadLetterQueue`: inspect and replay failed jobs
//! - `Queue`: the command-facing bundle of all of the above

pub mod config_store;
pub mod dlq;
pub mod error;
pub mod executor;
pub mod lock;
pub mod pool;
pub mod queue;
pub mod signal;
pub mod store;
pub mod worker;


pub use config_store::ConfigStore;
pub use dlq::DeadLetterQueue;
pub use error::{QueueError, QueueResult, StoreError};
pub use executor::{
    CommandExecutor, ExecutorMode, JobExecutor, JobResult, ShellExecutor, SimulatedExecutor,
};
pub use lock::{Coordinator, LockOptions, Resource};
pub use pool::{PoolActivity, PoolHandle, PoolOptions, PoolReport, WorkerPool};
pub use queue::{Queue, QueueStatus, WorkerState};
pub use signal::ShutdownSignal;
pub use store::{FileJobStore, InMemoryJobStore, JobStore};
pub use worker::{Step, Worker, WorkerContext, WorkerReport};

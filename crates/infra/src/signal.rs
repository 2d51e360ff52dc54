//! Cooperative shutdown signalling.
//!
//! The durable form is a sentinel file whose presence means "stop"; any
//! process can create it. Inside the pool's own process an interrupt flag
//! with a condition variable wakes sleeping workers immediately.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::StoreError;

const SENTINEL_NAME: &str = "stop.flag";

/// Longest stretch a waiter sleeps before re-checking the sentinel file.
const SENTINEL_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
struct Interrupt {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Shared stop condition for a pool and its workers.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sentinel: Option<PathBuf>,
    interrupt: Arc<Interrupt>,
}

impl ShutdownSignal {
    /// Signal backed by the sentinel file in `dir`.
    pub fn at(dir: impl AsRef<Path>) -> Self {
        Self {
            sentinel: Some(dir.as_ref().join(SENTINEL_NAME)),
            interrupt: Arc::default(),
        }
    }

    /// Process-local signal with no durable form.
    pub fn in_memory() -> Self {
        Self {
            sentinel: None,
            interrupt: Arc::default(),
        }
    }

    pub fn sentinel(&self) -> Option<&Path> {
        self.sentinel.as_deref()
    }

    /// Ask every pool using this data directory to stop.
    pub fn request(&self) -> Result<(), StoreError> {
        match &self.sentinel {
            Some(path) => fs::write(path, "stop").map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            }),
            None => {
                self.interrupt();
                Ok(())
            }
        }
    }

    /// Stop this process's workers and wake any that are sleeping.
    pub fn interrupt(&self) {
        let mut stopped = self
            .interrupt
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        self.interrupt.wake.notify_all();
    }

    /// Whether a stop was requested, locally or through the sentinel.
    pub fn is_set(&self) -> bool {
        self.is_interrupted() || self.is_requested()
    }

    /// Whether the sentinel file is present.
    pub fn is_requested(&self) -> bool {
        self.sentinel.as_deref().is_some_and(Path::exists)
    }

    fn is_interrupted(&self) -> bool {
        *self
            .interrupt
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `timeout`, returning early with `true` once stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return self.is_interrupted();
            }
            let slice = (deadline - now).min(SENTINEL_TICK);

            let stopped = self
                .interrupt
                .stopped
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let (stopped, _) = self
                .interrupt
                .wake
                .wait_timeout_while(stopped, slice, |stopped| !*stopped)
                .unwrap_or_else(PoisonError::into_inner);
            if *stopped {
                return true;
            }
        }
    }

    /// Remove the sentinel and reset the local flag.
    pub fn clear(&self) -> Result<(), StoreError> {
        *self
            .interrupt
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = false;

        if let Some(path) = &self.sentinel {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "cleared stop sentinel"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(StoreError::Write {
                        path: path.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}

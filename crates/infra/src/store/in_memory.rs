//! In-memory job store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use queuectl_core::{Job, JobState};

use super::JobStore;
use crate::error::StoreError;

/// Keeps every collection behind one mutex; each call is atomic.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    collections: Mutex<HashMap<JobState, Vec<Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seed a collection, replacing its contents.
    pub fn with_jobs(self, collection: JobState, jobs: Vec<Job>) -> Self {
        self.guard().insert(collection, jobs);
        self
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<JobState, Vec<Job>>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobStore for InMemoryJobStore {
    fn load(&self, collection: JobState) -> Result<Vec<Job>, StoreError> {
        Ok(self.guard().get(&collection).cloned().unwrap_or_default())
    }

    fn modify<T, F>(&self, collection: JobState, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Job>) -> T,
    {
        let mut collections = self.guard();
        Ok(f(collections.entry(collection).or_default()))
    }

    fn modify_pair<T, F>(&self, first: JobState, second: JobState, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Job>, &mut Vec<Job>) -> T,
    {
        assert_ne!(first, second, "modify_pair needs two distinct collections");
        let mut collections = self.guard();
        let mut a = collections.remove(&first).unwrap_or_default();
        let mut b = collections.remove(&second).unwrap_or_default();
        let out = f(&mut a, &mut b);
        collections.insert(first, a);
        collections.insert(second, b);
        Ok(out)
    }
}

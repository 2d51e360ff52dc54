//! Durable job collections.
//!
//! ## Design
//!
//! - One ordered collection per [`JobState`]
//! - `load` reports corruption instead of hiding it; callers pick the fallback
//! - Every read-modify-write runs inside the store's coordinator
//! - A finished `modify` fully replaces the prior contents

pub(crate) mod file;
mod in_memory;

pub use file::FileJobStore;
pub use in_memory::InMemoryJobStore;

use std::sync::Arc;

use queuectl_core::{Job, JobState};
use tracing::warn;

use crate::error::StoreError;

/// Job store abstraction.
pub trait JobStore: Send + Sync {
    /// Read a collection.
    ///
    /// An absent record is an empty collection; an undecodable one is
    /// [`StoreError::Corrupt`].
    fn load(&self, collection: JobState) -> Result<Vec<Job>, StoreError>;

    /// Run `f` over a collection under its lock and persist the result.
    ///
    /// A corrupt record is handed to `f` as empty. Nothing is written when
    /// `f` leaves the collection unchanged.
    fn modify<T, F>(&self, collection: JobState, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Job>) -> T;

    /// Like [`JobStore::modify`] over two distinct collections at once.
    fn modify_pair<T, F>(&self, first: JobState, second: JobState, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Job>, &mut Vec<Job>) -> T;

    /// Read a collection, treating any failure as empty.
    fn load_or_empty(&self, collection: JobState) -> Vec<Job> {
        match self.load(collection) {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(collection = %collection, error = %err, "unreadable collection, using empty");
                Vec::new()
            }
        }
    }

    /// Remove and return the head of a collection.
    fn pop_front(&self, collection: JobState) -> Result<Option<Job>, StoreError> {
        self.modify(collection, |jobs| {
            if jobs.is_empty() {
                None
            } else {
                Some(jobs.remove(0))
            }
        })
    }

    /// Append a job at the tail of a collection.
    fn push_back(&self, collection: JobState, job: Job) -> Result<(), StoreError> {
        self.modify(collection, |jobs| jobs.push(job))
    }
}

impl<S: JobStore> JobStore for Arc<S> {
    fn load(&self, collection: JobState) -> Result<Vec<Job>, StoreError> {
        (**self).load(collection)
    }

    fn modify<T, F>(&self, collection: JobState, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Job>) -> T,
    {
        (**self).modify(collection, f)
    }

    fn modify_pair<T, F>(&self, first: JobState, second: JobState, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Job>, &mut Vec<Job>) -> T,
    {
        (**self).modify_pair(first, second, f)
    }
}

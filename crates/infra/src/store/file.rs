//! JSON-file job store.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{trace, warn};

use queuectl_core::{Job, JobState};

use super::JobStore;
use crate::error::StoreError;
use crate::lock::{Coordinator, LockOptions, Resource};

/// Stores each collection as a pretty-printed JSON array in a data directory.
#[derive(Debug)]
pub struct FileJobStore {
    coordinator: Coordinator,
}

impl FileJobStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::with_lock_options(dir, LockOptions::default())
    }

    pub fn with_lock_options(
        dir: impl Into<PathBuf>,
        options: LockOptions,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            coordinator: Coordinator::with_options(ensure_dir(dir.into())?, options),
        })
    }

    pub fn dir(&self) -> &Path {
        self.coordinator.dir()
    }

    /// Path of the record backing `collection`.
    pub fn record_path(&self, collection: JobState) -> PathBuf {
        self.coordinator.record_path(collection.into())
    }

    fn load_lenient(&self, collection: JobState) -> Result<Vec<Job>, StoreError> {
        match self.load(collection) {
            Err(err @ StoreError::Corrupt { .. }) => {
                warn!(collection = %collection, error = %err, "corrupt collection treated as empty");
                Ok(Vec::new())
            }
            other => other,
        }
    }
}

impl JobStore for FileJobStore {
    fn load(&self, collection: JobState) -> Result<Vec<Job>, StoreError> {
        Ok(read_json(&self.record_path(collection))?.unwrap_or_default())
    }

    fn modify<T, F>(&self, collection: JobState, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Job>) -> T,
    {
        self.coordinator
            .critical_section(&[Resource::from(collection)], || -> Result<T, StoreError> {
                let mut jobs = self.load_lenient(collection)?;
                let before = jobs.clone();
                let out = f(&mut jobs);
                if jobs != before {
                    write_json_atomic(&self.record_path(collection), &jobs)?;
                }
                Ok(out)
            })?
    }

    /// # Panics
    ///
    /// Panics if `first == second`.
    fn modify_pair<T, F>(&self, first: JobState, second: JobState, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Job>, &mut Vec<Job>) -> T,
    {
        assert_ne!(first, second, "modify_pair needs two distinct collections");
        self.coordinator
            .critical_section(&[first.into(), second.into()], || -> Result<T, StoreError> {
                let mut a = self.load_lenient(first)?;
                let mut b = self.load_lenient(second)?;
                let (before_a, before_b) = (a.clone(), b.clone());
                let out = f(&mut a, &mut b);
                // Write the receiving side first so a crash in between
                // duplicates a job rather than losing it.
                if b != before_b {
                    write_json_atomic(&self.record_path(second), &b)?;
                }
                if a != before_a {
                    write_json_atomic(&self.record_path(first), &a)?;
                }
                Ok(out)
            })?
    }
}

/// Create `dir` and its parents if missing.
pub(crate) fn ensure_dir(dir: PathBuf) -> Result<PathBuf, StoreError> {
    fs::create_dir_all(&dir).map_err(|source| StoreError::Write {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}

/// Read a JSON record; `None` when the file does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Replace a JSON record via write-temp, fsync, rename.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    let write_err = |source: std::io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|e| write_err(e.into()))?;
    bytes.push(b'\n');

    let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
    let result = File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(&bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp, path));

    if let Err(err) = result {
        let _ = fs::remove_file(&tmp);
        return Err(write_err(err));
    }
    trace!(path = %path.display(), bytes = bytes.len(), "record written");
    Ok(())
}

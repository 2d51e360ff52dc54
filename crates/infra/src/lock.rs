//! Mutual exclusion over the on-disk records.
//!
//! Each record has its own lock: an in-process mutex (so threads of one
//! process queue up without spinning) plus an exclusive advisory lock on a
//! `<record>.lock` file (so separate processes exclude each other). Lock
//! files stay in place; the kernel drops a dead holder's lock, so there is
//! nothing stale to clean up. Callers never touch either directly; they hand
//! a closure to [`Coordinator::critical_section`].

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use queuectl_core::JobState;
use tracing::debug;

use crate::error::StoreError;

/// A lockable record. Locks are always taken in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Pending,
    Processed,
    Failed,
    Config,
}

impl Resource {
    /// File name of the record guarded by this resource.
    pub fn record_name(&self) -> &'static str {
        match self {
            Resource::Pending => "queue.json",
            Resource::Processed => "processed.json",
            Resource::Failed => "failed.json",
            Resource::Config => "config.json",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl From<JobState> for Resource {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Pending => Resource::Pending,
            JobState::Processed => Resource::Processed,
            JobState::Failed => Resource::Failed,
        }
    }
}

/// Lock acquisition tuning.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Give up after waiting this long
    pub timeout: Duration,
    /// Pause between attempts while another process holds the lock
    pub retry_every: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry_every: Duration::from_millis(5),
        }
    }
}

/// Serializes read-modify-write sequences on the records of one data directory.
#[derive(Debug)]
pub struct Coordinator {
    dir: PathBuf,
    options: LockOptions,
    local: [Mutex<()>; 4],
}

impl Coordinator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_options(dir, LockOptions::default())
    }

    pub fn with_options(dir: impl Into<PathBuf>, options: LockOptions) -> Self {
        Self {
            dir: dir.into(),
            options,
            local: Default::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record guarded by `resource`.
    pub fn record_path(&self, resource: Resource) -> PathBuf {
        self.dir.join(resource.record_name())
    }

    /// Run `f` while holding every lock in `resources`.
    ///
    /// Locks are released when `f` returns, including by unwinding.
    pub fn critical_section<T>(
        &self,
        resources: &[Resource],
        f: impl FnOnce() -> T,
    ) -> Result<T, StoreError> {
        let mut ordered = resources.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut held = Vec::with_capacity(ordered.len());
        for resource in ordered {
            let local = self.local[resource.index()]
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let file = LockFile::acquire(self.lock_path(resource), &self.options)?;
            held.push((file, local));
        }

        let out = f();
        drop(held);
        Ok(out)
    }

    fn lock_path(&self, resource: Resource) -> PathBuf {
        self.dir.join(format!("{}.lock", resource.record_name()))
    }
}

/// A held cross-process lock; closing the file releases it.
#[derive(Debug)]
pub(crate) struct LockFile {
    file: File,
}

impl LockFile {
    /// Wait until the lock at `path` is ours, up to `options.timeout`.
    pub(crate) fn acquire(path: PathBuf, options: &LockOptions) -> Result<Self, StoreError> {
        let file = open_lock_file(&path)?;
        let deadline = Instant::now() + options.timeout;
        loop {
            match try_lock_exclusive(&file) {
                Ok(true) => return Ok(Self::held(file)),
                Ok(false) if Instant::now() >= deadline => {
                    return Err(StoreError::LockTimeout { path });
                }
                Ok(false) => {
                    debug!(path = %path.display(), "lock busy, waiting");
                    thread::sleep(options.retry_every);
                }
                Err(source) => return Err(StoreError::Lock { path, source }),
            }
        }
    }

    /// Take the lock at `path` if nobody holds it.
    pub(crate) fn try_acquire(path: PathBuf) -> Result<Option<Self>, StoreError> {
        let file = open_lock_file(&path)?;
        match try_lock_exclusive(&file) {
            Ok(true) => Ok(Some(Self::held(file))),
            Ok(false) => Ok(None),
            Err(source) => Err(StoreError::Lock { path, source }),
        }
    }

    fn held(mut file: File) -> Self {
        // Owner pid, for humans inspecting a stuck lock.
        let _ = file
            .set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()));
        Self { file }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        unlock(&self.file);
    }
}

fn open_lock_file(path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| StoreError::Lock {
            path: path.to_path_buf(),
            source,
        })
}

/// `Ok(false)` when another open file holds the lock.
#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return Ok(false),
            io::ErrorKind::Interrupted => continue,
            _ => return Err(err),
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    match file.try_lock() {
        Ok(()) => Ok(true),
        Err(std::fs::TryLockError::WouldBlock) => Ok(false),
        Err(std::fs::TryLockError::Error(err)) => Err(err),
    }
}

#[cfg(not(unix))]
fn unlock(file: &File) {
    let _ = file.unlock();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn lock_is_held_only_inside_section() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::new(dir.path());
        let lock = dir.path().join("queue.json.lock");

        let free_inside = coordinator
            .critical_section(&[Resource::Pending], || {
                LockFile::try_acquire(lock.clone()).unwrap().is_some()
            })
            .unwrap();

        assert!(!free_inside);
        assert!(LockFile::try_acquire(lock).unwrap().is_some());
    }

    #[test]
    fn sections_on_one_resource_never_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Arc::new(Coordinator::new(dir.path()));
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = coordinator.clone();
                let inside = inside.clone();
                let overlaps = overlaps.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        coordinator
                            .critical_section(&[Resource::Pending], || {
                                if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                    overlaps.fetch_add(1, Ordering::SeqCst);
                                }
                                thread::sleep(Duration::from_micros(200));
                                inside.fetch_sub(1, Ordering::SeqCst);
                            })
                            .unwrap();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn separate_coordinators_exclude_through_the_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let options = LockOptions {
            timeout: Duration::from_millis(50),
            ..LockOptions::default()
        };
        let a = Coordinator::with_options(dir.path(), options.clone());
        let b = Coordinator::with_options(dir.path(), options);

        let inner = a
            .critical_section(&[Resource::Failed], || {
                b.critical_section(&[Resource::Failed], || ())
            })
            .unwrap();

        assert!(matches!(inner, Err(StoreError::LockTimeout { .. })));
        assert!(b.critical_section(&[Resource::Failed], || ()).is_ok());
    }

    #[test]
    fn lock_file_left_by_a_dead_holder_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::with_options(
            dir.path(),
            LockOptions {
                timeout: Duration::from_millis(200),
                ..LockOptions::default()
            },
        );
        let lock = dir.path().join("config.json.lock");
        fs::write(&lock, "12345\n").unwrap();

        assert!(coordinator.critical_section(&[Resource::Config], || ()).is_ok());
        assert!(lock.exists());
        assert_eq!(
            fs::read_to_string(&lock).unwrap().trim(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn independent_coordinators_never_overlap() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("queue.json.lock"), "12345\n").unwrap();
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        // One coordinator per thread stands in for one process each.
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = Coordinator::new(dir.path());
                let inside = inside.clone();
                let overlaps = overlaps.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        coordinator
                            .critical_section(&[Resource::Pending], || {
                                if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                    overlaps.fetch_add(1, Ordering::SeqCst);
                                }
                                thread::sleep(Duration::from_micros(200));
                                inside.fetch_sub(1, Ordering::SeqCst);
                            })
                            .unwrap();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}

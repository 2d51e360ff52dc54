//! Persisted queue configuration.

use std::path::PathBuf;

use serde_json::Value;
use tracing::{info, warn};

use queuectl_core::Config;

use crate::error::{QueueResult, StoreError};
use crate::lock::{Coordinator, LockOptions, Resource};
use crate::store::file::{ensure_dir, read_json, write_json_atomic};

/// `config.json` in a data directory.
#[derive(Debug)]
pub struct ConfigStore {
    coordinator: Coordinator,
}

impl ConfigStore {
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

    pub fn path(&self) -> PathBuf {
        self.coordinator.record_path(Resource::Config)
    }

    /// Current configuration; seeds and persists the defaults when the
    /// record is missing, corrupt or out of range.
    pub fn load(&self) -> Result<Config, StoreError> {
        self.coordinator
            .critical_section(&[Resource::Config], || self.load_locked())?
    }

    /// Current configuration without writing anything.
    pub fn show(&self) -> Result<Config, StoreError> {
        Ok(self.read_valid()?.unwrap_or_default())
    }

    pub fn get(&self, key: &str) -> QueueResult<Value> {
        Ok(self.show()?.get(key)?)
    }

    /// Update one key and persist. Rejected updates leave the record as it was.
    pub fn set(&self, key: &str, value: &str) -> QueueResult<Config> {
        self.coordinator
            .critical_section(&[Resource::Config], || -> QueueResult<Config> {
                let mut config = self.load_locked()?;
                config.set(key, value)?;
                write_json_atomic(&self.path(), &config)?;
                info!(key, value, "config updated");
                Ok(config)
            })?
    }

    fn load_locked(&self) -> Result<Config, StoreError> {
        if let Some(config) = self.read_valid()? {
            return Ok(config);
        }
        let config = Config::default();
        write_json_atomic(&self.path(), &config)?;
        info!(path = %self.path().display(), "seeded default config");
        Ok(config)
    }

    /// `None` when the record is absent, corrupt or invalid.
    fn read_valid(&self) -> Result<Option<Config>, StoreError> {
        match read_json::<Config>(&self.path()) {
            Ok(Some(config)) if config.is_valid() => Ok(Some(config)),
            Ok(Some(config)) => {
                warn!(?config, "config out of range, using defaults");
                Ok(None)
            }
            Ok(None) => Ok(None),
            Err(err @ StoreError::Corrupt { .. }) => {
                warn!(error = %err, "corrupt config, using defaults");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use queuectl_core::DomainError;
    use serde_json::json;
    use std::fs;

    fn store() -> (ConfigStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (ConfigStore::open(dir.path()).unwrap(), dir)
    }

    #[test]
    fn load_seeds_defaults() {
        let (store, _dir) = store();
        assert!(!store.path().exists());

        assert_eq!(store.load().unwrap(), Config::default());
        assert!(store.path().exists());
    }

    #[test]
    fn show_does_not_write() {
        let (store, _dir) = store();
        assert_eq!(store.show().unwrap(), Config::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn corrupt_record_is_reseeded() {
        let (store, _dir) = store();
        fs::write(store.path(), "{ not json").unwrap();

        assert_eq!(store.load().unwrap(), Config::default());
        let on_disk: Config = serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk, Config::default());
    }

    #[test]
    fn set_get_round_trip() {
        let (store, _dir) = store();
        store.set("backoff_base", "3").unwrap();

        assert_eq!(store.get("backoff_base").unwrap(), json!(3));
        assert_eq!(store.load().unwrap().backoff_base, 3.0);
    }

    #[test]
    fn unknown_key_leaves_record_unchanged() {
        let (store, _dir) = store();
        store.set("max_retries", "5").unwrap();
        let before = fs::read(store.path()).unwrap();

        let err = store.set("unknown_key", "x").unwrap_err();

        assert!(matches!(
            err,
            QueueError::Domain(DomainError::UnknownConfigKey { .. })
        ));
        assert_eq!(fs::read(store.path()).unwrap(), before);
        assert!(store.get("unknown_key").is_err());
    }
}

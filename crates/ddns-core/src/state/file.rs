// # File State Store
//
// File-based implementation of StateStore with crash recovery.
//
// ## Purpose
//
// Keeps record status, last known good IP and history across daemon
// restarts, so a restart does not re-push unchanged records.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of the previous document
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "records": {
//     "www.example.com/v4": {
//       "status": "up_to_date",
//       "ip": "1.2.3.4",
//       "message": "changed to 1.2.3.4",
//       "error": null,
//       "updated_at": "2025-01-09T12:00:00Z",
//       "history": [
//         { "time": "2025-01-09T12:00:00Z", "ip": "1.2.3.4",
//           "outcome": { "result": "success" } }
//       ]
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::StateStoreConfig;
use crate::record::{RecordId, RecordState, StateUpdate};
use crate::traits::state_store::{StateStore, StateStoreFactory};

/// State file format version
/// Used for future migration if format changes
const STATE_FILE_VERSION: &str = "1.0";

type Records = BTreeMap<RecordId, RecordState>;

/// File-based state store with crash recovery
///
/// Every update is applied in memory and written through to disk under the
/// same lock, so writes are serialized and each one leaves a complete
/// document behind.
///
/// # Example
///
/// ```rust,no_run
/// use ddns_core::state::FileStateStore;
/// use ddns_core::{RecordId, StateStore, StateUpdate};
/// use ddns_core::config::IpVersion;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStateStore::new("/var/lib/ddns/state.json", 20).await?;
///     let id = RecordId::new("example.com", "@", IpVersion::V4);
///
///     // Atomically written to disk
///     store.update(&id, StateUpdate::success("1.2.3.4".parse()?)).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    history_limit: usize,
    state: Arc<RwLock<FileState>>,
}

/// Internal state for file-based store
#[derive(Debug)]
struct FileState {
    records: Records,
    dirty: bool,
}

/// Serializable state file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StateFileFormat {
    version: String,
    records: Records,
}

impl FileStateStore {
    /// Create or load a file state store
    ///
    /// This will:
    /// 1. Try to load existing state file
    /// 2. If corruption detected, try to load from backup
    /// 3. If both fail, start with empty state
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P, history_limit: usize) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let records = Self::load_state_with_recovery(&path).await?;

        Ok(Self {
            path,
            history_limit,
            state: Arc::new(RwLock::new(FileState {
                records,
                dirty: false,
            })),
        })
    }

    /// Load state from file with automatic recovery
    ///
    /// Only parse failures count as corruption; I/O errors are returned.
    async fn load_state_with_recovery(path: &Path) -> Result<Records, Error> {
        let err = match Self::load_state(path).await {
            Ok(records) => {
                tracing::debug!("Loaded state from file: {} records", records.len());
                return Ok(records);
            }
            Err(Error::Json(e)) => e,
            Err(e) => return Err(e),
        };

        tracing::warn!(
            "State file {} appears corrupted: {}. Attempting recovery from backup.",
            path.display(),
            err
        );

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No backup file found. Starting with empty state.");
            return Ok(Records::new());
        }

        match Self::load_state(&backup_path).await {
            Ok(records) => {
                tracing::info!("Recovered state from backup: {} records", records.len());

                if let Err(restore_err) = Self::restore_from_backup(path, &backup_path).await {
                    tracing::error!(
                        "Failed to restore state file from backup: {}",
                        restore_err
                    );
                }

                Ok(records)
            }
            Err(backup_err) => {
                tracing::error!(
                    "Backup also unusable: {}. Starting with empty state.",
                    backup_err
                );
                Ok(Records::new())
            }
        }
    }

    /// Load state from file
    async fn load_state(path: &Path) -> Result<Records, Error> {
        if !path.exists() {
            tracing::debug!("State file does not exist: {}", path.display());
            return Ok(Records::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to read state file {}: {}",
                path.display(),
                e
            ))
        })?;

        let state_file: StateFileFormat = serde_json::from_str(&content)?;

        if state_file.version != STATE_FILE_VERSION {
            tracing::warn!(
                "State file version mismatch: expected {}, got {}. \
                Attempting to load anyway.",
                STATE_FILE_VERSION,
                state_file.version
            );
        }

        Ok(state_file.records)
    }

    /// Write the document atomically
    ///
    /// Callers hold the state write lock, which serializes writers.
    async fn write_state(&self, state: &mut FileState) -> Result<(), Error> {
        let state_file = StateFileFormat {
            version: STATE_FILE_VERSION.to_string(),
            records: state.records.clone(),
        };

        let json = serde_json::to_string_pretty(&state_file)
            .map_err(|e| Error::state_store(format!("Failed to serialize state: {}", e)))?;

        let temp_path = self.temp_path();
        let io_err = |action: &str, e: std::io::Error| {
            Error::state_store(format!("Failed to {} {}: {}", action, temp_path.display(), e))
        };
        {
            let mut file = fs::File::create(&temp_path)
                .await
                .map_err(|e| io_err("create", e))?;
            file.write_all(json.as_bytes())
                .await
                .map_err(|e| io_err("write", e))?;
            file.sync_all().await.map_err(|e| io_err("sync", e))?;
        }

        // Keep the previous document as backup
        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        state.dirty = false;
        tracing::trace!("State written to file: {}", self.path.display());
        Ok(())
    }

    /// Restore state file from backup
    async fn restore_from_backup(path: &Path, backup_path: &Path) -> Result<(), Error> {
        fs::copy(backup_path, path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to restore from backup {} to {}: {}",
                backup_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!("Restored state file from backup");
        Ok(())
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Get path to backup file
    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn select(&self, id: &RecordId) -> Result<RecordState, Error> {
        let guard = self.state.read().await;
        guard
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id.to_string()))
    }

    async fn select_all(&self) -> Result<Vec<(RecordId, RecordState)>, Error> {
        let guard = self.state.read().await;
        Ok(guard
            .records
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect())
    }

    async fn update(&self, id: &RecordId, update: StateUpdate) -> Result<(), Error> {
        let mut guard = self.state.write().await;

        let mut record = guard.records.get(id).cloned().unwrap_or_default();
        record.apply(update, self.history_limit)?;
        guard.records.insert(id.clone(), record);
        guard.dirty = true;

        // Immediate write for durability; on failure the change stays dirty
        // and is retried by the next write or flush
        self.write_state(&mut guard).await
    }

    async fn flush(&self) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        if guard.dirty {
            self.write_state(&mut guard).await
        } else {
            Ok(())
        }
    }
}

/// Factory for `{"type": "file", "path": ...}`
pub struct FileStateStoreFactory;

#[async_trait]
impl StateStoreFactory for FileStateStoreFactory {
    async fn create(&self, config: &StateStoreConfig) -> Result<Arc<dyn StateStore>, Error> {
        match config {
            StateStoreConfig::File {
                path,
                history_limit,
            } => Ok(Arc::new(FileStateStore::new(path, *history_limit).await?)),
            other => Err(Error::config(format!(
                "file factory cannot build a '{}' store",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IpVersion;
    use crate::record::RecordStatus;
    use std::net::IpAddr;
    use tempfile::tempdir;

    fn id() -> RecordId {
        RecordId::new("example.com", "www", IpVersion::V4)
    }

    #[tokio::test]
    async fn test_file_store_basic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStateStore::new(&path, 10).await.unwrap();
        assert!(store.select_all().await.unwrap().is_empty());

        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        store.update(&id(), StateUpdate::success(ip)).await.unwrap();
        assert!(path.exists());

        // Load new instance and verify persistence
        let store2 = FileStateStore::new(&path, 10).await.unwrap();
        let state = store2.select(&id()).await.unwrap();
        assert_eq!(state.ip, Some(ip));
        assert_eq!(state.status, RecordStatus::UpToDate);
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_corruption_recovery() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStateStore::new(&path, 10).await.unwrap();
        let ip1: IpAddr = "1.2.3.4".parse().unwrap();
        store.update(&id(), StateUpdate::success(ip1)).await.unwrap();

        // Second write creates the backup of the first document
        let ip2: IpAddr = "1.2.3.5".parse().unwrap();
        store.update(&id(), StateUpdate::success(ip2)).await.unwrap();

        let backup_path = FileStateStore::backup_path(&path);
        assert!(backup_path.exists(), "Backup file should exist after write");

        fs::write(&path, b"corrupted json data").await.unwrap();

        let store2 = FileStateStore::new(&path, 10).await.unwrap();
        let recovered = store2.select(&id()).await.unwrap();
        // Backup holds the state before the last write
        assert_eq!(recovered.ip, Some(ip1));
    }

    #[tokio::test]
    async fn test_file_store_corruption_without_backup_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{ not json").await.unwrap();

        let store = FileStateStore::new(&path, 10).await.unwrap();
        assert!(store.select_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_sequential_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStateStore::new(&path, 3).await.unwrap();
        for i in 0..10u8 {
            store
                .update(&id(), StateUpdate::success(IpAddr::from([1, 2, 3, i])))
                .await
                .unwrap();
        }

        let store2 = FileStateStore::new(&path, 3).await.unwrap();
        let state = store2.select(&id()).await.unwrap();
        assert_eq!(state.ip, Some("1.2.3.9".parse().unwrap()));
        assert_eq!(state.history.len(), 3);
    }

    #[tokio::test]
    async fn test_file_store_failure_keeps_ip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/state.json");

        let store = FileStateStore::new(&path, 10).await.unwrap();
        let good: IpAddr = "1.2.3.4".parse().unwrap();
        store.update(&id(), StateUpdate::success(good)).await.unwrap();
        store
            .update(
                &id(),
                StateUpdate::failure("5.6.7.8".parse().unwrap(), &Error::rate_limited("abuse")),
            )
            .await
            .unwrap();

        let state = FileStateStore::new(&path, 10)
            .await
            .unwrap()
            .select(&id())
            .await
            .unwrap();
        assert_eq!(state.status, RecordStatus::Fail);
        assert_eq!(state.ip, Some(good));
        assert_eq!(state.history.len(), 2);
    }
}

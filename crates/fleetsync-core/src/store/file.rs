// # File Cursor Store
//
// File-based implementation of CursorStore with crash recovery.
//
// ## Purpose
//
// Persists the per-class cursor document across daemon restarts so a
// restart does not re-trigger every class at once.
//
// ## Crash Recovery
//
// - Atomic writes: write-then-rename
// - Corruption detection: JSON validation on load
// - Automatic backup: keeps .backup of last known good document
// - Recovery: falls back to the backup if corruption is detected; if the
//   backup is also unreadable the load fails (an unreadable cursor store
//   aborts the run before any device call)
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "cursors": {
//     "pools": "2025-06-01T12:00:00Z",
//     "users": "2025-05-30T03:00:00Z"
//   }
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;
use crate::model::SyncCursors;
use crate::traits::cursor_store::{CursorStore, CursorStoreFactory};

/// Cursor file format version, for future migration
const CURSOR_FILE_VERSION: &str = "1.0";

/// Serializable cursor file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CursorFileFormat {
    version: String,
    cursors: SyncCursors,
}

/// File-based cursor store with atomic writes and backup recovery
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    /// Create a store backed by the given path.
    ///
    /// The file is not touched until the first load or store; a missing
    /// file loads as the empty document (every class due).
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn read_document(path: &Path) -> Result<SyncCursors, Error> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::cursor_store(format!("failed to read {}: {}", path.display(), e))
        })?;

        let file: CursorFileFormat = serde_json::from_str(&content).map_err(|e| {
            Error::cursor_store(format!("failed to parse {}: {}", path.display(), e))
        })?;

        if file.version != CURSOR_FILE_VERSION {
            tracing::warn!(
                "cursor file version mismatch: expected {}, got {}; loading anyway",
                CURSOR_FILE_VERSION,
                file.version
            );
        }

        Ok(file.cursors)
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> Result<SyncCursors, Error> {
        if !self.path.exists() {
            tracing::debug!("cursor file does not exist: {}", self.path.display());
            return Ok(SyncCursors::new());
        }

        match Self::read_document(&self.path).await {
            Ok(cursors) => Ok(cursors),
            Err(e) => {
                tracing::warn!(
                    "cursor file appears corrupted: {}; attempting backup recovery",
                    e
                );
                let backup = Self::backup_path(&self.path);
                if !backup.exists() {
                    return Err(e);
                }
                let cursors = Self::read_document(&backup).await.map_err(|backup_err| {
                    Error::cursor_store(format!(
                        "cursor file and backup both unreadable: {e}; {backup_err}"
                    ))
                })?;

                // Put the last known good document back in place
                if let Err(restore_err) = fs::copy(&backup, &self.path).await {
                    tracing::warn!("failed to restore cursor file from backup: {}", restore_err);
                } else {
                    tracing::info!("recovered cursor document from backup");
                }
                Ok(cursors)
            }
        }
    }

    async fn store(&self, cursors: &SyncCursors) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::cursor_store(format!(
                        "failed to create cursor directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let file = CursorFileFormat {
            version: CURSOR_FILE_VERSION.to_string(),
            cursors: cursors.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::cursor_store(format!("failed to serialize cursors: {e}")))?;

        // Write to a temporary file first
        let temp_path = self.temp_path();
        {
            let mut f = fs::File::create(&temp_path).await.map_err(|e| {
                Error::cursor_store(format!(
                    "failed to create {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            f.write_all(json.as_bytes()).await.map_err(|e| {
                Error::cursor_store(format!("failed to write {}: {}", temp_path.display(), e))
            })?;
            f.flush().await.map_err(|e| {
                Error::cursor_store(format!("failed to flush {}: {}", temp_path.display(), e))
            })?;
        }

        // Keep the last known good document before replacing it
        if self.path.exists() {
            let backup = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup).await {
                tracing::warn!("failed to create cursor backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::cursor_store(format!(
                "failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("cursor document written to {}", self.path.display());
        Ok(())
    }
}

/// Factory for file and memory cursor stores
pub struct DefaultCursorStoreFactory;

impl CursorStoreFactory for DefaultCursorStoreFactory {
    fn create(
        &self,
        config: &crate::config::CursorStoreConfig,
    ) -> Result<Box<dyn CursorStore>, Error> {
        match config {
            crate::config::CursorStoreConfig::File { path } => {
                Ok(Box::new(FileCursorStore::new(path)))
            }
            crate::config::CursorStoreConfig::Memory => {
                Ok(Box::new(super::memory::MemoryCursorStore::new()))
            }
            crate::config::CursorStoreConfig::Custom { factory, .. } => Err(Error::config(
                format!("cursor store factory {factory:?} is not registered here"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityClass;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn cursors_at(hour: u32) -> SyncCursors {
        let mut cursors = SyncCursors::new();
        cursors.set(
            EntityClass::Pools,
            Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap(),
        );
        cursors
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty_document() {
        let dir = tempdir().unwrap();
        let store = FileCursorStore::new(dir.path().join("cursors.json"));
        let cursors = store.load().await.unwrap();
        assert!(cursors.get(EntityClass::Pools).is_none());
    }

    #[tokio::test]
    async fn store_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursors.json");
        let store = FileCursorStore::new(&path);

        let cursors = cursors_at(12);
        store.store(&cursors).await.unwrap();
        assert!(path.exists());

        let reloaded = FileCursorStore::new(&path).load().await.unwrap();
        assert_eq!(reloaded, cursors);
    }

    #[tokio::test]
    async fn corruption_recovers_from_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursors.json");
        let store = FileCursorStore::new(&path);

        // Two writes so a backup of the first exists
        store.store(&cursors_at(1)).await.unwrap();
        store.store(&cursors_at(2)).await.unwrap();
        assert!(FileCursorStore::backup_path(&path).exists());

        fs::write(&path, b"corrupted json data").await.unwrap();

        let recovered = store.load().await.unwrap();
        assert_eq!(recovered, cursors_at(1), "backup holds the previous document");
    }

    #[tokio::test]
    async fn double_corruption_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursors.json");
        let store = FileCursorStore::new(&path);

        store.store(&cursors_at(1)).await.unwrap();
        store.store(&cursors_at(2)).await.unwrap();

        fs::write(&path, b"garbage").await.unwrap();
        fs::write(FileCursorStore::backup_path(&path), b"more garbage")
            .await
            .unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::CursorStore(_)));
    }
}

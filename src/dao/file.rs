use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::dao::storage::{StorageChange, StorageDomain, StorageError, StorageResult};

const CHANGE_CAPACITY: usize = 64;

/// Directory-backed storage domain: one JSON file per key.
///
/// Separate processes pointed at the same directory share records, but change
/// notifications only reach subscribers of the writing instance. Tabs in other
/// processes notice foreign writes when they next read the record.
pub struct FileStorage {
    root: PathBuf,
    changes: broadcast::Sender<StorageChange>,
}

impl FileStorage {
    /// Open (and create if needed) the storage directory.
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StorageError::io("<root>", source))?;
        let (changes, _receiver) = broadcast::channel(CHANGE_CAPACITY);
        Ok(Self { root, changes })
    }

    /// Directory holding the records.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    fn notify(&self, key: &str, value: Option<String>) {
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            value,
        });
    }
}

impl StorageDomain for FileStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::io(key, err)),
        }
    }

    fn set(&self, key: &str, value: String) -> StorageResult<()> {
        // rename keeps readers from ever observing a half-written record
        let staging = self
            .root
            .join(format!("{key}.{}.tmp", Uuid::new_v4().simple()));
        fs::write(&staging, value.as_bytes()).map_err(|source| StorageError::io(key, source))?;
        if let Err(source) = fs::rename(&staging, self.path_for(key)) {
            let _ = fs::remove_file(&staging);
            return Err(StorageError::io(key, source));
        }
        debug!(key, bytes = value.len(), "storage record replaced");
        self.notify(key, Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {
                self.notify(key, None);
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::io(key, err)),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

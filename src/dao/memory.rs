use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::dao::storage::{StorageChange, StorageDomain, StorageResult};

const CHANGE_CAPACITY: usize = 64;

/// In-process storage domain. Share one instance by `Arc` between tabs.
pub struct MemoryStorage {
    entries: DashMap<String, String>,
    changes: broadcast::Sender<StorageChange>,
}

impl MemoryStorage {
    /// Create an empty storage domain.
    pub fn new() -> Self {
        let (changes, _receiver) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            entries: DashMap::new(),
            changes,
        }
    }

    fn notify(&self, key: &str, value: Option<String>) {
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            value,
        });
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageDomain for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &str, value: String) -> StorageResult<()> {
        self.entries.insert(key.to_string(), value.clone());
        self.notify(key, Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        if self.entries.remove(key).is_some() {
            self.notify(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

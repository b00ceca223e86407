use serde::{Serialize, de::DeserializeOwned};
use std::io;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

/// Storage key holding the player's [`Credential`](super::models::Credential).
pub const CREDENTIAL_KEY: &str = "questarena.credential";
/// Storage key holding the resumable [`ProgressSnapshot`](super::models::ProgressSnapshot).
pub const PROGRESS_KEY: &str = "questarena.progress";
/// Storage key holding the advisory [`TabLockRecord`](super::models::TabLockRecord).
pub const TAB_LOCK_KEY: &str = "questarena.tab_lock";

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage domains regardless of the backing medium.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing medium failed.
    #[error("storage i/o failed for `{key}`")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    /// A record could not be serialised before writing.
    #[error("failed to encode storage record `{key}`")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Wrap an I/O failure for `key`.
    pub fn io(key: &str, source: io::Error) -> Self {
        StorageError::Io {
            key: key.to_string(),
            source,
        }
    }
}

/// Notification emitted whenever a key of the storage domain changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    /// Key that was written or removed.
    pub key: String,
    /// New raw value, `None` when the key was removed.
    pub value: Option<String>,
}

/// Key/value domain shared by every tab of one browser profile.
///
/// Values are whole JSON records; writers always replace a record entirely.
pub trait StorageDomain: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: String) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
    /// Subscribe to changes made through this domain from now on.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// Read and decode a JSON record. Undecodable records are logged and read as absent.
pub fn read_json<T>(storage: &dyn StorageDomain, key: &str) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
{
    let Some(raw) = storage.get(key)? else {
        return Ok(None);
    };
    Ok(decode_json(key, &raw))
}

/// Decode a raw record value, logging and discarding anything malformed.
pub fn decode_json<T>(key: &str, raw: &str) -> Option<T>
where
    T: DeserializeOwned,
{
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, error = %err, "discarding undecodable storage record");
            None
        }
    }
}

/// Encode `value` as JSON and replace the record stored under `key`.
pub fn write_json<T>(storage: &dyn StorageDomain, key: &str, value: &T) -> StorageResult<()>
where
    T: Serialize,
{
    let raw = serde_json::to_string(value).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })?;
    storage.set(key, raw)
}

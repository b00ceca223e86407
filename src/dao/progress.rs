use std::sync::Arc;

use tracing::debug;

use crate::dao::{
    models::{Credential, ProgressSnapshot},
    storage::{PROGRESS_KEY, StorageDomain, StorageResult, read_json, write_json},
};

/// Crash-recovery cache of the player's resumable progress.
///
/// Never used as a live transport: the server stays authoritative and the
/// snapshot only tells a rebooted tab which screen to rebuild.
#[derive(Clone)]
pub struct ProgressStore {
    storage: Arc<dyn StorageDomain>,
}

impl ProgressStore {
    pub fn new(storage: Arc<dyn StorageDomain>) -> Self {
        Self { storage }
    }

    /// Snapshot for `credential`, or `None` when the stored record belongs to
    /// another identity (it is ignored, never merged).
    pub fn read(&self, credential: &Credential) -> StorageResult<Option<ProgressSnapshot>> {
        let snapshot = read_json::<ProgressSnapshot>(self.storage.as_ref(), PROGRESS_KEY)?;
        Ok(snapshot.filter(|snapshot| {
            let usable = snapshot.belongs_to(credential);
            if !usable {
                debug!(
                    stored_user = %snapshot.username,
                    stored_session = snapshot.session_id,
                    "ignoring snapshot written for another identity"
                );
            }
            usable
        }))
    }

    /// Overwrite the full record, keeping a stored `completed` flag for the same
    /// identity. Returns the record as written.
    pub fn write(&self, mut snapshot: ProgressSnapshot) -> StorageResult<ProgressSnapshot> {
        if let Some(previous) = read_json::<ProgressSnapshot>(self.storage.as_ref(), PROGRESS_KEY)? {
            snapshot.inherit_completion(&previous);
        }
        write_json(self.storage.as_ref(), PROGRESS_KEY, &snapshot)?;
        Ok(snapshot)
    }

    /// Remove the record. Only logout and failed validation do this.
    pub fn clear(&self) -> StorageResult<()> {
        self.storage.remove(PROGRESS_KEY)
    }
}

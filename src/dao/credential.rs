use std::sync::Arc;

use crate::dao::{
    models::Credential,
    storage::{CREDENTIAL_KEY, StorageDomain, StorageResult, read_json, write_json},
};

/// Whole-record persistence of the player's credential.
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn StorageDomain>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn StorageDomain>) -> Self {
        Self { storage }
    }

    /// Stored credential, if any.
    pub fn load(&self) -> StorageResult<Option<Credential>> {
        read_json(self.storage.as_ref(), CREDENTIAL_KEY)
    }

    /// Replace the stored credential.
    pub fn save(&self, credential: &Credential) -> StorageResult<()> {
        write_json(self.storage.as_ref(), CREDENTIAL_KEY, credential)
    }

    pub fn clear(&self) -> StorageResult<()> {
        self.storage.remove(CREDENTIAL_KEY)
    }
}

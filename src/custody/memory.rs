//! In-memory key vault.
//!
//! Backs tests, demos, and ephemeral agents. Keys live in process memory
//! and are gone when the vault is dropped; nothing here survives a
//! restart, so production deployments plug a real keystore into
//! [`KeyVault`](super::KeyVault) instead.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CustodyError, KeyVault, SyncPolicy};

struct StoredKey {
    bytes: Vec<u8>,
    policy: SyncPolicy,
}

/// A [`KeyVault`] backed by a process-local map.
#[derive(Default)]
pub struct MemoryVault {
    entries: RwLock<HashMap<String, StoredKey>>,
}

impl MemoryVault {
    /// Create an empty vault.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the vault holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// The sync policy recorded for an entry, if present.
    pub async fn policy_of(&self, storage_id: &str) -> Option<SyncPolicy> {
        self.entries
            .read()
            .await
            .get(storage_id)
            .map(|entry| entry.policy)
    }
}

#[async_trait]
impl KeyVault for MemoryVault {
    async fn put(
        &self,
        storage_id: &str,
        material: &[u8],
        policy: SyncPolicy,
    ) -> Result<(), CustodyError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            storage_id.to_string(),
            StoredKey {
                bytes: material.to_vec(),
                policy,
            },
        );
        Ok(())
    }

    async fn get(&self, storage_id: &str) -> Result<Option<Vec<u8>>, CustodyError> {
        let entries = self.entries.read().await;
        Ok(entries.get(storage_id).map(|entry| entry.bytes.clone()))
    }

    async fn delete(&self, storage_id: &str) -> Result<(), CustodyError> {
        let mut entries = self.entries.write().await;
        entries.remove(storage_id);
        Ok(())
    }

    async fn contains(&self, storage_id: &str) -> Result<bool, CustodyError> {
        let entries = self.entries.read().await;
        Ok(entries.contains_key(storage_id))
    }
}

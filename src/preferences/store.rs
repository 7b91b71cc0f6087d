//! Encrypted preference persistence.
//!
//! The backend only ever sees `PreferenceRecord`s: a user id, a timestamp,
//! and an opaque base64 blob. [`PreferenceSync`] does the encryption on
//! the way up and decryption plus validation on the way down, so a
//! compromised store leaks nothing about venues, hours, or peers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use super::AgentPreferences;
use crate::crypto::{CryptoProvider, KeyMaterial};
use crate::error::Result;

/// Errors from preference store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend rejected or failed the operation.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// Backend is unreachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored record is corrupt (bad base64, truncated blob).
    #[error("Corrupt preference record: {0}")]
    CorruptRecord(String),
}

/// What the sync backend stores per user. `encrypted_data` is base64 of an
/// AEAD blob; the backend cannot read it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreferenceRecord {
    /// Owner of the preferences.
    pub user_id: String,
    /// Base64-encoded encrypted preference blob.
    pub encrypted_data: String,
    /// Last upload time.
    pub date_updated: DateTime<Utc>,
}

/// Storage backend for encrypted preference records.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Insert or replace the record for `record.user_id`.
    async fn upsert(&self, record: PreferenceRecord) -> std::result::Result<(), StoreError>;

    /// Fetch the record for a user, or `None` if never uploaded.
    async fn fetch(
        &self,
        user_id: &str,
    ) -> std::result::Result<Option<PreferenceRecord>, StoreError>;
}

/// A [`PreferenceStore`] backed by a process-local map.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    records: RwLock<HashMap<String, PreferenceRecord>>,
}

impl MemoryPreferenceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn upsert(&self, record: PreferenceRecord) -> std::result::Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.insert(record.user_id.clone(), record);
        Ok(())
    }

    async fn fetch(
        &self,
        user_id: &str,
    ) -> std::result::Result<Option<PreferenceRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(user_id).cloned())
    }
}

/// Encrypts preferences on upload, decrypts and validates on download.
pub struct PreferenceSync {
    store: Arc<dyn PreferenceStore>,
    crypto: Arc<dyn CryptoProvider>,
}

impl PreferenceSync {
    /// Create a sync handle over a store backend.
    pub fn new(store: Arc<dyn PreferenceStore>, crypto: Arc<dyn CryptoProvider>) -> Self {
        Self { store, crypto }
    }

    /// Encrypt `prefs` under `key` and upload them for `user_id`.
    pub async fn upload(
        &self,
        user_id: &str,
        prefs: &AgentPreferences,
        key: &KeyMaterial,
    ) -> Result<()> {
        let plaintext = serde_json::to_vec(prefs)?;
        let blob = self.crypto.encrypt(&plaintext, key)?;

        let record = PreferenceRecord {
            user_id: user_id.to_string(),
            encrypted_data: BASE64.encode(blob),
            date_updated: Utc::now(),
        };
        self.store.upsert(record).await?;
        tracing::debug!(user_id, "Uploaded encrypted preferences");
        Ok(())
    }

    /// Download and decrypt the preferences for `user_id`.
    ///
    /// Returns `Ok(None)` when nothing has been uploaded yet. Decrypted
    /// preferences are validated before being returned, so rules that
    /// would not pass construction cannot enter through storage either.
    pub async fn download(
        &self,
        user_id: &str,
        key: &KeyMaterial,
    ) -> Result<Option<AgentPreferences>> {
        let Some(record) = self.store.fetch(user_id).await? else {
            return Ok(None);
        };

        let blob = BASE64
            .decode(record.encrypted_data.as_bytes())
            .map_err(|e| StoreError::CorruptRecord(e.to_string()))?;
        let plaintext = self.crypto.decrypt(&blob, key)?;
        let prefs: AgentPreferences = serde_json::from_slice(&plaintext)?;
        prefs.validate()?;

        tracing::debug!(user_id, "Downloaded preferences");
        Ok(Some(prefs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{DefaultCrypto, KEY_SIZE};
    use crate::error::ParleyError;

    fn sync_over(store: Arc<MemoryPreferenceStore>) -> PreferenceSync {
        PreferenceSync::new(store, Arc::new(DefaultCrypto))
    }

    fn sample_prefs() -> AgentPreferences {
        let mut prefs = AgentPreferences::default();
        prefs
            .learned
            .venue_scores
            .insert("cafe-blue".to_string(), 0.9);
        prefs.learned.hour_scores.insert(14, 0.8);
        prefs.learned.negotiation_count = 12;
        prefs
    }

    #[tokio::test]
    async fn test_upload_download_roundtrip() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let sync = sync_over(store.clone());
        let key = KeyMaterial::new(vec![9u8; KEY_SIZE]);

        let prefs = sample_prefs();
        sync.upload("alice", &prefs, &key).await.unwrap();

        let downloaded = sync.download("alice", &key).await.unwrap().unwrap();
        assert_eq!(downloaded, prefs);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_download_before_upload_is_none() {
        let sync = sync_over(Arc::new(MemoryPreferenceStore::new()));
        let key = KeyMaterial::new(vec![9u8; KEY_SIZE]);
        assert!(sync.download("alice", &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_key_cannot_decrypt() {
        let sync = sync_over(Arc::new(MemoryPreferenceStore::new()));
        let key = KeyMaterial::new(vec![9u8; KEY_SIZE]);
        let wrong = KeyMaterial::new(vec![8u8; KEY_SIZE]);

        sync.upload("alice", &sample_prefs(), &key).await.unwrap();

        let err = sync.download("alice", &wrong).await.unwrap_err();
        assert!(matches!(err, ParleyError::Crypto(_)));
    }

    #[tokio::test]
    async fn test_stored_record_is_opaque() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let sync = sync_over(store.clone());
        let key = KeyMaterial::new(vec![9u8; KEY_SIZE]);

        sync.upload("alice", &sample_prefs(), &key).await.unwrap();

        let record = store.fetch("alice").await.unwrap().unwrap();
        assert_eq!(record.user_id, "alice");
        // The blob must not leak plaintext fields
        assert!(!record.encrypted_data.contains("cafe-blue"));
        assert!(!record.encrypted_data.contains("venue_scores"));
    }

    #[tokio::test]
    async fn test_corrupt_base64_is_reported() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let sync = sync_over(store.clone());
        let key = KeyMaterial::new(vec![9u8; KEY_SIZE]);

        store
            .upsert(PreferenceRecord {
                user_id: "alice".to_string(),
                encrypted_data: "&&& not base64 &&&".to_string(),
                date_updated: Utc::now(),
            })
            .await
            .unwrap();

        let err = sync.download("alice", &key).await.unwrap_err();
        assert!(matches!(
            err,
            ParleyError::Store(StoreError::CorruptRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_download_validates_settings() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let sync = sync_over(store.clone());
        let key = KeyMaterial::new(vec![9u8; KEY_SIZE]);

        // Encrypt a record whose settings would fail validation
        let mut prefs = sample_prefs();
        prefs.autonomy.auto_accept_threshold = 3.5;
        let plaintext = serde_json::to_vec(&prefs).unwrap();
        let blob = DefaultCrypto.encrypt(&plaintext, &key).unwrap();
        store
            .upsert(PreferenceRecord {
                user_id: "alice".to_string(),
                encrypted_data: BASE64.encode(blob),
                date_updated: Utc::now(),
            })
            .await
            .unwrap();

        let err = sync.download("alice", &key).await.unwrap_err();
        assert!(matches!(err, ParleyError::Settings(_)));
    }

    #[tokio::test]
    async fn test_upsert_replaces_previous_record() {
        let store = Arc::new(MemoryPreferenceStore::new());
        let sync = sync_over(store.clone());
        let key = KeyMaterial::new(vec![9u8; KEY_SIZE]);

        sync.upload("alice", &sample_prefs(), &key).await.unwrap();

        let mut updated = sample_prefs();
        updated.learned.negotiation_count = 30;
        sync.upload("alice", &updated, &key).await.unwrap();

        let downloaded = sync.download("alice", &key).await.unwrap().unwrap();
        assert_eq!(downloaded.learned.negotiation_count, 30);
        assert_eq!(store.len().await, 1);
    }
}

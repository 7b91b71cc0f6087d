//! Key custody.
//!
//! Owns the lifecycle of every key an agent holds: the master preference
//! key, the upload key derived for preference sync, and the X25519
//! agreement secret. Storage goes through the [`KeyVault`] trait so the
//! same orchestration works against an OS keystore, an encrypted file, or
//! the in-memory vault used by tests and demos.
//!
//! Storage identifiers are namespaced as `{namespace}/{user_id}/{slug}`,
//! which keeps multiple users (and multiple library versions) from
//! colliding inside one vault.

pub mod memory;

pub use memory::MemoryVault;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::crypto::{CryptoProvider, KeyMaterial, KeyPair, KEY_SIZE};
use crate::error::Result;

/// Default storage namespace.
pub const DEFAULT_NAMESPACE: &str = "parley/v1";

/// Errors from key custody operations.
#[derive(Debug, Error)]
pub enum CustodyError {
    /// No key stored under the identifier.
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Vault write failed.
    #[error("Failed to save key: {0}")]
    SaveFailed(String),

    /// Vault read failed.
    #[error("Failed to load key: {0}")]
    LoadFailed(String),

    /// Vault delete failed.
    #[error("Failed to delete key: {0}")]
    DeleteFailed(String),

    /// Stored bytes are not valid for the requested key type.
    #[error("Invalid key data: {0}")]
    InvalidData(String),
}

/// Where a key is allowed to live.
///
/// `DeviceLocal` keys must never leave the device; `Synchronized` keys may
/// be replicated through the platform's own sync mechanism (e.g. an
/// iCloud-style keychain). The vault decides what to do with the hint;
/// `MemoryVault` just records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Key stays on this device only.
    DeviceLocal,
    /// Key may be synchronized across the user's devices.
    Synchronized,
}

/// Well-known keys an agent holds, plus an escape hatch for extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyIdentifier {
    /// Master key protecting the user's preference data.
    Master,
    /// Key for encrypting preference uploads to the sync backend.
    Upload,
    /// X25519 agreement secret.
    Agreement,
    /// Caller-defined key.
    Custom(String),
}

impl KeyIdentifier {
    /// Stable storage slug for this identifier.
    pub fn slug(&self) -> &str {
        match self {
            KeyIdentifier::Master => "master",
            KeyIdentifier::Upload => "upload",
            KeyIdentifier::Agreement => "agreement",
            KeyIdentifier::Custom(name) => name,
        }
    }
}

impl fmt::Display for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Backend storage for secret key bytes.
#[async_trait]
pub trait KeyVault: Send + Sync {
    /// Store bytes under `storage_id`, replacing any existing entry.
    async fn put(
        &self,
        storage_id: &str,
        material: &[u8],
        policy: SyncPolicy,
    ) -> std::result::Result<(), CustodyError>;

    /// Fetch bytes stored under `storage_id`, or `None` if absent.
    async fn get(&self, storage_id: &str) -> std::result::Result<Option<Vec<u8>>, CustodyError>;

    /// Remove the entry under `storage_id`. Removing an absent entry is not
    /// an error.
    async fn delete(&self, storage_id: &str) -> std::result::Result<(), CustodyError>;

    /// Check whether an entry exists under `storage_id`.
    async fn contains(&self, storage_id: &str) -> std::result::Result<bool, CustodyError>;
}

/// Key lifecycle orchestrator for one user.
///
/// Read-modify-write operations (`load_or_generate_*`, `rotate_symmetric`)
/// are serialized per identifier, so concurrent callers cannot generate
/// two different keys for the same slot.
pub struct KeyCustody {
    vault: Arc<dyn KeyVault>,
    crypto: Arc<dyn CryptoProvider>,
    namespace: String,
    user_id: String,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyCustody {
    /// Create a custody manager with the default namespace.
    pub fn new(
        vault: Arc<dyn KeyVault>,
        crypto: Arc<dyn CryptoProvider>,
        user_id: impl Into<String>,
    ) -> Self {
        Self::with_namespace(vault, crypto, user_id, DEFAULT_NAMESPACE)
    }

    /// Create a custody manager with an explicit namespace.
    pub fn with_namespace(
        vault: Arc<dyn KeyVault>,
        crypto: Arc<dyn CryptoProvider>,
        user_id: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            vault,
            crypto,
            namespace: namespace.into(),
            user_id: user_id.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The user this custody manager belongs to.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn storage_id(&self, id: &KeyIdentifier) -> String {
        format!("{}/{}/{}", self.namespace, self.user_id, id.slug())
    }

    async fn lock_for(&self, storage_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(storage_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Store key material under an identifier, replacing any existing key.
    pub async fn save(
        &self,
        id: &KeyIdentifier,
        material: &KeyMaterial,
        policy: SyncPolicy,
    ) -> Result<()> {
        let storage_id = self.storage_id(id);
        let lock = self.lock_for(&storage_id).await;
        let _guard = lock.lock().await;

        self.vault
            .put(&storage_id, material.as_bytes(), policy)
            .await?;
        tracing::debug!(identifier = %id, "Stored key");
        Ok(())
    }

    /// Load key material, failing if nothing is stored.
    pub async fn load(&self, id: &KeyIdentifier) -> Result<KeyMaterial> {
        let storage_id = self.storage_id(id);
        match self.vault.get(&storage_id).await? {
            Some(bytes) => Ok(KeyMaterial::new(bytes)),
            None => Err(CustodyError::NotFound(id.to_string()).into()),
        }
    }

    /// Replace an existing key. Fails if the identifier holds nothing yet.
    pub async fn update(
        &self,
        id: &KeyIdentifier,
        material: &KeyMaterial,
        policy: SyncPolicy,
    ) -> Result<()> {
        let storage_id = self.storage_id(id);
        let lock = self.lock_for(&storage_id).await;
        let _guard = lock.lock().await;

        if !self.vault.contains(&storage_id).await? {
            return Err(CustodyError::NotFound(id.to_string()).into());
        }
        self.vault
            .put(&storage_id, material.as_bytes(), policy)
            .await?;
        tracing::debug!(identifier = %id, "Updated key");
        Ok(())
    }

    /// Delete a key. Deleting an absent key succeeds.
    pub async fn delete(&self, id: &KeyIdentifier) -> Result<()> {
        let storage_id = self.storage_id(id);
        let lock = self.lock_for(&storage_id).await;
        let _guard = lock.lock().await;

        self.vault.delete(&storage_id).await?;
        tracing::debug!(identifier = %id, "Deleted key");
        Ok(())
    }

    /// Check whether a key exists.
    pub async fn exists(&self, id: &KeyIdentifier) -> Result<bool> {
        let storage_id = self.storage_id(id);
        Ok(self.vault.contains(&storage_id).await?)
    }

    /// Load a 256-bit symmetric key, generating and storing one on first use.
    pub async fn load_or_generate_symmetric(
        &self,
        id: &KeyIdentifier,
        policy: SyncPolicy,
    ) -> Result<KeyMaterial> {
        let storage_id = self.storage_id(id);
        let lock = self.lock_for(&storage_id).await;
        let _guard = lock.lock().await;

        if let Some(bytes) = self.vault.get(&storage_id).await? {
            if bytes.len() != KEY_SIZE {
                return Err(CustodyError::InvalidData(format!(
                    "stored key '{id}' is {} bytes, expected {KEY_SIZE}",
                    bytes.len()
                ))
                .into());
            }
            return Ok(KeyMaterial::new(bytes));
        }

        let key = self.crypto.generate_symmetric_key()?;
        self.vault.put(&storage_id, key.as_bytes(), policy).await?;
        tracing::info!(identifier = %id, "Generated new symmetric key");
        Ok(key)
    }

    /// Load the X25519 agreement pair, generating and storing one on first use.
    pub async fn load_or_generate_key_pair(&self, policy: SyncPolicy) -> Result<KeyPair> {
        let id = KeyIdentifier::Agreement;
        let storage_id = self.storage_id(&id);
        let lock = self.lock_for(&storage_id).await;
        let _guard = lock.lock().await;

        if let Some(bytes) = self.vault.get(&storage_id).await? {
            let secret: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
                CustodyError::InvalidData(format!(
                    "stored agreement secret is {} bytes, expected {KEY_SIZE}",
                    bytes.len()
                ))
            })?;
            return Ok(KeyPair::from_secret_bytes(secret));
        }

        let pair = self.crypto.generate_key_pair()?;
        self.vault
            .put(&storage_id, &pair.secret_bytes(), policy)
            .await?;
        tracing::info!(identifier = %id, "Generated new agreement key pair");
        Ok(pair)
    }

    /// Replace a symmetric key with a freshly generated one.
    ///
    /// The old key is gone once this returns; callers re-encrypt any data
    /// protected by it before rotating.
    pub async fn rotate_symmetric(
        &self,
        id: &KeyIdentifier,
        policy: SyncPolicy,
    ) -> Result<KeyMaterial> {
        let storage_id = self.storage_id(id);
        let lock = self.lock_for(&storage_id).await;
        let _guard = lock.lock().await;

        let key = self.crypto.generate_symmetric_key()?;
        self.vault.put(&storage_id, key.as_bytes(), policy).await?;
        tracing::info!(identifier = %id, "Rotated symmetric key");
        Ok(key)
    }

    /// Export the master key for enrolling another device.
    ///
    /// The result is base64 of the raw key bytes. Transport it over a
    /// secure channel only.
    pub async fn export_master(&self) -> Result<String> {
        let master = self.load(&KeyIdentifier::Master).await?;
        Ok(master.to_base64())
    }

    /// Import a master key exported from another device.
    pub async fn import_master(&self, encoded: &str, policy: SyncPolicy) -> Result<()> {
        let material = KeyMaterial::from_base64(encoded)
            .map_err(|e| CustodyError::InvalidData(e.to_string()))?;
        if material.len() != KEY_SIZE {
            return Err(CustodyError::InvalidData(format!(
                "imported master key is {} bytes, expected {KEY_SIZE}",
                material.len()
            ))
            .into());
        }
        self.save(&KeyIdentifier::Master, &material, policy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CryptoError, DefaultCrypto, PublicKey};
    use crate::error::ParleyError;

    fn custody(user: &str) -> KeyCustody {
        KeyCustody::new(
            Arc::new(MemoryVault::new()),
            Arc::new(DefaultCrypto),
            user,
        )
    }

    /// Provider whose symmetric keys are a fixed byte pattern.
    struct FixedCrypto([u8; KEY_SIZE]);

    impl CryptoProvider for FixedCrypto {
        fn generate_symmetric_key(&self) -> std::result::Result<KeyMaterial, CryptoError> {
            Ok(KeyMaterial::new(self.0.to_vec()))
        }

        fn encrypt(
            &self,
            plaintext: &[u8],
            key: &KeyMaterial,
        ) -> std::result::Result<Vec<u8>, CryptoError> {
            DefaultCrypto.encrypt(plaintext, key)
        }

        fn decrypt(
            &self,
            blob: &[u8],
            key: &KeyMaterial,
        ) -> std::result::Result<Vec<u8>, CryptoError> {
            DefaultCrypto.decrypt(blob, key)
        }

        fn generate_key_pair(&self) -> std::result::Result<KeyPair, CryptoError> {
            DefaultCrypto.generate_key_pair()
        }

        fn derive_shared_key(
            &self,
            ours: &KeyPair,
            theirs: &PublicKey,
        ) -> std::result::Result<KeyMaterial, CryptoError> {
            DefaultCrypto.derive_shared_key(ours, theirs)
        }
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let custody = custody("alice");
        let key = KeyMaterial::new(vec![7u8; KEY_SIZE]);

        custody
            .save(&KeyIdentifier::Master, &key, SyncPolicy::Synchronized)
            .await
            .unwrap();

        let loaded = custody.load(&KeyIdentifier::Master).await.unwrap();
        assert_eq!(loaded.as_bytes(), key.as_bytes());
    }

    #[tokio::test]
    async fn test_load_missing_key_fails() {
        let custody = custody("alice");
        let err = custody.load(&KeyIdentifier::Upload).await.unwrap_err();
        assert!(matches!(
            err,
            ParleyError::Custody(CustodyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_requires_existing_key() {
        let custody = custody("alice");
        let key = KeyMaterial::new(vec![1u8; KEY_SIZE]);

        let err = custody
            .update(&KeyIdentifier::Master, &key, SyncPolicy::DeviceLocal)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ParleyError::Custody(CustodyError::NotFound(_))
        ));

        custody
            .save(&KeyIdentifier::Master, &key, SyncPolicy::DeviceLocal)
            .await
            .unwrap();
        let replacement = KeyMaterial::new(vec![2u8; KEY_SIZE]);
        custody
            .update(&KeyIdentifier::Master, &replacement, SyncPolicy::DeviceLocal)
            .await
            .unwrap();

        let loaded = custody.load(&KeyIdentifier::Master).await.unwrap();
        assert_eq!(loaded.as_bytes(), replacement.as_bytes());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let custody = custody("alice");
        custody.delete(&KeyIdentifier::Master).await.unwrap();

        let key = KeyMaterial::new(vec![1u8; KEY_SIZE]);
        custody
            .save(&KeyIdentifier::Master, &key, SyncPolicy::DeviceLocal)
            .await
            .unwrap();
        custody.delete(&KeyIdentifier::Master).await.unwrap();
        custody.delete(&KeyIdentifier::Master).await.unwrap();

        assert!(!custody.exists(&KeyIdentifier::Master).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_or_generate_is_stable() {
        let custody = custody("alice");

        let first = custody
            .load_or_generate_symmetric(&KeyIdentifier::Master, SyncPolicy::Synchronized)
            .await
            .unwrap();
        let second = custody
            .load_or_generate_symmetric(&KeyIdentifier::Master, SyncPolicy::Synchronized)
            .await
            .unwrap();

        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(first.len(), KEY_SIZE);
    }

    #[tokio::test]
    async fn test_symmetric_generation_uses_the_provider() {
        let vault = Arc::new(MemoryVault::new());
        let scripted = [9u8; KEY_SIZE];
        let custody = KeyCustody::new(vault.clone(), Arc::new(FixedCrypto(scripted)), "alice");

        let key = custody
            .load_or_generate_symmetric(&KeyIdentifier::Master, SyncPolicy::DeviceLocal)
            .await
            .unwrap();

        assert_eq!(key.as_bytes(), scripted);
        let stored = vault.get("parley/v1/alice/master").await.unwrap().unwrap();
        assert_eq!(stored, scripted);
    }

    #[tokio::test]
    async fn test_load_or_generate_rejects_corrupt_entry() {
        let vault = Arc::new(MemoryVault::new());
        let custody = KeyCustody::new(vault.clone(), Arc::new(DefaultCrypto), "alice");

        // Write garbage straight into the vault, bypassing custody
        vault
            .put("parley/v1/alice/master", &[1, 2, 3], SyncPolicy::DeviceLocal)
            .await
            .unwrap();

        let err = custody
            .load_or_generate_symmetric(&KeyIdentifier::Master, SyncPolicy::DeviceLocal)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ParleyError::Custody(CustodyError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_key_pair_persists_across_loads() {
        let custody = custody("alice");

        let first = custody
            .load_or_generate_key_pair(SyncPolicy::DeviceLocal)
            .await
            .unwrap();
        let second = custody
            .load_or_generate_key_pair(SyncPolicy::DeviceLocal)
            .await
            .unwrap();

        assert_eq!(
            first.public_key().as_bytes(),
            second.public_key().as_bytes()
        );
    }

    #[tokio::test]
    async fn test_rotate_changes_key() {
        let custody = custody("alice");

        let original = custody
            .load_or_generate_symmetric(&KeyIdentifier::Upload, SyncPolicy::DeviceLocal)
            .await
            .unwrap();
        let rotated = custody
            .rotate_symmetric(&KeyIdentifier::Upload, SyncPolicy::DeviceLocal)
            .await
            .unwrap();

        assert_ne!(original.as_bytes(), rotated.as_bytes());

        let loaded = custody.load(&KeyIdentifier::Upload).await.unwrap();
        assert_eq!(loaded.as_bytes(), rotated.as_bytes());
    }

    #[tokio::test]
    async fn test_export_import_master_between_devices() {
        let phone = custody("alice");
        let laptop = custody("alice");

        let master = phone
            .load_or_generate_symmetric(&KeyIdentifier::Master, SyncPolicy::Synchronized)
            .await
            .unwrap();

        let exported = phone.export_master().await.unwrap();
        laptop
            .import_master(&exported, SyncPolicy::Synchronized)
            .await
            .unwrap();

        let imported = laptop.load(&KeyIdentifier::Master).await.unwrap();
        assert_eq!(imported.as_bytes(), master.as_bytes());
    }

    #[tokio::test]
    async fn test_import_rejects_wrong_length() {
        let custody = custody("alice");
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let short = STANDARD.encode([0u8; 16]);

        let err = custody
            .import_master(&short, SyncPolicy::DeviceLocal)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ParleyError::Custody(CustodyError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let vault = Arc::new(MemoryVault::new());
        let alice = KeyCustody::new(vault.clone(), Arc::new(DefaultCrypto), "alice");
        let bob = KeyCustody::new(vault, Arc::new(DefaultCrypto), "bob");

        let alice_key = alice
            .load_or_generate_symmetric(&KeyIdentifier::Master, SyncPolicy::DeviceLocal)
            .await
            .unwrap();
        let bob_key = bob
            .load_or_generate_symmetric(&KeyIdentifier::Master, SyncPolicy::DeviceLocal)
            .await
            .unwrap();

        assert_ne!(alice_key.as_bytes(), bob_key.as_bytes());
    }

    #[tokio::test]
    async fn test_concurrent_generation_yields_one_key() {
        let custody = Arc::new(custody("alice"));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let custody = custody.clone();
            handles.push(tokio::spawn(async move {
                custody
                    .load_or_generate_symmetric(&KeyIdentifier::Master, SyncPolicy::DeviceLocal)
                    .await
                    .unwrap()
            }));
        }

        let mut keys = Vec::new();
        for handle in handles {
            keys.push(handle.await.unwrap());
        }

        let first = keys[0].as_bytes().to_vec();
        for key in &keys {
            assert_eq!(key.as_bytes(), first.as_slice());
        }
    }
}

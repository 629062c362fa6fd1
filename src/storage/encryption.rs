//! Encryption Manager
//!
//! Encrypt/decrypt transform applied to every persisted value, backed by a
//! key held in a [`KeyStore`].

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::{ExposeSecret, SecretVec};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, instrument};

use crate::error::PersistenceError;

const BLOB_VERSION: u8 = 1;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

/// Encryption capability used by the persisted store.
pub trait EncryptionManager: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, PersistenceError>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, PersistenceError>;

    /// Whether the key never leaves a secure element.
    fn is_hardware_backed(&self) -> bool;

    /// Whether the device is currently unlocked for key use.
    fn is_user_authenticated_on_device(&self) -> bool {
        true
    }
}

/// Holder of raw key material.
pub trait KeyStore: Send + Sync {
    fn load_key(&self, alias: &str) -> Result<Option<SecretVec<u8>>, PersistenceError>;

    fn store_key(&self, alias: &str, key: SecretVec<u8>) -> Result<(), PersistenceError>;

    fn delete_key(&self, alias: &str) -> Result<(), PersistenceError>;

    fn is_hardware_backed(&self) -> bool;

    fn is_unlocked(&self) -> bool {
        true
    }
}

/// In-process key store.
///
/// Can be locked to simulate a device whose keystore requires user presence.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: Mutex<HashMap<String, SecretVec<u8>>>,
    locked: AtomicBool,
    hardware_backed: bool,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key store that reports itself as hardware-backed.
    pub fn hardware_backed() -> Self {
        Self {
            hardware_backed: true,
            ..Self::default()
        }
    }

    pub fn lock_device(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    pub fn unlock_device(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    fn check_unlocked(&self) -> Result<(), PersistenceError> {
        if self.locked.load(Ordering::SeqCst) {
            return Err(PersistenceError::UserNotAuthenticated);
        }
        Ok(())
    }
}

impl KeyStore for InMemoryKeyStore {
    fn load_key(&self, alias: &str) -> Result<Option<SecretVec<u8>>, PersistenceError> {
        self.check_unlocked()?;
        let keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(keys
            .get(alias)
            .map(|key| SecretVec::new(key.expose_secret().clone())))
    }

    fn store_key(&self, alias: &str, key: SecretVec<u8>) -> Result<(), PersistenceError> {
        self.check_unlocked()?;
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(alias.to_string(), key);
        Ok(())
    }

    fn delete_key(&self, alias: &str) -> Result<(), PersistenceError> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(alias);
        Ok(())
    }

    fn is_hardware_backed(&self) -> bool {
        self.hardware_backed
    }

    fn is_unlocked(&self) -> bool {
        !self.locked.load(Ordering::SeqCst)
    }
}

/// AES-256-GCM encryption manager.
///
/// Blob layout: `version (1) || nonce (12) || ciphertext || tag (16)`. The key
/// is fetched from the key store for every operation and generated on first
/// encryption.
pub struct AesGcmEncryptionManager {
    keystore: Arc<dyn KeyStore>,
    alias: String,
    rng: SystemRandom,
}

impl AesGcmEncryptionManager {
    pub fn new(keystore: Arc<dyn KeyStore>, alias: impl Into<String>) -> Self {
        Self {
            keystore,
            alias: alias.into(),
            rng: SystemRandom::new(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Replace the key. Values encrypted under the old key no longer decrypt.
    pub fn recreate_key(&self) -> Result<(), PersistenceError> {
        self.keystore.delete_key(&self.alias)?;
        self.generate_key()?;
        debug!(alias = %self.alias, "Encryption key recreated");
        Ok(())
    }

    fn generate_key(&self) -> Result<SecretVec<u8>, PersistenceError> {
        let mut bytes = vec![0u8; KEY_LEN];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| PersistenceError::EncryptionFailed {
                message: "random key generation failed".to_string(),
            })?;
        self.keystore
            .store_key(&self.alias, SecretVec::new(bytes.clone()))?;
        Ok(SecretVec::new(bytes))
    }

    fn sealing_key(&self, create: bool) -> Result<LessSafeKey, PersistenceError> {
        let secret = match self.keystore.load_key(&self.alias)? {
            Some(secret) => secret,
            None if create => self.generate_key()?,
            None => {
                return Err(PersistenceError::KeyUnavailable {
                    alias: self.alias.clone(),
                })
            }
        };

        let unbound = UnboundKey::new(&AES_256_GCM, secret.expose_secret()).map_err(|_| {
            PersistenceError::KeyUnavailable {
                alias: self.alias.clone(),
            }
        })?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl EncryptionManager for AesGcmEncryptionManager {
    #[instrument(level = "debug", skip_all, fields(alias = %self.alias))]
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, PersistenceError> {
        let key = self.sealing_key(true)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| PersistenceError::EncryptionFailed {
                message: "nonce generation failed".to_string(),
            })?;

        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| PersistenceError::EncryptionFailed {
            message: "AES-GCM seal failed".to_string(),
        })?;

        let mut blob = Vec::with_capacity(1 + NONCE_LEN + in_out.len());
        blob.push(BLOB_VERSION);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&in_out);
        Ok(blob)
    }

    #[instrument(level = "debug", skip_all, fields(alias = %self.alias))]
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, PersistenceError> {
        if ciphertext.len() < 1 + NONCE_LEN + TAG_LEN {
            return Err(PersistenceError::DecryptionFailed {
                message: "ciphertext too short".to_string(),
            });
        }
        if ciphertext[0] != BLOB_VERSION {
            return Err(PersistenceError::DecryptionFailed {
                message: format!("unsupported blob version {}", ciphertext[0]),
            });
        }

        let key = self.sealing_key(false)?;
        let nonce = Nonce::try_assume_unique_for_key(&ciphertext[1..1 + NONCE_LEN]).map_err(
            |_| PersistenceError::DecryptionFailed {
                message: "invalid nonce".to_string(),
            },
        )?;

        let mut in_out = ciphertext[1 + NONCE_LEN..].to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| PersistenceError::DecryptionFailed {
                message: "authentication tag mismatch".to_string(),
            })?;
        Ok(plaintext.to_vec())
    }

    fn is_hardware_backed(&self) -> bool {
        self.keystore.is_hardware_backed()
    }

    fn is_user_authenticated_on_device(&self) -> bool {
        self.keystore.is_unlocked()
    }
}

impl std::fmt::Debug for AesGcmEncryptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmEncryptionManager")
            .field("alias", &self.alias)
            .field("hardware_backed", &self.is_hardware_backed())
            .finish()
    }
}

/// Create a software AES-GCM manager with its own in-memory key store.
pub fn create_software_encryption_manager(alias: &str) -> AesGcmEncryptionManager {
    AesGcmEncryptionManager::new(Arc::new(InMemoryKeyStore::new()), alias)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let manager = create_software_encryption_manager("session");
        let blob = manager.encrypt(b"token material").unwrap();

        assert_eq!(blob[0], BLOB_VERSION);
        assert_ne!(&blob[1 + NONCE_LEN..], b"token material");
        assert_eq!(manager.decrypt(&blob).unwrap(), b"token material".to_vec());
    }

    #[test]
    fn test_nonce_differs_per_encryption() {
        let manager = create_software_encryption_manager("session");
        let a = manager.encrypt(b"same").unwrap();
        let b = manager.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_decrypt_with_other_key_fails() {
        let first = create_software_encryption_manager("session");
        let second = create_software_encryption_manager("session");
        second.encrypt(b"init").unwrap();

        let blob = first.encrypt(b"secret").unwrap();
        assert!(matches!(
            second.decrypt(&blob),
            Err(PersistenceError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn test_corrupted_ciphertext_fails() {
        let manager = create_software_encryption_manager("session");
        let mut blob = manager.encrypt(b"secret").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;

        assert!(matches!(
            manager.decrypt(&blob),
            Err(PersistenceError::DecryptionFailed { .. })
        ));
        assert!(manager.decrypt(&[BLOB_VERSION, 1, 2]).is_err());
    }

    #[test]
    fn test_recreate_key_invalidates_ciphertexts() {
        let manager = create_software_encryption_manager("session");
        let blob = manager.encrypt(b"secret").unwrap();

        manager.recreate_key().unwrap();
        assert!(matches!(
            manager.decrypt(&blob),
            Err(PersistenceError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn test_decrypt_without_key() {
        let encrypting = create_software_encryption_manager("a");
        let blob = encrypting.encrypt(b"secret").unwrap();

        let empty = create_software_encryption_manager("a");
        assert!(matches!(
            empty.decrypt(&blob),
            Err(PersistenceError::KeyUnavailable { .. })
        ));
    }

    #[test]
    fn test_locked_device_requires_user_presence() {
        let keystore = Arc::new(InMemoryKeyStore::hardware_backed());
        let manager = AesGcmEncryptionManager::new(keystore.clone(), "session");
        let blob = manager.encrypt(b"secret").unwrap();
        assert!(manager.is_hardware_backed());

        keystore.lock_device();
        assert!(!manager.is_user_authenticated_on_device());
        assert!(matches!(
            manager.decrypt(&blob),
            Err(PersistenceError::UserNotAuthenticated)
        ));

        keystore.unlock_device();
        assert_eq!(manager.decrypt(&blob).unwrap(), b"secret".to_vec());
    }
}

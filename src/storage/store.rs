//! Persisted State Store
//!
//! Typed entities over a [`KeyValueStorage`], with every value passed through
//! the active [`EncryptionManager`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::error::PersistenceError;
use crate::storage::{EncryptionManager, KeyValueStorage};
use crate::types::{ProviderConfiguration, TokenResponse, WebRequest};

/// Entity stored under a fixed key.
pub trait Persistable: Serialize + DeserializeOwned {
    const KEY: &'static str;
}

impl Persistable for ProviderConfiguration {
    const KEY: &'static str = "provider_configuration";
}

impl Persistable for TokenResponse {
    const KEY: &'static str = "token_response";
}

impl Persistable for WebRequest {
    const KEY: &'static str = "web_request";
}

/// Every key the session persists.
pub const PERSISTED_KEYS: [&str; 3] = [
    ProviderConfiguration::KEY,
    TokenResponse::KEY,
    WebRequest::KEY,
];

/// Store of session entities.
pub struct PersistedStore {
    storage: Arc<dyn KeyValueStorage>,
    encryption: Option<Arc<dyn EncryptionManager>>,
    /// Decrypted plaintext per key, when cache mode is on.
    cache: Option<Mutex<HashMap<&'static str, Vec<u8>>>>,
}

impl PersistedStore {
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        encryption: Option<Arc<dyn EncryptionManager>>,
    ) -> Self {
        Self {
            storage,
            encryption,
            cache: None,
        }
    }

    /// Keep decrypted values in memory so repeated reads skip decryption.
    pub fn with_cache_mode(mut self, enabled: bool) -> Self {
        self.cache = enabled.then(|| Mutex::new(HashMap::new()));
        self
    }

    pub fn storage(&self) -> &Arc<dyn KeyValueStorage> {
        &self.storage
    }

    pub fn encryption_manager(&self) -> Option<&Arc<dyn EncryptionManager>> {
        self.encryption.as_ref()
    }

    /// Swap the active encryption manager.
    ///
    /// Values already stored are not re-encrypted; callers migrate them.
    pub fn set_encryption_manager(&mut self, manager: Option<Arc<dyn EncryptionManager>>) {
        self.encryption = manager;
    }

    /// Serialize, encrypt and write an entity.
    pub fn save<T: Persistable>(&self, entity: &T) -> Result<(), PersistenceError> {
        let plaintext = serde_json::to_vec(entity).map_err(|source| {
            PersistenceError::Serialization {
                key: T::KEY.to_string(),
                source,
            }
        })?;

        let stored = match &self.encryption {
            Some(manager) => manager.encrypt(&plaintext)?,
            None => plaintext.clone(),
        };
        self.storage.set(T::KEY, &stored)?;

        if let Some(cache) = &self.cache {
            lock(cache).insert(T::KEY, plaintext);
        }
        debug!(key = T::KEY, "Entity saved");
        Ok(())
    }

    /// Read an entity. `Ok(None)` when nothing is stored under its key.
    pub fn get<T: Persistable>(&self) -> Result<Option<T>, PersistenceError> {
        let cached = self
            .cache
            .as_ref()
            .and_then(|cache| lock(cache).get(T::KEY).cloned());

        let plaintext = match cached {
            Some(plaintext) => plaintext,
            None => {
                let stored = match self.storage.get(T::KEY)? {
                    Some(stored) => stored,
                    None => return Ok(None),
                };
                let plaintext = match &self.encryption {
                    Some(manager) => manager.decrypt(&stored)?,
                    None => stored,
                };
                if let Some(cache) = &self.cache {
                    lock(cache).insert(T::KEY, plaintext.clone());
                }
                plaintext
            }
        };

        serde_json::from_slice(&plaintext)
            .map(Some)
            .map_err(|source| PersistenceError::Serialization {
                key: T::KEY.to_string(),
                source,
            })
    }

    /// Delete whatever is stored under `key`.
    pub fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        if let Some(cache) = &self.cache {
            lock(cache).remove(key);
        }
        self.storage.delete(key)?;
        debug!(key, "Entity deleted");
        Ok(())
    }

    /// Whether a value is stored under `key`, without decrypting it.
    pub fn contains(&self, key: &str) -> Result<bool, PersistenceError> {
        if let Some(cache) = &self.cache {
            if lock(cache).contains_key(key) {
                return Ok(true);
            }
        }
        Ok(self.storage.get(key)?.is_some())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

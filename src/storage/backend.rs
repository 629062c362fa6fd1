//! Storage Backends
//!
//! Byte-oriented key/value storage consumed by the persisted store.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use base64::Engine;

use crate::error::PersistenceError;

/// Key/value storage interface.
pub trait KeyValueStorage: Send + Sync {
    /// Read the value for a key. `Ok(None)` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Write the value for a key.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError>;

    /// Delete a key. Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> Result<(), PersistenceError>;

    /// Whether values written here must be encrypted with a hardware-backed key.
    fn require_hardware_backed_keystore(&self) -> bool {
        false
    }
}

/// In-memory storage implementation.
#[derive(Default)]
pub struct InMemoryStorage {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    /// Create new in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for InMemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError> {
        lock(&self.values).insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

/// File-backed storage: one file per key inside a directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Use `dir` as the storage directory. It is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(key.as_bytes());
        self.dir.join(name)
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::ReadFailed {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError> {
        let write_failed = |e: std::io::Error| PersistenceError::WriteFailed {
            key: key.to_string(),
            message: e.to_string(),
        };

        std::fs::create_dir_all(&self.dir).map_err(write_failed)?;

        // Write to a sibling file first so a crash never leaves a torn value.
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, value).map_err(write_failed)?;
        std::fs::rename(&tmp, &path).map_err(write_failed)
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::DeleteFailed {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Storage operation, for [`MockStorage`] failure injection and history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageOp {
    Get,
    Set,
    Delete,
}

/// Mock storage for testing.
#[derive(Default)]
pub struct MockStorage {
    values: Mutex<HashMap<String, Vec<u8>>>,
    history: Mutex<Vec<(StorageOp, String)>>,
    failures: Mutex<Vec<(StorageOp, String)>>,
    unavailable: Mutex<bool>,
    require_hardware_backed_keystore: bool,
}

impl MockStorage {
    /// Create new mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock storage that demands a hardware-backed keystore.
    pub fn requiring_hardware_keystore() -> Self {
        Self {
            require_hardware_backed_keystore: true,
            ..Self::default()
        }
    }

    /// Fail every `op` on `key` until cleared.
    pub fn fail_on(&self, op: StorageOp, key: &str) -> &Self {
        lock(&self.failures).push((op, key.to_string()));
        self
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) -> &Self {
        lock(&self.failures).clear();
        *lock(&self.unavailable) = false;
        self
    }

    /// Fail every operation.
    pub fn set_unavailable(&self, unavailable: bool) -> &Self {
        *lock(&self.unavailable) = unavailable;
        self
    }

    /// Raw stored bytes, bypassing history and failures.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.values).get(key).cloned()
    }

    /// Get operation history.
    pub fn get_history(&self) -> Vec<(StorageOp, String)> {
        lock(&self.history).clone()
    }

    /// Keys passed to `delete`, in call order.
    pub fn get_delete_history(&self) -> Vec<String> {
        lock(&self.history)
            .iter()
            .filter(|(op, _)| *op == StorageOp::Delete)
            .map(|(_, key)| key.clone())
            .collect()
    }

    fn check_error(&self, op: StorageOp, key: &str) -> Result<(), PersistenceError> {
        lock(&self.history).push((op, key.to_string()));

        if *lock(&self.unavailable) {
            return Err(PersistenceError::StorageUnavailable {
                message: "Mock storage failure".to_string(),
            });
        }

        let injected = lock(&self.failures)
            .iter()
            .any(|(failing_op, failing_key)| *failing_op == op && failing_key == key);
        if !injected {
            return Ok(());
        }

        let message = "Mock storage failure".to_string();
        let key = key.to_string();
        Err(match op {
            StorageOp::Get => PersistenceError::ReadFailed { key, message },
            StorageOp::Set => PersistenceError::WriteFailed { key, message },
            StorageOp::Delete => PersistenceError::DeleteFailed { key, message },
        })
    }
}

impl KeyValueStorage for MockStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        self.check_error(StorageOp::Get, key)?;
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError> {
        self.check_error(StorageOp::Set, key)?;
        lock(&self.values).insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        self.check_error(StorageOp::Delete, key)?;
        lock(&self.values).remove(key);
        Ok(())
    }

    fn require_hardware_backed_keystore(&self) -> bool {
        self.require_hardware_backed_keystore
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create in-memory storage.
pub fn create_in_memory_storage() -> InMemoryStorage {
    InMemoryStorage::new()
}

/// Create mock storage for testing.
pub fn create_mock_storage() -> MockStorage {
    MockStorage::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_set_get_delete() {
        let storage = create_in_memory_storage();
        assert_eq!(storage.get("k").unwrap(), None);

        storage.set("k", b"value").unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(b"value".to_vec()));

        storage.delete("k").unwrap();
        storage.delete("k").unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
        assert!(!storage.require_hardware_backed_keystore());
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        let storage = FileStorage::new(dir.path().join("session"));
        assert_eq!(storage.get("token_response").unwrap(), None);
        storage.set("token_response", b"\x00\x01secret").unwrap();

        let reopened = FileStorage::new(dir.path().join("session"));
        assert_eq!(
            reopened.get("token_response").unwrap(),
            Some(b"\x00\x01secret".to_vec())
        );

        reopened.delete("token_response").unwrap();
        reopened.delete("token_response").unwrap();
        assert_eq!(storage.get("token_response").unwrap(), None);
    }

    #[test]
    fn test_file_storage_read_error_is_not_absence() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        // A directory where the value file should be makes the read fail.
        std::fs::create_dir(storage.path_for("k")).unwrap();
        assert!(matches!(
            storage.get("k"),
            Err(PersistenceError::ReadFailed { .. })
        ));
    }

    #[test]
    fn test_mock_storage_history() {
        let storage = create_mock_storage();
        storage.set("a", b"1").unwrap();
        storage.get("a").unwrap();
        storage.delete("a").unwrap();

        assert_eq!(
            storage.get_history(),
            vec![
                (StorageOp::Set, "a".to_string()),
                (StorageOp::Get, "a".to_string()),
                (StorageOp::Delete, "a".to_string()),
            ]
        );
        assert_eq!(storage.get_delete_history(), vec!["a".to_string()]);
    }

    #[test]
    fn test_mock_storage_injected_failure() {
        let storage = create_mock_storage();
        storage.set("a", b"1").unwrap();
        storage.fail_on(StorageOp::Delete, "a");

        assert!(matches!(
            storage.delete("a"),
            Err(PersistenceError::DeleteFailed { key, .. }) if key == "a"
        ));
        assert_eq!(storage.raw("a"), Some(b"1".to_vec()));

        storage.clear_failures();
        storage.delete("a").unwrap();
        assert_eq!(storage.raw("a"), None);
    }

    #[test]
    fn test_mock_storage_unavailable() {
        let storage = MockStorage::requiring_hardware_keystore();
        storage.set_unavailable(true);

        assert!(matches!(
            storage.get("a"),
            Err(PersistenceError::StorageUnavailable { .. })
        ));
        assert!(storage.require_hardware_backed_keystore());
    }
}

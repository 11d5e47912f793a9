//! Durable key-value storage backends
//!
//! The engagement index is the only consumer. Browser builds use
//! `window.localStorage`; native builds and tests use [`MemoryStore`].

use std::collections::BTreeMap;

use crate::error::StorageError;

/// Minimal string key-value store with fallible operations.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Box<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory store. Optionally rejects values above a per-key byte limit,
/// mirroring browser quota behaviour.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
    max_value_bytes: Option<usize>,
    write_count: u64,
    fail_writes: bool,
    fail_removes: bool,
    fail_reads: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any value larger than `bytes`.
    pub fn with_value_limit(bytes: usize) -> Self {
        Self {
            max_value_bytes: Some(bytes),
            ..Self::default()
        }
    }

    /// Make every write fail (used to exercise error paths).
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Make `remove` fail while `set` keeps working.
    pub fn set_fail_removes(&mut self, fail: bool) {
        self.fail_removes = fail;
    }

    /// Make every read fail.
    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Number of successful `set` calls.
    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads {
            return Err(StorageError::Unavailable("reads disabled".into()));
        }
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::Unavailable("writes disabled".into()));
        }
        if let Some(limit) = self.max_value_bytes {
            if value.len() > limit {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    bytes: value.len(),
                });
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        self.write_count += 1;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        if self.fail_writes || self.fail_removes {
            return Err(StorageError::Unavailable("writes disabled".into()));
        }
        self.entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// Browser localStorage
// ============================================================================

/// `window.localStorage` backend.
#[cfg(target_arch = "wasm32")]
pub struct LocalStorageStore {
    storage: web_sys::Storage,
}

#[cfg(target_arch = "wasm32")]
impl LocalStorageStore {
    /// Open the window's local storage.
    pub fn open() -> Result<Self, StorageError> {
        let window = web_sys::window()
            .ok_or_else(|| StorageError::Unavailable("no window".into()))?;
        let storage = window
            .local_storage()
            .map_err(|e| StorageError::Backend(format!("{:?}", e)))?
            .ok_or_else(|| StorageError::Unavailable("localStorage disabled".into()))?;
        Ok(Self { storage })
    }
}

#[cfg(target_arch = "wasm32")]
impl KeyValueStore for LocalStorageStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage
            .get_item(key)
            .map_err(|e| StorageError::Backend(format!("{:?}", e)))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        // Browsers throw QuotaExceededError when the origin budget is spent
        self.storage
            .set_item(key, value)
            .map_err(|_| StorageError::QuotaExceeded {
                key: key.to_string(),
                bytes: value.len(),
            })
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.storage
            .remove_item(key)
            .map_err(|e| StorageError::Backend(format!("{:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_basic_ops() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.write_count(), 1);

        store.remove("a").unwrap();
        assert!(store.is_empty());
        // Removing a missing key is not an error
        store.remove("a").unwrap();
    }

    #[test]
    fn test_memory_store_value_limit() {
        let mut store = MemoryStore::with_value_limit(4);
        store.set("ok", "1234").unwrap();
        let err = store.set("big", "12345").unwrap_err();
        assert_eq!(
            err,
            StorageError::QuotaExceeded {
                key: "big".into(),
                bytes: 5
            }
        );
        assert!(!store.contains_key("big"));
    }

    #[test]
    fn test_memory_store_injected_failures() {
        let mut store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.set("a", "1").is_err());
        store.set_fail_writes(false);
        store.set("a", "1").unwrap();

        store.set_fail_reads(true);
        assert!(store.get("a").is_err());
    }

    #[test]
    fn test_boxed_store_delegates() {
        let mut store: Box<dyn KeyValueStore> = Box::new(MemoryStore::new());
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }
}

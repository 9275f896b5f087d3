use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::StoreError;

/// Storage for theoretical arrival times, one timestamp per key.
///
/// Implementations must tolerate concurrent calls for distinct keys.
/// Calls for the same key are not serialized by this interface: two requests
/// racing on one key may both read the old TAT and both admit. A backend may
/// tighten that with an atomic read-modify-write, but is not required to.
#[async_trait]
pub trait TatStore: Send + Sync + std::fmt::Debug {
    /// Acquire backend resources. Called once when serving starts.
    async fn open(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Return the stored TAT for `key`, or `default` when the key is unseen.
    async fn get(&self, key: &str, default: SystemTime) -> Result<SystemTime, StoreError>;

    /// Persist `tat` for `key`, overwriting any prior value.
    async fn set(&self, key: &str, tat: SystemTime) -> Result<(), StoreError>;

    /// Release backend resources. Called once when serving stops.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl<T: TatStore + ?Sized> TatStore for Arc<T> {
    async fn open(&self) -> Result<(), StoreError> {
        (**self).open().await
    }

    async fn get(&self, key: &str, default: SystemTime) -> Result<SystemTime, StoreError> {
        (**self).get(key, default).await
    }

    async fn set(&self, key: &str, tat: SystemTime) -> Result<(), StoreError> {
        (**self).set(key, tat).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        (**self).close().await
    }
}

/// Process-local store. Entries are never evicted.
#[derive(Default, Clone, Debug)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, SystemTime>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a stored TAT.
    pub fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TatStore for MemoryStore {
    async fn get(&self, key: &str, default: SystemTime) -> Result<SystemTime, StoreError> {
        let guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(key).copied().unwrap_or(default))
    }

    async fn set(&self, key: &str, tat: SystemTime) -> Result<(), StoreError> {
        let mut guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        guard.insert(key.to_string(), tat);
        Ok(())
    }
}

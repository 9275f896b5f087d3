//! Live-updatable configuration handles.
//!
//! The limiter reads its global enable flag on every request, so reads go
//! through `ArcSwap` and never take a lock. Feature `adaptive-rwlock` swaps
//! in a `RwLock` backend.

use std::sync::Arc;

#[cfg(feature = "adaptive-rwlock")]
use std::sync::{PoisonError, RwLock};

#[cfg(not(feature = "adaptive-rwlock"))]
use arc_swap::ArcSwap;

/// Shared, cheaply cloned handle to a value that can change at runtime.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    #[cfg(not(feature = "adaptive-rwlock"))]
    inner: Arc<ArcSwap<T>>,
    #[cfg(feature = "adaptive-rwlock")]
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Default> Default for DynamicConfig<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> DynamicConfig<T> {
    pub fn new(value: T) -> Self {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            Self { inner: Arc::new(RwLock::new(value)) }
        }
    }

    /// Snapshot the current value.
    #[cfg(not(feature = "adaptive-rwlock"))]
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Snapshot the current value.
    #[cfg(feature = "adaptive-rwlock")]
    pub fn get(&self) -> Arc<T>
    where
        T: Clone,
    {
        Arc::new(self.inner.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Replace the value; every clone of this handle observes it.
    pub fn set(&self, value: T) {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.store(Arc::new(value));
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            *self.inner.write().unwrap_or_else(PoisonError::into_inner) = value;
        }
    }
}

impl DynamicConfig<bool> {
    /// Read a boolean flag without cloning the `Arc`.
    pub fn is_set(&self) -> bool {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            **self.inner.load()
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            *self.inner.read().unwrap_or_else(PoisonError::into_inner)
        }
    }
}

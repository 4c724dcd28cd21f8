//! Per-fingerprint async mutexes.

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use {
    dashmap::DashMap,
    tokio::sync::{Mutex, OwnedMutexGuard},
};

type LockMap<T> = DashMap<String, Arc<Mutex<T>>>;

/// Serializes work per key while unrelated keys proceed in parallel.
///
/// Each key carries a slot of type `T` that holders can read and write. The
/// entry, slot included, is dropped when the last holder or waiter releases,
/// so the map only ever contains keys that are locked or awaited and a slot
/// only hands values between callers that overlapped.
#[derive(Debug)]
pub struct KeyedLocks<T = ()> {
    inner: Arc<LockMap<T>>,
}

impl<T> Clone for KeyedLocks<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for KeyedLocks<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }
}

impl<T: Default> KeyedLocks<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard<T> {
        let mutex = Arc::clone(self.inner.entry(key.to_string()).or_default().value());
        let guard = mutex.lock_owned().await;
        KeyGuard {
            key: key.to_string(),
            map: Arc::clone(&self.inner),
            guard,
        }
    }
}

impl<T> KeyedLocks<T> {
    /// Keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Held lock for one key; releases on drop. Derefs to the key's slot.
pub struct KeyGuard<T = ()> {
    key: String,
    map: Arc<LockMap<T>>,
    guard: OwnedMutexGuard<T>,
}

impl<T> KeyGuard<T> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<T> Deref for KeyGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for KeyGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for KeyGuard<T> {
    fn drop(&mut self) {
        // Map entry + this guard; anyone else waiting holds a third reference.
        let mutex = OwnedMutexGuard::mutex(&self.guard);
        self.map
            .remove_if(&self.key, |_, m| Arc::ptr_eq(m, mutex) && Arc::strong_count(m) == 2);
    }
}

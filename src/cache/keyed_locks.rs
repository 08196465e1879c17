use crate::content_key::ContentKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-key async mutexes
///
/// Holding the guard for a key excludes other holders of the same key only.
/// Entries are dropped once no guard or waiter references them.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<ContentKey, Weak<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &ContentKey) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, weak| weak.strong_count() > 0);

            if let Some(existing) = locks.get(key).and_then(Weak::upgrade) {
                existing
            } else {
                let mutex = Arc::new(AsyncMutex::new(()));
                locks.insert(key.clone(), Arc::downgrade(&mutex));
                mutex
            }
        };
        mutex.lock_owned().await
    }

    /// Number of keys currently locked or waited on
    #[must_use]
    pub fn active_keys(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

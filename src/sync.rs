//! Reference-counted keyed mutex.
//!
//! Serializes mutations per key (per-JID in practice) without one global
//! lock. Entries are created on first use and dropped when the last holder
//! or waiter releases them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const SHARDS: usize = 16;

struct Entry {
    lock: Arc<AsyncMutex<()>>,
    refs: usize,
}

/// Map of independently lockable keys.
pub struct KeyedMutex {
    shards: Arc<Vec<Mutex<HashMap<String, Entry>>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        let shards = (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect();
        Self {
            shards: Arc::new(shards),
        }
    }

    fn shard_for(&self, key: &str) -> usize {
        use std::hash::{DefaultHasher, Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % SHARDS
    }

    /// Acquire the lock for `key`, waiting behind other holders of the same
    /// key. Other keys are unaffected.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let shard_index = self.shard_for(key);
        let lock = {
            let mut shard = self.shards[shard_index].lock().unwrap();
            let entry = shard.entry(key.to_string()).or_insert_with(|| Entry {
                lock: Arc::new(AsyncMutex::new(())),
                refs: 0,
            });
            entry.refs += 1;
            entry.lock.clone()
        };

        let permit = lock.lock_owned().await;
        KeyedGuard {
            shards: self.shards.clone(),
            shard_index,
            key: key.to_string(),
            permit: Some(permit),
        }
    }

    /// Number of live entries, counting holders and waiters.
    pub fn entry_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().len()).sum()
    }
}

impl Default for KeyedMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the per-key lock until dropped.
pub struct KeyedGuard {
    shards: Arc<Vec<Mutex<HashMap<String, Entry>>>>,
    shard_index: usize,
    key: String,
    permit: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.permit.take();
        let mut shard = self.shards[self.shard_index].lock().unwrap();
        if let Some(entry) = shard.get_mut(&self.key) {
            entry.refs -= 1;
            if entry.refs == 0 {
                shard.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedMutex::new());
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("1@s.whatsapp.net").await;
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_run_concurrently() {
        let locks = KeyedMutex::new();
        let _a = locks.lock("a@s.whatsapp.net").await;
        // a second key must not block behind the first
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.lock("b@s.whatsapp.net"))
            .await
            .expect("independent key should lock immediately");
        assert_eq!(locks.entry_count(), 2);
    }

    #[tokio::test]
    async fn test_entries_dropped_on_release() {
        let locks = KeyedMutex::new();
        {
            let _guard = locks.lock("gone@g.us").await;
            assert_eq!(locks.entry_count(), 1);
        }
        assert_eq!(locks.entry_count(), 0);
    }
}

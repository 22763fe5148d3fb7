//! Bounded in-memory cache with TTL
//!
//! Eviction is oldest-insertion-time, not LRU-access-time. Expired
//! entries are dropped lazily on `get` and by a periodic background
//! sweep. Readers never block readers: the map sits behind an RwLock
//! and `get` only upgrades to a write lock when it must evict.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
}

pub struct Cache<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    max_size: usize,
    default_ttl: Duration,
}

impl<V: Clone> Cache<V> {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_size: max_size.max(1),
            default_ttl,
        }
    }

    /// Insert with the default TTL. Takes ownership of the value.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("cache lock poisoned");

        let key = key.into();
        // Bound the map before inserting a fresh key
        if !entries.contains_key(&key) && entries.len() >= self.max_size {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(key, Entry { value, inserted_at: now, expires_at: now + ttl });
    }

    /// Fetch a copy of the value. Expired entries are removed on access.
    pub fn get(&self, key: &str) -> Option<V> {
        let expired = {
            let entries = self.entries.read().expect("cache lock poisoned");
            match entries.get(key) {
                None => return None,
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                },
                Some(_) => true,
            }
        };
        if expired {
            let mut entries = self.entries.write().expect("cache lock poisoned");
            // Re-check under the write lock; a concurrent insert may have
            // replaced the entry in the meantime.
            if entries
                .get(key)
                .map(|e| e.expires_at <= Instant::now())
                .unwrap_or(false)
            {
                entries.remove(key);
            }
        }
        None
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries
            .write()
            .expect("cache lock poisoned")
            .remove(key)
            .map(|e| e.value)
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }
}

impl<V: Clone + Send + Sync + 'static> Cache<V> {
    /// Spawn the periodic sweeper. The task holds a weak handle so an
    /// abandoned cache shuts its sweeper down instead of leaking.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cache) => {
                        let removed = cache.sweep_expired();
                        if removed > 0 {
                            tracing::debug!("cache sweep evicted {} expired entries", removed);
                        }
                    },
                    None => break,
                }
            }
        })
    }
}

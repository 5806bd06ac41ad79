//! In-memory TTL cache
//!
//! Used to memoize policy engine decisions and JSON Web Key Sets. Expired
//! entries are invisible to readers and removed lazily: a read that finds an
//! expired entry deletes it, and a write sweeps all expired entries at most
//! once per TTL window.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Cache entry with expiration tracking
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub inserted_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            inserted_at: Instant::now(),
        }
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

/// Generic cache storage with a single TTL for all entries
#[derive(Debug)]
pub struct MemoryCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
    last_pruned: Mutex<Instant>,
}

impl<K, V> MemoryCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            last_pruned: Mutex::new(Instant::now()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a value from cache if it exists and is not expired
    pub async fn get(&self, key: &K) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(self.ttl) => {
                    debug!("Cache hit");
                    return Some(entry.data.clone());
                }
                Some(_) => {}
                None => {
                    debug!("Cache miss");
                    return None;
                }
            }
        }

        // Expired: drop it, unless a writer refreshed it in the meantime
        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(self.ttl))
        {
            debug!("Cache entry expired");
            entries.remove(key);
        }
        None
    }

    /// Set a value, pruning expired entries if the last sweep is older than the TTL
    pub async fn set(&self, key: K, value: V) {
        let mut entries = self.entries.write().await;
        {
            let mut last_pruned = self.last_pruned.lock().await;
            if last_pruned.elapsed() > self.ttl {
                let before = entries.len();
                let ttl = self.ttl;
                entries.retain(|_, entry| !entry.is_expired(ttl));
                debug!(evicted = before - entries.len(), "Pruned expired cache entries");
                *last_pruned = Instant::now();
            }
        }
        entries.insert(key, CacheEntry::new(value));
    }

    /// Check if cache contains a non-expired entry for key
    pub async fn contains(&self, key: &K) -> bool {
        self.get(key).await.is_some()
    }

    /// Number of stored entries, including expired ones not yet pruned
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sieve_core::CacheError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Shared key/value store for computed values and materialized sort orders.
///
/// Accessed concurrently by many requests without locking across calls;
/// last write wins.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;
    fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// Typed read through a `CacheStore`
pub fn get_json<T: DeserializeOwned>(store: &dyn CacheStore, key: &str) -> Result<Option<T>, CacheError> {
    match store.get(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Serialization(e.to_string())),
        None => Ok(None),
    }
}

/// Typed write through a `CacheStore`
pub fn put_json<T: Serialize>(store: &dyn CacheStore, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
    store.put(key, bytes, ttl)
}

struct CacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
    last_accessed: Arc<RwLock<Instant>>,
}

/// In-process cache store with per-entry TTL and least-recently-used eviction
pub struct MemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
}

impl MemoryCacheStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    fn evict_lru(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| *entry.last_accessed.read())
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            debug!("Cache eviction: {}", key);
            self.entries.remove(&key);
        }
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                *entry.last_accessed.write() = Instant::now();
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        // The read guard is released before removal
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            if self.purge_expired() == 0 {
                self.evict_lru();
            }
        }

        let now = Instant::now();
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
                last_accessed: Arc::new(RwLock::new(now)),
            },
        );
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

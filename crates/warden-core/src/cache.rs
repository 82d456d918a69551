//! Cache port for per-request lookups that are safe to reuse briefly.
//!
//! The engine never owns cache lifecycle. It only reads and writes through
//! [`CachePort`]; the embedding service decides where entries live.
//! [`MemoryCache`] is the in-process implementation used by tests and the CLI.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

/// Get/set contract of an external key/value cache.
#[async_trait]
pub trait CachePort: Send + Sync {
    /// Fetch a live entry.
    async fn get(&self, key: &str) -> Option<serde_json::Value>;

    /// Store an entry that expires after `ttl`.
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration);
}

/// Build a cache key from a namespace and its parts.
///
/// Parts are hashed so keys stay short and never leak raw identifiers.
pub fn cache_key(namespace: &str, parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{namespace}:{}", hasher.finalize().to_hex())
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

impl CacheStats {
    /// Number of lookups that found a live entry.
    pub fn hits(&self) -> u64 {
        self.hits.load(AtomicOrdering::Relaxed)
    }

    /// Number of lookups that found nothing.
    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }

    /// Number of entries dropped on lookup because they had expired.
    pub fn expired(&self) -> u64 {
        self.expired.load(AtomicOrdering::Relaxed)
    }

    /// Fraction of lookups that hit, 0.0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

/// In-memory TTL cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, (Instant, serde_json::Value)>,
    stats: CacheStats,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Lookup statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[async_trait]
impl CachePort for MemoryCache {
    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Instant::now();
        let live = match self.entries.get(key) {
            Some(entry) if entry.0 > now => Some(entry.1.clone()),
            Some(_) => None,
            None => {
                self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed);
                return None;
            }
        };

        match live {
            Some(value) => {
                self.stats.hits.fetch_add(1, AtomicOrdering::Relaxed);
                Some(value)
            }
            None => {
                self.entries.remove_if(key, |_, (expires, _)| *expires <= now);
                self.stats.expired.fetch_add(1, AtomicOrdering::Relaxed);
                self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        self.entries
            .insert(key.to_string(), (Instant::now() + ttl, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_and_set() {
        let cache = MemoryCache::new();
        assert!(cache.get("a").await.is_none());

        cache.set("a", json!({"id": 1}), Duration::from_secs(60)).await;
        assert_eq!(cache.get("a").await, Some(json!({"id": 1})));
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MemoryCache::new();
        cache.set("a", json!(1), Duration::from_millis(10)).await;
        assert!(cache.get("a").await.is_some());

        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("a").await.is_none());
        assert_eq!(cache.stats().expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_key_is_stable_and_scoped() {
        let a = cache_key("user", &["1", "editor"]);
        assert_eq!(a, cache_key("user", &["1", "editor"]));
        assert_ne!(a, cache_key("user", &["1e", "ditor"]));
        assert_ne!(a, cache_key("role", &["1", "editor"]));
        assert!(a.starts_with("user:"));
    }
}

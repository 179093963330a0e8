//! Analytics cache adapter
//!
//! Keyed TTL cache over serialised response bodies. Keys follow
//! `analytics:<endpoint>:<stable-param-hash>`. The adapter never fails a
//! request: a disabled cache behaves as a permanent miss.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    inserted_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

/// In-process TTL cache shared between the HTTP handlers and the workers'
/// invalidation path.
#[derive(Clone)]
pub struct Cache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    enabled: bool,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            enabled: true,
        }
    }

    /// A cache that always misses, for deployments without a backend.
    pub fn disabled() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            enabled: false,
        }
    }

    /// Stable key for an endpoint and its canonicalised parameters. The
    /// caller is responsible for sorting and default-filling the params
    /// before hashing so equal requests share a key.
    pub fn key(endpoint: &str, canonical_params: &str) -> String {
        let digest = Sha256::digest(canonical_params.as_bytes());
        let mut hash = String::with_capacity(16);
        for byte in digest.iter().take(8) {
            hash.push_str(&format!("{byte:02x}"));
        }
        format!("analytics:{endpoint}:{hash}")
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        if !self.enabled {
            return None;
        }
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !entry.expired() => Some(entry.value.clone()),
            _ => None,
        }
    }

    pub async fn set_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    pub async fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.write().await;
        entries.remove(key).is_some()
    }

    /// Delete every key starting with `prefix`; returns how many went.
    pub async fn delete_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        before - entries.len()
    }

    /// Drop all analytics entries. Used by admin cache-clear and by the
    /// reports stage after a batch lands.
    pub async fn invalidate_analytics(&self) -> usize {
        self.delete_prefix("analytics:").await
    }

    /// Number of live (unexpired) entries.
    pub async fn live_len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.expired()).count()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let cache = Cache::new();
        let key = Cache::key("summary", "start=2024-01-01&end=2024-01-14");
        cache
            .set_ttl(&key, b"body".to_vec(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get(&key).await, Some(b"body".to_vec()));
    }

    #[tokio::test]
    async fn test_expiry() {
        let cache = Cache::new();
        cache
            .set_ttl("analytics:x:1", b"v".to_vec(), Duration::from_millis(10))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("analytics:x:1").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_single_key() {
        let cache = Cache::new();
        cache
            .set_ttl("analytics:x:1", b"v".to_vec(), Duration::from_secs(60))
            .await;
        assert!(cache.delete("analytics:x:1").await);
        assert!(!cache.delete("analytics:x:1").await);
        assert!(cache.get("analytics:x:1").await.is_none());
    }

    #[tokio::test]
    async fn test_prefix_invalidation() {
        let cache = Cache::new();
        cache
            .set_ttl("analytics:summary:a", b"1".to_vec(), Duration::from_secs(60))
            .await;
        cache
            .set_ttl("analytics:topics:b", b"2".to_vec(), Duration::from_secs(60))
            .await;
        cache
            .set_ttl("suggestions:all", b"3".to_vec(), Duration::from_secs(60))
            .await;

        let removed = cache.invalidate_analytics().await;
        assert_eq!(removed, 2);
        assert!(cache.get("suggestions:all").await.is_some());
    }

    #[tokio::test]
    async fn test_disabled_cache_always_misses() {
        let cache = Cache::disabled();
        cache
            .set_ttl("analytics:x:1", b"v".to_vec(), Duration::from_secs(60))
            .await;
        assert!(cache.get("analytics:x:1").await.is_none());
    }

    #[test]
    fn test_key_is_stable_and_distinct() {
        let a = Cache::key("summary", "end=b&start=a");
        let b = Cache::key("summary", "end=b&start=a");
        let c = Cache::key("summary", "end=c&start=a");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("analytics:summary:"));
    }
}

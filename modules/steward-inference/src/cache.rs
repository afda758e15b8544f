//! Process-wide evidence cache.
//!
//! Keyed by `(bucket, name)`: resolution results live under the rounded
//! coordinate bucket, scrape results under the `site` bucket and the page URL.
//! Entries older than the TTL read as misses. An optional durable backend
//! sits behind the in-memory map; its failures degrade to misses.
//!
//! Callers that fill an entry first [`claim`](EvidenceCache::claim) its key,
//! so concurrent misses on one key run a single fetch and the rest read the
//! result it stored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use steward_common::{Coordinate, RawFeature};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub bucket: String,
    pub name: String,
}

impl CacheKey {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }

    /// Spatial query results around `at`.
    pub fn features(at: Coordinate, precision: u32) -> Self {
        Self::new(at.bucket(precision), "features")
    }

    /// Place names containing `at`.
    pub fn places(at: Coordinate, precision: u32) -> Self {
        Self::new(at.bucket(precision), "places")
    }

    /// Addresses scraped from a site, keyed by its normalized URL.
    pub fn site(url: &str) -> Self {
        Self::new("site", url)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Evidence {
    Features(Vec<RawFeature>),
    PlaceNames(Vec<String>),
    Emails(Vec<String>),
}

/// Evidence loaded from a durable backend, with its age.
#[derive(Debug, Clone)]
pub struct StoredEvidence {
    pub evidence: Evidence,
    pub age: Duration,
}

/// Durable layer behind the in-memory cache.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn load(&self, key: &CacheKey) -> anyhow::Result<Option<StoredEvidence>>;
    async fn store(&self, key: &CacheKey, evidence: &Evidence) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    evidence: Evidence,
    inserted_at: Instant,
}

pub struct EvidenceCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    backend: Option<Arc<dyn CacheBackend>>,
    in_flight: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl EvidenceCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            backend: None,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Evidence> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(key) {
                if entry.inserted_at.elapsed() <= self.ttl {
                    return Some(entry.evidence.clone());
                }
            }
        }

        let backend = self.backend.as_ref()?;
        match backend.load(key).await {
            Ok(Some(stored)) if stored.age <= self.ttl => {
                debug!(bucket = key.bucket.as_str(), name = key.name.as_str(), "Evidence loaded from backend");
                let inserted_at = Instant::now()
                    .checked_sub(stored.age)
                    .unwrap_or_else(Instant::now);
                self.put_memory(key.clone(), stored.evidence.clone(), inserted_at)
                    .await;
                Some(stored.evidence)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(bucket = key.bucket.as_str(), name = key.name.as_str(), error = %e, "Evidence backend read failed");
                None
            }
        }
    }

    pub async fn insert(&self, key: CacheKey, evidence: Evidence) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.store(&key, &evidence).await {
                warn!(bucket = key.bucket.as_str(), name = key.name.as_str(), error = %e, "Evidence backend write failed");
            }
        }
        self.put_memory(key, evidence, Instant::now()).await;
    }

    async fn put_memory(&self, key: CacheKey, evidence: Evidence, inserted_at: Instant) {
        let mut entries = self.entries.write().await;
        // Opportunistic eviction when we hit the limit
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let ttl = self.ttl;
            entries.retain(|_, v| v.inserted_at.elapsed() <= ttl);
            if entries.len() >= self.max_entries {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, v)| v.inserted_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            CacheEntry {
                evidence,
                inserted_at,
            },
        );
    }

    /// Exclusive right to fill `key`. Re-check the cache once the guard is
    /// held: an earlier holder may have stored the answer meanwhile.
    pub async fn claim(&self, key: &CacheKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut in_flight = self.in_flight.lock().await;
            // Slots nobody holds or waits on are only referenced by the map.
            in_flight.retain(|_, slot| Arc::strong_count(slot) > 1);
            in_flight.entry(key.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, v| v.inserted_at.elapsed() <= ttl);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn emails(list: &[&str]) -> Evidence {
        Evidence::Emails(list.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = EvidenceCache::new(Duration::from_secs(60), 100);
        let key = CacheKey::site("https://law.ucla.edu/");
        cache.insert(key.clone(), emails(&["info@law.ucla.edu"])).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&key).await, Some(emails(&["info@law.ucla.edu"])));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&key).await, None);
        assert_eq!(cache.sweep().await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn nearby_coordinates_hit_the_same_entry() {
        let cache = EvidenceCache::new(Duration::from_secs(60), 100);
        let a = Coordinate::new(34.070001, -118.443002);
        let b = Coordinate::new(34.070004, -118.442998);
        cache
            .insert(CacheKey::places(a, 5), Evidence::PlaceNames(vec!["UCLA".into()]))
            .await;
        assert_eq!(
            cache.get(&CacheKey::places(b, 5)).await,
            Some(Evidence::PlaceNames(vec!["UCLA".into()]))
        );
        assert_eq!(cache.get(&CacheKey::features(b, 5)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn full_cache_evicts_the_oldest_entry() {
        let cache = EvidenceCache::new(Duration::from_secs(600), 2);
        cache.insert(CacheKey::site("a"), emails(&[])).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(CacheKey::site("b"), emails(&[])).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(CacheKey::site("c"), emails(&[])).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get(&CacheKey::site("a")).await, None);
        assert!(cache.get(&CacheKey::site("c")).await.is_some());
    }

    struct MapBackend {
        rows: Mutex<HashMap<CacheKey, Evidence>>,
        age: Duration,
    }

    #[async_trait]
    impl CacheBackend for MapBackend {
        async fn load(&self, key: &CacheKey) -> anyhow::Result<Option<StoredEvidence>> {
            Ok(self.rows.lock().unwrap().get(key).cloned().map(|evidence| StoredEvidence {
                evidence,
                age: self.age,
            }))
        }

        async fn store(&self, key: &CacheKey, evidence: &Evidence) -> anyhow::Result<()> {
            self.rows.lock().unwrap().insert(key.clone(), evidence.clone());
            Ok(())
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn load(&self, _key: &CacheKey) -> anyhow::Result<Option<StoredEvidence>> {
            anyhow::bail!("connection refused")
        }

        async fn store(&self, _key: &CacheKey, _evidence: &Evidence) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn memory_miss_falls_through_to_backend() {
        let backend = Arc::new(MapBackend {
            rows: Mutex::new(HashMap::new()),
            age: Duration::from_secs(10),
        });
        let key = CacheKey::site("https://city.gov/");
        backend.rows.lock().unwrap().insert(key.clone(), emails(&["info@city.gov"]));

        let cache = EvidenceCache::new(Duration::from_secs(60), 10).with_backend(backend);
        assert_eq!(cache.get(&key).await, Some(emails(&["info@city.gov"])));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn stale_backend_rows_are_misses() {
        let backend = Arc::new(MapBackend {
            rows: Mutex::new(HashMap::new()),
            age: Duration::from_secs(3600),
        });
        let key = CacheKey::site("https://city.gov/");
        backend.rows.lock().unwrap().insert(key.clone(), emails(&["info@city.gov"]));

        let cache = EvidenceCache::new(Duration::from_secs(60), 10).with_backend(backend);
        assert_eq!(cache.get(&key).await, None);
    }

    #[tokio::test]
    async fn backend_failures_degrade_to_memory_only() {
        let cache = EvidenceCache::new(Duration::from_secs(60), 10).with_backend(Arc::new(BrokenBackend));
        let key = CacheKey::site("https://city.gov/");
        assert_eq!(cache.get(&key).await, None);
        cache.insert(key.clone(), emails(&["info@city.gov"])).await;
        assert_eq!(cache.get(&key).await, Some(emails(&["info@city.gov"])));
    }

    #[tokio::test]
    async fn claim_holds_back_a_second_filler_until_released() {
        let cache = Arc::new(EvidenceCache::new(Duration::from_secs(60), 10));
        let key = CacheKey::site("https://city.gov/");
        let held = cache.claim(&key).await;

        let waiter = tokio::spawn({
            let cache = cache.clone();
            let key = key.clone();
            async move {
                let _claim = cache.claim(&key).await;
                cache.get(&key).await
            }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        // Other keys are not blocked.
        drop(cache.claim(&CacheKey::site("https://other.gov/")).await);

        cache.insert(key.clone(), emails(&["info@city.gov"])).await;
        drop(held);
        assert_eq!(waiter.await.unwrap(), Some(emails(&["info@city.gov"])));
    }
}

//! Response cache storage.
//!
//! Serialized read payloads live in an LRU bounded by `max_entries`, each with
//! the TTL of its key family. Entries are dropped early when a write touches
//! an entity the payload was built from.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use serde::Serialize;
use tracing::debug;

use super::config::CacheConfig;
use super::deps;
use super::keys::{CacheKey, EntityKey};
use super::lock::mutex_lock;
use super::registry::CacheRegistry;

const SOURCE: &str = "cache::store";

/// Monotonic counter bumped by every invalidation.
///
/// A fill records the epoch it started under and is discarded if the epoch
/// moved while it was computing, so a read racing a write never stores the
/// pre-write payload.
pub type Epoch = u64;

#[derive(Clone)]
struct Entry {
    body: Bytes,
    expires_at: Instant,
}

struct State {
    entries: LruCache<CacheKey, Entry>,
    registry: CacheRegistry,
    epoch: Epoch,
}

/// Point-in-time counters for the admin stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub tracked_entities: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidated: u64,
}

pub struct ResponseCache {
    config: CacheConfig,
    state: Mutex<State>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidated: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        let entries = LruCache::new(config.max_entries_non_zero());
        Self {
            config,
            state: Mutex::new(State {
                entries,
                registry: CacheRegistry::new(),
                epoch: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return the cached payload for `key`, computing and storing it on a miss.
    ///
    /// `compute` runs inside a dependency collector; entities it records via
    /// [`deps::record`] decide which writes invalidate the stored payload.
    pub async fn get_or_compute<F, E>(&self, key: CacheKey, compute: F) -> Result<Bytes, E>
    where
        F: Future<Output = Result<Bytes, E>>,
    {
        if !self.config.enabled {
            return compute.await;
        }

        if let Some(body) = self.lookup_at(&key, Instant::now()) {
            return Ok(body);
        }

        let epoch = self.current_epoch();
        let (result, dependencies) = deps::with_collector(compute).await;
        let body = result?;
        self.store_at(key, body.clone(), dependencies, epoch, Instant::now());
        Ok(body)
    }

    /// Drop every payload built from any of `entities`. Returns the number of
    /// entries removed.
    pub fn invalidate_entities(&self, entities: &[EntityKey]) -> usize {
        let mut state = mutex_lock(&self.state, SOURCE, "invalidate_entities");
        state.epoch = state.epoch.wrapping_add(1);

        let mut keys = HashSet::new();
        for entity in entities {
            keys.extend(state.registry.keys_for_entity(entity));
        }

        let mut removed = 0;
        for key in &keys {
            state.registry.unregister(key);
            if state.entries.pop(key).is_some() {
                removed += 1;
            }
        }
        drop(state);

        self.record_invalidated(removed);
        debug!(
            entities = entities.len(),
            removed, "Cache entries invalidated"
        );
        removed
    }

    /// Drop every payload.
    pub fn invalidate_all(&self) -> usize {
        let mut state = mutex_lock(&self.state, SOURCE, "invalidate_all");
        state.epoch = state.epoch.wrapping_add(1);
        let removed = state.entries.len();
        state.entries.clear();
        state.registry.clear();
        drop(state);

        self.record_invalidated(removed);
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let state = mutex_lock(&self.state, SOURCE, "stats");
        CacheStats {
            enabled: self.config.enabled,
            entries: state.entries.len(),
            tracked_entities: state.registry.entity_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
        }
    }

    fn current_epoch(&self) -> Epoch {
        mutex_lock(&self.state, SOURCE, "current_epoch").epoch
    }

    fn lookup_at(&self, key: &CacheKey, now: Instant) -> Option<Bytes> {
        let family = key.family().as_str();
        let mut state = mutex_lock(&self.state, SOURCE, "lookup");

        let cached = state
            .entries
            .get(key)
            .map(|entry| (entry.body.clone(), entry.expires_at));
        let hit = match cached {
            Some((body, expires_at)) if expires_at > now => Some(body),
            Some(_) => {
                state.entries.pop(key);
                state.registry.unregister(key);
                None
            }
            None => None,
        };
        drop(state);

        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            counter!("catalogue_cache_hit_total", "family" => family).increment(1);
            debug!(cache_family = family, outcome = "hit", "Cache lookup");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!("catalogue_cache_miss_total", "family" => family).increment(1);
            debug!(cache_family = family, outcome = "miss", "Cache lookup");
        }
        hit
    }

    fn store_at(
        &self,
        key: CacheKey,
        body: Bytes,
        dependencies: HashSet<EntityKey>,
        observed: Epoch,
        now: Instant,
    ) -> bool {
        let mut state = mutex_lock(&self.state, SOURCE, "store");
        if state.epoch != observed {
            debug!(
                cache_family = key.family().as_str(),
                "Discarding cache fill computed before an invalidation"
            );
            return false;
        }

        let entry = Entry {
            body,
            expires_at: now + self.config.ttl_for(&key),
        };
        if let Some((evicted, _)) = state.entries.push(key.clone(), entry) {
            if evicted != key {
                state.registry.unregister(&evicted);
            }
        }
        state.registry.register(key, dependencies);
        true
    }

    fn record_invalidated(&self, removed: usize) {
        let removed = removed as u64;
        self.invalidated.fetch_add(removed, Ordering::Relaxed);
        counter!("catalogue_cache_invalidated_total").increment(removed);
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;

    fn cache() -> ResponseCache {
        ResponseCache::new(CacheConfig::default())
    }

    async fn fill(
        cache: &ResponseCache,
        key: CacheKey,
        body: &'static str,
        entities: Vec<EntityKey>,
    ) -> Bytes {
        cache
            .get_or_compute(key, async move {
                deps::record_all(entities);
                Ok::<_, Infallible>(Bytes::from_static(body.as_bytes()))
            })
            .await
            .expect("infallible")
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let cache = cache();
        let first = fill(&cache, CacheKey::ProductList, "v1", vec![EntityKey::Products]).await;
        let second = fill(&cache, CacheKey::ProductList, "v2", vec![EntityKey::Products]).await;

        assert_eq!(first, second);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn invalidation_drops_dependent_keys_only() {
        let cache = cache();
        let product = Uuid::new_v4();
        fill(
            &cache,
            CacheKey::ProductDetail(product),
            "detail",
            vec![EntityKey::Product(product)],
        )
        .await;
        fill(
            &cache,
            CacheKey::CompositionList,
            "compositions",
            vec![EntityKey::Compositions],
        )
        .await;

        let removed = cache.invalidate_entities(&[EntityKey::Product(product)]);
        assert_eq!(removed, 1);

        let detail = fill(
            &cache,
            CacheKey::ProductDetail(product),
            "detail-v2",
            vec![EntityKey::Product(product)],
        )
        .await;
        assert_eq!(detail, Bytes::from_static(b"detail-v2"));

        let compositions = fill(&cache, CacheKey::CompositionList, "other", vec![]).await;
        assert_eq!(compositions, Bytes::from_static(b"compositions"));
    }

    #[tokio::test]
    async fn fill_started_before_invalidation_is_discarded() {
        let cache = cache();
        let epoch = cache.current_epoch();
        cache.invalidate_entities(&[EntityKey::Products]);

        let stored = cache.store_at(
            CacheKey::ProductList,
            Bytes::from_static(b"stale"),
            HashSet::from([EntityKey::Products]),
            epoch,
            Instant::now(),
        );

        assert!(!stored);
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn expired_entries_are_recomputed() {
        let cache = cache();
        let epoch = cache.current_epoch();
        let now = Instant::now();
        cache.store_at(
            CacheKey::CategoryList,
            Bytes::from_static(b"old"),
            HashSet::from([EntityKey::Categories]),
            epoch,
            now,
        );

        let later = now + Duration::from_secs(3600);
        assert!(cache.lookup_at(&CacheKey::CategoryList, later).is_none());
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().tracked_entities, 0);
    }

    #[tokio::test]
    async fn disabled_cache_always_computes() {
        let cache = ResponseCache::new(CacheConfig {
            enabled: false,
            ..Default::default()
        });
        fill(&cache, CacheKey::ProductList, "a", vec![]).await;
        let second = fill(&cache, CacheKey::ProductList, "b", vec![]).await;
        assert_eq!(second, Bytes::from_static(b"b"));
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn failed_compute_is_not_stored() {
        let cache = cache();
        let result = cache
            .get_or_compute(CacheKey::CompositionList, async { Err::<Bytes, _>("boom") })
            .await;
        assert_eq!(result, Err("boom"));
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn lru_eviction_unregisters_dependencies() {
        let cache = ResponseCache::new(CacheConfig {
            max_entries: 1,
            ..Default::default()
        });
        fill(&cache, CacheKey::ProductList, "a", vec![EntityKey::Products]).await;
        fill(
            &cache,
            CacheKey::CategoryList,
            "b",
            vec![EntityKey::Categories],
        )
        .await;

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.tracked_entities, 1);
    }

    #[tokio::test]
    async fn invalidate_all_clears_everything() {
        let cache = cache();
        fill(&cache, CacheKey::ProductList, "a", vec![EntityKey::Products]).await;
        fill(
            &cache,
            CacheKey::CategoryList,
            "b",
            vec![EntityKey::Categories],
        )
        .await;

        assert_eq!(cache.invalidate_all(), 2);
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().invalidated, 2);
    }
}

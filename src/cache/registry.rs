//! Bidirectional cache registry.
//!
//! Tracks which cache keys were built from which entities so that a write can
//! find every payload it makes stale. The registry itself is not synchronized;
//! the owning store guards it together with the entries.

use std::collections::{HashMap, HashSet};

use super::keys::{CacheKey, EntityKey};

#[derive(Debug, Default)]
pub struct CacheRegistry {
    entity_to_keys: HashMap<EntityKey, HashSet<CacheKey>>,
    key_to_entities: HashMap<CacheKey, HashSet<EntityKey>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `cache_key` as depending on `entities`, replacing any earlier
    /// registration for the same key.
    pub fn register(&mut self, cache_key: CacheKey, entities: HashSet<EntityKey>) {
        self.unregister(&cache_key);
        for entity in &entities {
            self.entity_to_keys
                .entry(entity.clone())
                .or_default()
                .insert(cache_key.clone());
        }
        self.key_to_entities.insert(cache_key, entities);
    }

    /// Forget `cache_key` and drop it from every entity it referenced.
    pub fn unregister(&mut self, cache_key: &CacheKey) {
        let Some(entities) = self.key_to_entities.remove(cache_key) else {
            return;
        };
        for entity in entities {
            if let Some(keys) = self.entity_to_keys.get_mut(&entity) {
                keys.remove(cache_key);
                if keys.is_empty() {
                    self.entity_to_keys.remove(&entity);
                }
            }
        }
    }

    /// Cache keys that depend on `entity`.
    pub fn keys_for_entity(&self, entity: &EntityKey) -> HashSet<CacheKey> {
        self.entity_to_keys.get(entity).cloned().unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.entity_to_keys.clear();
        self.key_to_entities.clear();
    }

    pub fn entity_count(&self) -> usize {
        self.entity_to_keys.len()
    }
}

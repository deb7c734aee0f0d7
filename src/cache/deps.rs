//! Dependency collector for cache invalidation.
//!
//! Read paths call [`record`] for every entity they load. When the read runs
//! inside [`with_collector`], the recorded set is returned alongside the
//! result and registered against the cache key being filled.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use super::keys::EntityKey;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::deps";

type Collected = Arc<Mutex<HashSet<EntityKey>>>;

tokio::task_local! {
    static DEPS: Collected;
}

/// Record an entity dependency. No-op outside a collector.
pub fn record(entity: EntityKey) {
    let _ = DEPS.try_with(|deps| {
        mutex_lock(deps, SOURCE, "record").insert(entity);
    });
}

/// Record several dependencies at once.
pub fn record_all(entities: impl IntoIterator<Item = EntityKey>) {
    let _ = DEPS.try_with(|deps| {
        mutex_lock(deps, SOURCE, "record_all").extend(entities);
    });
}

/// Run `f` with a fresh collector and return its output with the recorded set.
pub async fn with_collector<F, R>(f: F) -> (R, HashSet<EntityKey>)
where
    F: Future<Output = R>,
{
    let collected: Collected = Arc::new(Mutex::new(HashSet::new()));
    let result = DEPS.scope(collected.clone(), f).await;
    let deps = std::mem::take(&mut *mutex_lock(&collected, SOURCE, "collect"));
    (result, deps)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn record_without_collector_is_no_op() {
        record(EntityKey::Products);
        let (_, deps) = with_collector(async {}).await;
        assert!(deps.is_empty());
    }

    #[tokio::test]
    async fn with_collector_captures_dependencies() {
        let id = Uuid::new_v4();
        let (value, deps) = with_collector(async {
            record(EntityKey::Products);
            record_all([EntityKey::Product(id), EntityKey::Category(id)]);
            tokio::task::yield_now().await;
            record(EntityKey::Products);
            7
        })
        .await;

        assert_eq!(value, 7);
        assert_eq!(deps.len(), 3);
        assert!(deps.contains(&EntityKey::Product(id)));
    }

    #[tokio::test]
    async fn nested_collectors_are_isolated() {
        let (_, outer) = with_collector(async {
            record(EntityKey::Categories);
            let (_, inner) = with_collector(async {
                record(EntityKey::Compositions);
            })
            .await;
            assert_eq!(inner.len(), 1);
        })
        .await;

        assert_eq!(outer.len(), 1);
        assert!(outer.contains(&EntityKey::Categories));
    }
}

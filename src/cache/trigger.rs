//! Cache trigger service.
//!
//! Write services call the trigger after a commit; invalidation is applied
//! before the call returns so the write response is never followed by a stale
//! read.

use std::sync::Arc;

use tracing::info;

use super::events::EventKind;
use super::store::ResponseCache;

pub struct CacheTrigger {
    cache: Arc<ResponseCache>,
}

impl CacheTrigger {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }

    /// Invalidate every payload affected by `kind`.
    pub fn publish(&self, kind: EventKind) {
        let entities = kind.affected_entities();
        let removed = self.cache.invalidate_entities(&entities);
        info!(
            target = "catalogue::cache::trigger",
            event_kind = kind.label(),
            entities = entities.len(),
            removed,
            "Cache event applied"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::convert::Infallible;

    use bytes::Bytes;
    use uuid::Uuid;

    use super::*;
    use crate::cache::{CacheConfig, CacheKey, EntityKey, deps};

    #[tokio::test]
    async fn product_update_drops_list_and_detail() {
        let cache = Arc::new(ResponseCache::new(CacheConfig::default()));
        let trigger = CacheTrigger::new(cache.clone());
        let product_id = Uuid::new_v4();

        for (key, entities) in [
            (CacheKey::ProductList, vec![EntityKey::Products]),
            (
                CacheKey::ProductDetail(product_id),
                vec![EntityKey::Product(product_id)],
            ),
            (CacheKey::CategoryList, vec![EntityKey::Categories]),
        ] {
            let entities: HashSet<_> = entities.into_iter().collect();
            cache
                .get_or_compute(key, async move {
                    deps::record_all(entities);
                    Ok::<_, Infallible>(Bytes::from_static(b"{}"))
                })
                .await
                .expect("infallible");
        }

        trigger.publish(EventKind::ProductUpdated { product_id });

        assert_eq!(cache.stats().entries, 1);
    }
}

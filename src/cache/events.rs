//! Write events that make cached payloads stale.

use uuid::Uuid;

use super::keys::EntityKey;

/// A committed write, described by what it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    ProductCreated { product_id: Uuid },
    ProductUpdated { product_id: Uuid },
    ProductDeleted { product_id: Uuid },
    CategoryCreated { category_id: Uuid },
    CategoryUpdated { category_id: Uuid },
    /// Cascades to the listed products.
    CategoryDeleted {
        category_id: Uuid,
        product_ids: Vec<Uuid>,
    },
    CompositionCreated { composition_id: Uuid },
    CompositionUpdated { composition_id: Uuid },
    CompositionDeleted { composition_id: Uuid },
}

impl EventKind {
    /// Entities whose dependent payloads must be dropped.
    pub fn affected_entities(&self) -> Vec<EntityKey> {
        match self {
            // Listings embed product fields, so every product write touches
            // the collection as well as the row.
            EventKind::ProductCreated { product_id }
            | EventKind::ProductUpdated { product_id }
            | EventKind::ProductDeleted { product_id } => {
                vec![EntityKey::Products, EntityKey::Product(*product_id)]
            }
            EventKind::CategoryCreated { category_id }
            | EventKind::CategoryUpdated { category_id } => {
                vec![EntityKey::Categories, EntityKey::Category(*category_id)]
            }
            EventKind::CategoryDeleted {
                category_id,
                product_ids,
            } => {
                let mut entities = vec![
                    EntityKey::Categories,
                    EntityKey::Category(*category_id),
                    EntityKey::Products,
                ];
                entities.extend(product_ids.iter().copied().map(EntityKey::Product));
                entities
            }
            EventKind::CompositionCreated { composition_id }
            | EventKind::CompositionUpdated { composition_id }
            | EventKind::CompositionDeleted { composition_id } => vec![
                EntityKey::Compositions,
                EntityKey::Composition(*composition_id),
            ],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EventKind::ProductCreated { .. } => "product_created",
            EventKind::ProductUpdated { .. } => "product_updated",
            EventKind::ProductDeleted { .. } => "product_deleted",
            EventKind::CategoryCreated { .. } => "category_created",
            EventKind::CategoryUpdated { .. } => "category_updated",
            EventKind::CategoryDeleted { .. } => "category_deleted",
            EventKind::CompositionCreated { .. } => "composition_created",
            EventKind::CompositionUpdated { .. } => "composition_updated",
            EventKind::CompositionDeleted { .. } => "composition_deleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_delete_covers_cascaded_products() {
        let category_id = Uuid::new_v4();
        let products = vec![Uuid::new_v4(), Uuid::new_v4()];
        let entities = EventKind::CategoryDeleted {
            category_id,
            product_ids: products.clone(),
        }
        .affected_entities();

        assert!(entities.contains(&EntityKey::Categories));
        assert!(entities.contains(&EntityKey::Products));
        for id in products {
            assert!(entities.contains(&EntityKey::Product(id)));
        }
    }

    #[test]
    fn composition_events_touch_collection() {
        let id = Uuid::new_v4();
        let entities = EventKind::CompositionUpdated { composition_id: id }.affected_entities();
        assert_eq!(
            entities,
            vec![EntityKey::Compositions, EntityKey::Composition(id)]
        );
    }
}

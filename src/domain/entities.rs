//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::error::DomainError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryRecord {
    pub id: Uuid,
    pub name: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubCategoryRecord {
    pub id: Uuid,
    pub name: String,
}

/// A category together with its current subcategory association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryTree {
    pub category: CategoryRecord,
    pub subcategories: Vec<SubCategoryRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompositionRecord {
    pub id: Uuid,
    pub material: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductImageRecord {
    pub id: Uuid,
    pub stored_path: String,
    pub checksum: String,
    pub size_bytes: i64,
    pub width: i32,
    pub height: i32,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRecord {
    pub id: Uuid,
    pub style_number: String,
    pub gauge: String,
    pub end: String,
    pub weight: String,
    pub description: String,
    pub category_id: Uuid,
    pub sub_category_id: Option<Uuid>,
    pub image_path: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A product with every related row needed to render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductGraph {
    pub product: ProductRecord,
    pub category: CategoryTree,
    pub sub_category: Option<SubCategoryRecord>,
    pub compositions: Vec<CompositionRecord>,
    pub images: Vec<ProductImageRecord>,
}

impl ProductGraph {
    pub fn assemble(
        product: ProductRecord,
        category: CategoryTree,
        sub_category: Option<SubCategoryRecord>,
        compositions: Vec<CompositionRecord>,
        images: Vec<ProductImageRecord>,
    ) -> Result<Self, DomainError> {
        if category.category.id != product.category_id {
            return Err(DomainError::invariant(format!(
                "product `{}` references category `{}` but `{}` was loaded",
                product.id, product.category_id, category.category.id
            )));
        }
        if product.sub_category_id != sub_category.as_ref().map(|sub| sub.id) {
            return Err(DomainError::invariant(format!(
                "product `{}` sub-category does not match the loaded row",
                product.id
            )));
        }

        Ok(Self {
            product,
            category,
            sub_category,
            compositions,
            images,
        })
    }

    pub fn id(&self) -> Uuid {
        self.product.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactMessageRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InquiryItemRecord {
    pub id: Uuid,
    pub product_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InquiryRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub is_read: bool,
    pub items: Vec<InquiryItemRecord>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: Uuid) -> CategoryTree {
        CategoryTree {
            category: CategoryRecord {
                id,
                name: "Knitwear".to_string(),
                created_at: OffsetDateTime::UNIX_EPOCH,
                updated_at: OffsetDateTime::UNIX_EPOCH,
            },
            subcategories: Vec::new(),
        }
    }

    fn product(category_id: Uuid, sub_category_id: Option<Uuid>) -> ProductRecord {
        ProductRecord {
            id: Uuid::new_v4(),
            style_number: "KN-100".to_string(),
            gauge: "12GG".to_string(),
            end: "2/28".to_string(),
            weight: "320g".to_string(),
            description: "Crew neck".to_string(),
            category_id,
            sub_category_id,
            image_path: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn assemble_rejects_mismatched_category() {
        let err = ProductGraph::assemble(
            product(Uuid::new_v4(), None),
            category(Uuid::new_v4()),
            None,
            Vec::new(),
            Vec::new(),
        )
        .expect_err("mismatch must be rejected");
        assert!(matches!(err, DomainError::Invariant { .. }));
    }

    #[test]
    fn assemble_requires_loaded_sub_category() {
        let category_id = Uuid::new_v4();
        let err = ProductGraph::assemble(
            product(category_id, Some(Uuid::new_v4())),
            category(category_id),
            None,
            Vec::new(),
            Vec::new(),
        )
        .expect_err("missing sub-category must be rejected");
        assert!(matches!(err, DomainError::Invariant { .. }));
    }

    #[test]
    fn assemble_accepts_consistent_rows() {
        let category_id = Uuid::new_v4();
        let sub = SubCategoryRecord {
            id: Uuid::new_v4(),
            name: "Wool".to_string(),
        };
        let graph = ProductGraph::assemble(
            product(category_id, Some(sub.id)),
            category(category_id),
            Some(sub),
            Vec::new(),
            Vec::new(),
        )
        .expect("consistent graph");
        assert_eq!(graph.category.category.id, category_id);
    }
}

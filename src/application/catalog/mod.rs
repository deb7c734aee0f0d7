//! Catalogue services: categories, compositions and products.

pub mod categories;
pub mod compositions;
pub mod error;
pub mod media;
pub mod payload;
pub mod products;
pub mod views;

pub use categories::CategoryService;
pub use compositions::CompositionService;
pub use error::CatalogError;
pub use products::ProductService;

use uuid::Uuid;

use crate::application::repos::RepoError;

/// How an update treats fields the client left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// `PUT`: required fields must be present.
    Full,
    /// `PATCH`: absent fields keep their stored value.
    Partial,
}

/// Map a write that lost its target row to the entity's not-found error.
pub(crate) fn missing_as_not_found(
    entity: &'static str,
    id: Uuid,
) -> impl Fn(RepoError) -> CatalogError {
    move |err| match err {
        RepoError::NotFound => CatalogError::not_found(entity, id),
        other => CatalogError::Repo(other),
    }
}

use thiserror::Error;
use uuid::Uuid;

use crate::application::catalog::media::{BlobError, ImageError};
use crate::application::repos::RepoError;
use crate::application::validation::FieldErrors;
use crate::domain::error::DomainError;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request failed validation on {}", .0.fields().collect::<Vec<_>>().join(", "))]
    Validation(FieldErrors),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error(transparent)]
    Storage(#[from] BlobError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("image normalization task failed: {0}")]
    Task(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl CatalogError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }
}

impl From<FieldErrors> for CatalogError {
    fn from(errors: FieldErrors) -> Self {
        Self::Validation(errors)
    }
}

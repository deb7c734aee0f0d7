//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::entities::{
    CategoryTree, CompositionRecord, ContactMessageRecord, InquiryRecord, ProductGraph,
    ProductRecord, SubCategoryRecord,
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// How one entry of a category's subcategory list is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubCategoryRef {
    /// Associate an existing row.
    Existing(Uuid),
    /// Reuse the oldest row with this name (case-insensitive) or create one.
    Named(String),
}

#[derive(Debug, Clone)]
pub struct CreateCategoryParams {
    pub id: Uuid,
    pub name: String,
    pub subcategories: Vec<SubCategoryRef>,
}

#[derive(Debug, Clone)]
pub struct UpdateCategoryParams {
    pub id: Uuid,
    pub name: Option<String>,
    /// `Some` replaces the association as a set.
    pub subcategories: Option<Vec<SubCategoryRef>>,
}

#[derive(Debug, Clone, Default)]
pub struct DeletedCategory {
    pub product_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct CreateCompositionParams {
    pub id: Uuid,
    pub material: String,
}

#[derive(Debug, Clone)]
pub struct UpdateCompositionParams {
    pub id: Uuid,
    pub material: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub category_id: Option<Uuid>,
    /// Restrict to these ids; `None` means every product.
    pub ids: Option<Vec<Uuid>>,
}

/// A normalized image already written to blob storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProductImage {
    pub id: Uuid,
    pub stored_path: String,
    pub checksum: String,
    pub size_bytes: i64,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone)]
pub struct CreateProductParams {
    pub id: Uuid,
    pub style_number: String,
    pub gauge: String,
    pub end: String,
    pub weight: String,
    pub description: String,
    pub category_id: Uuid,
    pub sub_category_id: Option<Uuid>,
    pub image_path: Option<String>,
    pub composition_ids: Vec<Uuid>,
    pub images: Vec<NewProductImage>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateProductParams {
    pub id: Uuid,
    pub style_number: Option<String>,
    pub gauge: Option<String>,
    pub end: Option<String>,
    pub weight: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    /// Outer `Some` means the field was supplied; inner `None` clears it.
    pub sub_category_id: Option<Option<Uuid>>,
    pub image_path: Option<String>,
    /// `Some` replaces the association as a set.
    pub composition_ids: Option<Vec<Uuid>>,
    /// `Some` clears the gallery and recreates it from these rows.
    pub images: Option<Vec<NewProductImage>>,
}

#[derive(Debug, Clone)]
pub struct CreateContactMessageParams {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct CreateInquiryParams {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub product_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub is_read: Option<bool>,
    pub search: Option<String>,
}

#[async_trait]
pub trait CategoriesRepo: Send + Sync {
    async fn list_categories(&self) -> Result<Vec<CategoryTree>, RepoError>;

    async fn find_category(&self, id: Uuid) -> Result<Option<CategoryTree>, RepoError>;

    async fn find_subcategories(&self, ids: &[Uuid]) -> Result<Vec<SubCategoryRecord>, RepoError>;
}

#[async_trait]
pub trait CategoriesWriteRepo: Send + Sync {
    async fn create_category(
        &self,
        params: CreateCategoryParams,
    ) -> Result<CategoryTree, RepoError>;

    async fn update_category(
        &self,
        params: UpdateCategoryParams,
    ) -> Result<CategoryTree, RepoError>;

    async fn delete_category(&self, id: Uuid) -> Result<DeletedCategory, RepoError>;
}

#[async_trait]
pub trait CompositionsRepo: Send + Sync {
    async fn list_compositions(&self) -> Result<Vec<CompositionRecord>, RepoError>;

    async fn find_composition(&self, id: Uuid) -> Result<Option<CompositionRecord>, RepoError>;

    async fn find_compositions(&self, ids: &[Uuid]) -> Result<Vec<CompositionRecord>, RepoError>;
}

#[async_trait]
pub trait CompositionsWriteRepo: Send + Sync {
    async fn create_composition(
        &self,
        params: CreateCompositionParams,
    ) -> Result<CompositionRecord, RepoError>;

    async fn update_composition(
        &self,
        params: UpdateCompositionParams,
    ) -> Result<CompositionRecord, RepoError>;

    async fn delete_composition(&self, id: Uuid) -> Result<(), RepoError>;
}

#[async_trait]
pub trait ProductsRepo: Send + Sync {
    async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<ProductGraph>, RepoError>;

    async fn find_product(&self, id: Uuid) -> Result<Option<ProductGraph>, RepoError>;

    async fn find_product_record(&self, id: Uuid) -> Result<Option<ProductRecord>, RepoError>;

    /// Return the subset of `ids` that exist.
    async fn existing_product_ids(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, RepoError>;
}

#[async_trait]
pub trait ProductsWriteRepo: Send + Sync {
    async fn create_product(&self, params: CreateProductParams) -> Result<(), RepoError>;

    async fn update_product(&self, params: UpdateProductParams) -> Result<(), RepoError>;

    async fn delete_product(&self, id: Uuid) -> Result<(), RepoError>;
}

#[async_trait]
pub trait ContactMessagesRepo: Send + Sync {
    async fn create_contact_message(
        &self,
        params: CreateContactMessageParams,
    ) -> Result<ContactMessageRecord, RepoError>;

    async fn list_contact_messages(
        &self,
        filter: &MessageFilter,
    ) -> Result<Vec<ContactMessageRecord>, RepoError>;

    async fn mark_contact_message_read(
        &self,
        id: Uuid,
    ) -> Result<Option<ContactMessageRecord>, RepoError>;
}

#[async_trait]
pub trait InquiriesRepo: Send + Sync {
    async fn create_inquiry(&self, params: CreateInquiryParams)
    -> Result<InquiryRecord, RepoError>;

    async fn list_inquiries(&self, filter: &MessageFilter) -> Result<Vec<InquiryRecord>, RepoError>;

    async fn find_inquiry(&self, id: Uuid) -> Result<Option<InquiryRecord>, RepoError>;

    async fn mark_inquiry_read(&self, id: Uuid) -> Result<Option<InquiryRecord>, RepoError>;
}

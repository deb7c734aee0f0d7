//! Cache key definitions.
//!
//! `EntityKey` names the rows a cached payload was built from; `CacheKey`
//! names the payload itself.

use uuid::Uuid;

/// Identifies a domain entity or collection for cache invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    /// Membership of the product table (any create or delete).
    Products,
    Product(Uuid),
    /// Membership of the category table.
    Categories,
    Category(Uuid),
    /// Membership of the composition table.
    Compositions,
    Composition(Uuid),
}

/// Cached read payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    ProductList,
    ProductDetail(Uuid),
    CategoryList,
    CategoryDetail(Uuid),
    CategoryProducts(Uuid),
    CategorySubcategories(Uuid),
    CompositionList,
}

/// Key grouping used for TTL selection and log labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    ProductList,
    ProductDetail,
    CategoryList,
    CategoryDetail,
    CategoryProducts,
    CategorySubcategories,
    CompositionList,
}

impl CacheKey {
    pub fn family(&self) -> KeyFamily {
        match self {
            CacheKey::ProductList => KeyFamily::ProductList,
            CacheKey::ProductDetail(_) => KeyFamily::ProductDetail,
            CacheKey::CategoryList => KeyFamily::CategoryList,
            CacheKey::CategoryDetail(_) => KeyFamily::CategoryDetail,
            CacheKey::CategoryProducts(_) => KeyFamily::CategoryProducts,
            CacheKey::CategorySubcategories(_) => KeyFamily::CategorySubcategories,
            CacheKey::CompositionList => KeyFamily::CompositionList,
        }
    }
}

impl KeyFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyFamily::ProductList => "product_list",
            KeyFamily::ProductDetail => "product_detail",
            KeyFamily::CategoryList => "category_list",
            KeyFamily::CategoryDetail => "category_detail",
            KeyFamily::CategoryProducts => "category_products",
            KeyFamily::CategorySubcategories => "category_subcategories",
            KeyFamily::CompositionList => "composition_list",
        }
    }
}

//! Admin API: catalogue CRUD, the message inbox and cache controls.

use axum::{
    Router,
    extract::{DefaultBodyLimit, Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::application::catalog::{
    UpdateMode,
    payload::{CategoryPayload, CompositionPayload, ProductPayload},
};
use crate::application::repos::MessageFilter;
use crate::application::validation::FieldErrors;
use crate::cache::CacheKey;

use super::{
    ApiError, HttpState,
    auth::require_admin_token,
    body::{JsonBody, ProductForm},
    cached_read,
    error::success,
    middleware::{log_responses, set_request_context},
    parse_id,
    public::{
        CATEGORIES_FETCHED, COMPOSITIONS_FETCHED, PRODUCT_FETCHED, PRODUCTS_FETCHED,
        public_health,
    },
};

const SOURCE: &str = "catalogue::http::admin";

pub fn build_admin_router(state: HttpState) -> Router {
    let body_limit = usize::try_from(state.max_request_bytes).unwrap_or(usize::MAX);

    let gated = Router::new()
        .route("/categories", get(list_categories).post(create_category))
        .route(
            "/categories/{id}",
            get(category_detail)
                .put(replace_category)
                .patch(patch_category)
                .delete(delete_category),
        )
        .route("/subcategories/{category_id}", get(category_subcategories))
        .route("/products", get(list_products).post(create_product))
        .route(
            "/products/{id}",
            get(product_detail)
                .put(update_product)
                .patch(update_product)
                .delete(delete_product),
        )
        .route("/categorised-products/{category_id}", get(category_products))
        .route("/compositions", get(list_compositions).post(create_composition))
        .route(
            "/compositions/{id}",
            get(composition_detail)
                .put(replace_composition)
                .patch(patch_composition)
                .delete(delete_composition),
        )
        .route("/contact-messages", get(list_contact_messages))
        .route("/contact-messages/{id}/read", post(mark_contact_read))
        .route("/inquiries", get(list_inquiries))
        .route("/inquiries/{id}", get(inquiry_detail))
        .route("/inquiries/{id}/read", post(mark_inquiry_read))
        .route("/cache/invalidate", post(invalidate_cache))
        .route("/cache/stats", get(cache_stats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    Router::new()
        .route("/_health/db", get(public_health))
        .merge(gated)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

// Categories

async fn list_categories(State(state): State<HttpState>) -> Response {
    cached_read(
        &state.cache,
        CacheKey::CategoryList,
        CATEGORIES_FETCHED,
        "categories",
        async { state.categories.list().await.map_err(ApiError::from) },
    )
    .await
}

async fn category_detail(State(state): State<HttpState>, Path(raw): Path<String>) -> Response {
    let id = match parse_id("category", &raw) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    cached_read(
        &state.cache,
        CacheKey::CategoryDetail(id),
        "Category details fetched successfully",
        "category",
        async { state.categories.get(id).await.map_err(ApiError::from) },
    )
    .await
}

async fn category_subcategories(
    State(state): State<HttpState>,
    Path(raw): Path<String>,
) -> Response {
    let id = match parse_id("category", &raw) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    cached_read(
        &state.cache,
        CacheKey::CategorySubcategories(id),
        "Subcategories fetched successfully",
        "subcategories",
        async { state.categories.subcategories(id).await.map_err(ApiError::from) },
    )
    .await
}

async fn create_category(
    State(state): State<HttpState>,
    JsonBody(body): JsonBody,
) -> Result<Response, ApiError> {
    let category = state.categories.create(CategoryPayload::decode(&body)).await?;
    Ok(success(
        StatusCode::CREATED,
        "Category created successfully",
        "category",
        &category,
    ))
}

async fn replace_category(
    state: State<HttpState>,
    path: Path<String>,
    body: JsonBody,
) -> Result<Response, ApiError> {
    update_category(state, path, body, UpdateMode::Full).await
}

async fn patch_category(
    state: State<HttpState>,
    path: Path<String>,
    body: JsonBody,
) -> Result<Response, ApiError> {
    update_category(state, path, body, UpdateMode::Partial).await
}

async fn update_category(
    State(state): State<HttpState>,
    Path(raw): Path<String>,
    JsonBody(body): JsonBody,
    mode: UpdateMode,
) -> Result<Response, ApiError> {
    let id = parse_id("category", &raw)?;
    let category = state
        .categories
        .update(id, CategoryPayload::decode(&body), mode)
        .await?;
    Ok(success(
        StatusCode::OK,
        "Category updated successfully",
        "category",
        &category,
    ))
}

async fn delete_category(
    State(state): State<HttpState>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id("category", &raw)?;
    state.categories.delete(id).await?;
    Ok(no_content())
}

// Products

async fn list_products(State(state): State<HttpState>) -> Response {
    cached_read(
        &state.cache,
        CacheKey::ProductList,
        PRODUCTS_FETCHED,
        "products",
        async { state.products.list().await.map_err(ApiError::from) },
    )
    .await
}

async fn category_products(State(state): State<HttpState>, Path(raw): Path<String>) -> Response {
    let id = match parse_id("category", &raw) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    cached_read(
        &state.cache,
        CacheKey::CategoryProducts(id),
        PRODUCTS_FETCHED,
        "products",
        async { state.products.list_by_category(id).await.map_err(ApiError::from) },
    )
    .await
}

async fn product_detail(State(state): State<HttpState>, Path(raw): Path<String>) -> Response {
    let id = match parse_id("product", &raw) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    cached_read(
        &state.cache,
        CacheKey::ProductDetail(id),
        PRODUCT_FETCHED,
        "product",
        async { state.products.get(id).await.map_err(ApiError::from) },
    )
    .await
}

async fn create_product(
    State(state): State<HttpState>,
    ProductForm(body): ProductForm,
) -> Result<Response, ApiError> {
    let product = state.products.create(ProductPayload::decode(body)).await?;
    Ok(success(
        StatusCode::CREATED,
        "Product created successfully",
        "product",
        &product,
    ))
}

async fn update_product(
    State(state): State<HttpState>,
    Path(raw): Path<String>,
    ProductForm(body): ProductForm,
) -> Result<Response, ApiError> {
    let id = parse_id("product", &raw)?;
    let product = state
        .products
        .update(id, ProductPayload::decode(body))
        .await?;
    Ok(success(
        StatusCode::OK,
        "Product updated successfully",
        "product",
        &product,
    ))
}

async fn delete_product(
    State(state): State<HttpState>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id("product", &raw)?;
    state.products.delete(id).await?;
    Ok(no_content())
}

// Compositions

async fn list_compositions(State(state): State<HttpState>) -> Response {
    cached_read(
        &state.cache,
        CacheKey::CompositionList,
        COMPOSITIONS_FETCHED,
        "compositions",
        async { state.compositions.list().await.map_err(ApiError::from) },
    )
    .await
}

async fn composition_detail(
    State(state): State<HttpState>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id("composition", &raw)?;
    let composition = state.compositions.get(id).await?;
    Ok(success(
        StatusCode::OK,
        "Composition details fetched successfully",
        "composition",
        &composition,
    ))
}

async fn create_composition(
    State(state): State<HttpState>,
    JsonBody(body): JsonBody,
) -> Result<Response, ApiError> {
    let composition = state
        .compositions
        .create(CompositionPayload::decode(&body))
        .await?;
    Ok(success(
        StatusCode::CREATED,
        "Composition created successfully",
        "composition",
        &composition,
    ))
}

async fn replace_composition(
    state: State<HttpState>,
    path: Path<String>,
    body: JsonBody,
) -> Result<Response, ApiError> {
    update_composition(state, path, body, UpdateMode::Full).await
}

async fn patch_composition(
    state: State<HttpState>,
    path: Path<String>,
    body: JsonBody,
) -> Result<Response, ApiError> {
    update_composition(state, path, body, UpdateMode::Partial).await
}

async fn update_composition(
    State(state): State<HttpState>,
    Path(raw): Path<String>,
    JsonBody(body): JsonBody,
    mode: UpdateMode,
) -> Result<Response, ApiError> {
    let id = parse_id("composition", &raw)?;
    let composition = state
        .compositions
        .update(id, CompositionPayload::decode(&body), mode)
        .await?;
    Ok(success(
        StatusCode::OK,
        "Composition updated successfully",
        "composition",
        &composition,
    ))
}

async fn delete_composition(
    State(state): State<HttpState>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id("composition", &raw)?;
    state.compositions.delete(id).await?;
    Ok(no_content())
}

// Inbox

#[derive(Debug, Default, Deserialize)]
struct InboxQuery {
    is_read: Option<String>,
    search: Option<String>,
}

impl InboxQuery {
    fn into_filter(self) -> Result<MessageFilter, ApiError> {
        let is_read = match self.is_read.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => {
                    let mut errors = FieldErrors::new();
                    errors.push_message("is_read", "Must be a valid boolean.");
                    return Err(ApiError::validation(errors));
                }
            },
        };
        let search = self
            .search
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Ok(MessageFilter { is_read, search })
    }
}

fn inbox_filter(
    query: Result<Query<InboxQuery>, QueryRejection>,
) -> Result<MessageFilter, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    query.into_filter()
}

async fn list_contact_messages(
    State(state): State<HttpState>,
    query: Result<Query<InboxQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let filter = inbox_filter(query)?;
    let messages = state.contact.list(&filter).await?;
    Ok(success(
        StatusCode::OK,
        "Contact messages fetched successfully",
        "messages",
        &messages,
    ))
}

async fn mark_contact_read(
    State(state): State<HttpState>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id("contact message", &raw)?;
    let message = state.contact.mark_read(id).await?;
    Ok(success(
        StatusCode::OK,
        "Contact message marked as read",
        "message",
        &message,
    ))
}

async fn list_inquiries(
    State(state): State<HttpState>,
    query: Result<Query<InboxQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let filter = inbox_filter(query)?;
    let inquiries = state.inquiries.list(&filter).await?;
    Ok(success(
        StatusCode::OK,
        "Inquiries fetched successfully",
        "inquiries",
        &inquiries,
    ))
}

async fn inquiry_detail(
    State(state): State<HttpState>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id("inquiry", &raw)?;
    let inquiry = state.inquiries.get(id).await?;
    Ok(success(
        StatusCode::OK,
        "Inquiry details fetched successfully",
        "inquiry",
        &inquiry,
    ))
}

async fn mark_inquiry_read(
    State(state): State<HttpState>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id("inquiry", &raw)?;
    let inquiry = state.inquiries.mark_read(id).await?;
    Ok(success(
        StatusCode::OK,
        "Inquiry marked as read",
        "inquiry",
        &inquiry,
    ))
}

// Cache

async fn invalidate_cache(State(state): State<HttpState>) -> Response {
    let removed = state.cache.invalidate_all();
    info!(target = SOURCE, removed, "Response cache cleared on request");
    success(
        StatusCode::OK,
        "Cache invalidated",
        "data",
        &json!({ "removed": removed }),
    )
}

async fn cache_stats(State(state): State<HttpState>) -> Response {
    success(
        StatusCode::OK,
        "Cache statistics fetched successfully",
        "stats",
        &state.cache.stats(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(is_read: Option<&str>, search: Option<&str>) -> InboxQuery {
        InboxQuery {
            is_read: is_read.map(str::to_string),
            search: search.map(str::to_string),
        }
    }

    #[test]
    fn inbox_query_parses_flags() {
        let filter = query(Some("true"), Some("  wool ")).into_filter().expect("valid");
        assert_eq!(filter.is_read, Some(true));
        assert_eq!(filter.search.as_deref(), Some("wool"));

        let filter = query(Some("0"), Some("   ")).into_filter().expect("valid");
        assert_eq!(filter.is_read, Some(false));
        assert_eq!(filter.search, None);

        let filter = query(None, None).into_filter().expect("valid");
        assert_eq!(filter.is_read, None);
    }

    #[test]
    fn inbox_query_rejects_unknown_flag() {
        let err = query(Some("maybe"), None).into_filter().expect_err("invalid");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}

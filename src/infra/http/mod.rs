//! HTTP surfaces: the public catalogue API and the token-gated admin API.

mod admin;
mod auth;
mod body;
pub mod error;
mod middleware;
mod public;
mod rate_limit;

pub use admin::build_admin_router;
pub use error::ApiError;
pub use middleware::REQUEST_ID_HEADER;
pub use public::build_public_router;
pub use rate_limit::RateLimiter;

use std::future::Future;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::Error as SqlxError;
use uuid::Uuid;

use crate::application::catalog::{CategoryService, CompositionService, ProductService};
use crate::application::error::ErrorReport;
use crate::application::messages::{ContactService, InquiryService};
use crate::cache::{CacheKey, ResponseCache};
use crate::infra::{db::PostgresRepositories, uploads::UploadStorage};

use self::error::{envelope_bytes, json_response};

/// Shared by both listeners.
#[derive(Clone)]
pub struct HttpState {
    pub categories: CategoryService,
    pub compositions: CompositionService,
    pub products: ProductService,
    pub contact: ContactService,
    pub inquiries: InquiryService,
    pub cache: Arc<ResponseCache>,
    pub uploads: Arc<UploadStorage>,
    pub db: Arc<PostgresRepositories>,
    pub rate_limiter: RateLimiter,
    pub admin_token: Option<Arc<str>>,
    pub max_request_bytes: u64,
}

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

/// Serve a read through the response cache. The stored bytes are the full
/// success envelope, so a hit skips serialization entirely.
async fn cached_read<T, F>(
    cache: &ResponseCache,
    key: CacheKey,
    message: &'static str,
    field: &'static str,
    load: F,
) -> Response
where
    T: Serialize,
    F: Future<Output = Result<T, ApiError>>,
{
    let result = cache
        .get_or_compute(key, async {
            let payload = load.await?;
            envelope_bytes(message, field, &payload)
        })
        .await;

    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(err) => err.into_response(),
    }
}

/// Path ids that are not UUIDs cannot name a row.
fn parse_id(entity: &'static str, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::not_found(entity, raw))
}

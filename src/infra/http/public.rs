use std::io::ErrorKind;

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Path, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde_json::json;
use tracing::error;

use crate::application::catalog::media::BlobError;
use crate::application::messages::ContactSubmission;
use crate::cache::CacheKey;

use super::{
    ApiError, HttpState,
    body::JsonBody,
    cached_read, db_health_response,
    error::success,
    middleware::{log_responses, set_request_context},
    parse_id,
    rate_limit::rate_limit_forms,
};

pub(super) const PRODUCTS_FETCHED: &str = "Products fetched successfully";
pub(super) const PRODUCT_FETCHED: &str = "Product details fetched successfully";
pub(super) const CATEGORIES_FETCHED: &str = "Categories fetched successfully";
pub(super) const COMPOSITIONS_FETCHED: &str = "Compositions fetched successfully";
const CONTACT_SUBMITTED: &str = "Contact form submitted successfully";
const INQUIRY_SUBMITTED: &str = "Inquiry submitted successfully";
const MAIL_WARNING: &str = "Form submitted but notification email failed";

pub fn build_public_router(state: HttpState) -> Router {
    let body_limit = usize::try_from(state.max_request_bytes).unwrap_or(usize::MAX);

    let forms = Router::new()
        .route("/contact-us", post(submit_contact))
        .route("/inquiry", post(submit_inquiry))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_forms,
        ));

    Router::new()
        .route("/products", get(list_products))
        .route("/products/{id}", get(product_detail))
        .route("/categories", get(list_categories))
        .route("/compositions", get(list_compositions))
        .route("/uploads/{*path}", get(serve_upload))
        .route("/_health/db", get(public_health))
        .merge(forms)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

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

async fn submit_contact(
    State(state): State<HttpState>,
    JsonBody(body): JsonBody,
) -> Result<Response, ApiError> {
    let submission = state.contact.submit(&body).await?;
    Ok(contact_response(&submission))
}

fn contact_response(submission: &ContactSubmission) -> Response {
    let mut body = json!({
        "status": "success",
        "message": CONTACT_SUBMITTED,
        "data": submission.message,
    });
    if !submission.notified {
        body["warning"] = json!(MAIL_WARNING);
    }
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn submit_inquiry(
    State(state): State<HttpState>,
    JsonBody(body): JsonBody,
) -> Result<Response, ApiError> {
    let inquiry = state.inquiries.submit(&body).await?;
    Ok(success(StatusCode::CREATED, INQUIRY_SUBMITTED, "data", &inquiry))
}

async fn serve_upload(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    const SOURCE: &str = "catalogue::http::public::serve_upload";

    match state.uploads.read(&path).await {
        Ok(bytes) => build_upload_response(&path, bytes),
        Err(BlobError::InvalidPath(_)) => ApiError::not_found("upload", &path).into_response(),
        Err(BlobError::Io(err)) if err.kind() == ErrorKind::NotFound => {
            ApiError::not_found("upload", &path).into_response()
        }
        Err(err) => {
            error!(
                target = SOURCE,
                path = %path,
                error = %err,
                "failed to read stored upload"
            );
            ApiError::internal(err.to_string()).into_response()
        }
    }
}

fn build_upload_response(path: &str, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );

    response
}

pub(super) async fn public_health(State(state): State<HttpState>) -> Response {
    db_health_response(state.db.health_check().await)
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use serde_json::Value;
    use uuid::Uuid;

    use super::*;
    use crate::application::messages::ContactView;

    fn submission(notified: bool) -> ContactSubmission {
        ContactSubmission {
            message: ContactView {
                id: Uuid::nil(),
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                subject: "Samples".to_string(),
                message: "Please send swatches.".to_string(),
            },
            notified,
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn contact_response_without_warning_when_notified() {
        let response = contact_response(&submission(true));
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = body_json(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["message"], CONTACT_SUBMITTED);
        assert_eq!(body["data"]["email"], "ada@example.com");
        assert!(body.get("warning").is_none());
    }

    #[tokio::test]
    async fn contact_response_warns_when_mail_failed() {
        let body = body_json(contact_response(&submission(false))).await;
        assert_eq!(body["warning"], MAIL_WARNING);
        assert_eq!(body["data"]["name"], "Ada");
    }

    #[test]
    fn upload_response_guesses_content_type() {
        let response = build_upload_response("2025/01/02/abc-chair.jpg", Bytes::from_static(b"jpg"));
        assert_eq!(response.headers()[CONTENT_TYPE], "image/jpeg");
        assert_eq!(response.headers()[CONTENT_LENGTH], "3");
        assert_eq!(
            response.headers()[CACHE_CONTROL],
            "public, max-age=31536000, immutable"
        );
    }
}

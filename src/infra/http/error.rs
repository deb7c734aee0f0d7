//! Response envelope shared by the public and admin listeners.

use std::borrow::Cow;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    application::{
        catalog::{CatalogError, media::ImageError},
        error::ErrorReport,
        messages::MessagesError,
        repos::RepoError,
        validation::FieldErrors,
    },
    domain::error::DomainError,
};

pub mod codes {
    pub const VALIDATION: &str = "validation_error";
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NOT_FOUND: &str = "not_found";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const DUPLICATE: &str = "duplicate";
    pub const INTEGRITY: &str = "integrity_error";
    pub const DB_TIMEOUT: &str = "db_timeout";
    pub const INTERNAL: &str = "internal_error";
}

pub const INVALID_DATA: &str = "Invalid data provided";
const INTERNAL_MESSAGE: &str = "An unexpected error occurred";

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    status: &'static str,
    message: &'a str,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a FieldErrors>,
}

/// An error response in the shared envelope.
///
/// `detail` never reaches the client; it is attached as an [`ErrorReport`]
/// for the response logger.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: Cow<'static, str>,
    errors: Option<FieldErrors>,
    detail: Option<String>,
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            errors: None,
            detail: None,
            retry_after: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn validation(errors: FieldErrors) -> Self {
        let mut err = Self::new(StatusCode::BAD_REQUEST, codes::VALIDATION, INVALID_DATA);
        err.errors = Some(errors);
        err
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, INVALID_DATA).with_detail(detail)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Authentication credentials were not provided or are invalid",
        )
    }

    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            format!("{} not found with id: {id}", capitalize(entity)),
        )
    }

    pub fn payload_too_large(limit_bytes: u64) -> Self {
        let limit_mib = limit_bytes.div_ceil(1_048_576);
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            codes::PAYLOAD_TOO_LARGE,
            format!("Request body is too large (limit is {limit_mib} MiB)"),
        )
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        let mut err = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            codes::RATE_LIMITED,
            "Rate limit exceeded",
        )
        .with_detail(format!("retry_after={retry_after}"));
        err.retry_after = Some(retry_after);
        err
    }

    /// Opaque 500; `detail` is only logged.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::INTERNAL,
            INTERNAL_MESSAGE,
        )
        .with_detail(detail)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status: "error",
            message: &self.message,
            code: self.code,
            errors: self.errors.as_ref(),
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after
            && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }

        let detail = match (&self.detail, &self.errors) {
            (Some(detail), _) => detail.clone(),
            (None, Some(errors)) => format!(
                "{}: {}",
                self.code,
                errors.fields().collect::<Vec<_>>().join(", ")
            ),
            (None, None) => format!("{}: {}", self.code, self.message),
        };
        ErrorReport::from_message("infra::http", self.status, detail).attach(&mut response);
        response
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        let detail = err.to_string();
        match err {
            RepoError::NotFound => {
                Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, "Resource not found")
            }
            RepoError::Duplicate { .. } => {
                Self::new(StatusCode::CONFLICT, codes::DUPLICATE, "Duplicate record")
                    .with_detail(detail)
            }
            RepoError::InvalidInput { .. } => Self::bad_request(detail),
            RepoError::Integrity { .. } => Self::new(
                StatusCode::CONFLICT,
                codes::INTEGRITY,
                "Integrity constraint violated",
            )
            .with_detail(detail),
            RepoError::Timeout => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::DB_TIMEOUT,
                "Database timeout",
            ),
            RepoError::Persistence(_) => Self::internal(detail),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound { entity } => {
                Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, format!("{} not found", capitalize(entity)))
            }
            DomainError::Validation { message } => Self::bad_request(message),
            DomainError::Invariant { .. } => Self::internal(err.to_string()),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Validation(errors) => Self::validation(errors),
            CatalogError::NotFound { entity, id } => Self::not_found(entity, id),
            CatalogError::Repo(repo) => repo.into(),
            CatalogError::Domain(domain) => domain.into(),
            CatalogError::Image(ImageError::Decode(reason)) => Self::bad_request(reason),
            other @ (CatalogError::Storage(_)
            | CatalogError::Image(ImageError::Encode(_))
            | CatalogError::Task(_)) => Self::internal(error_chain(&other)),
        }
    }
}

impl From<MessagesError> for ApiError {
    fn from(err: MessagesError) -> Self {
        match err {
            MessagesError::Validation(errors) => Self::validation(errors),
            MessagesError::NotFound { entity, id } => Self::not_found(entity, id),
            MessagesError::ProductNotFound(id) => Self::not_found("product", id),
            MessagesError::Repo(repo) => repo.into(),
        }
    }
}

impl From<FieldErrors> for ApiError {
    fn from(errors: FieldErrors) -> Self {
        Self::validation(errors)
    }
}

/// Serialize a success envelope: `{"status":"success","message":..,"<key>":payload}`.
pub fn envelope_bytes<T: Serialize>(
    message: &str,
    key: &str,
    payload: &T,
) -> Result<Bytes, ApiError> {
    let mut body = Map::new();
    body.insert("status".to_string(), Value::from("success"));
    body.insert("message".to_string(), Value::from(message));
    let payload = serde_json::to_value(payload)
        .map_err(|err| ApiError::internal(format!("serialize `{key}`: {err}")))?;
    body.insert(key.to_string(), payload);

    serde_json::to_vec(&Value::Object(body))
        .map(Bytes::from)
        .map_err(|err| ApiError::internal(format!("serialize envelope: {err}")))
}

/// Wrap already-serialized JSON.
pub fn json_response(status: StatusCode, body: Bytes) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response()
}

pub fn success<T: Serialize>(status: StatusCode, message: &str, key: &str, payload: &T) -> Response {
    match envelope_bytes(message, key, payload) {
        Ok(body) => json_response(status, body),
        Err(err) => err.into_response(),
    }
}

fn capitalize(entity: &str) -> String {
    let mut chars = entity.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(inner) = current {
        parts.push(inner.to_string());
        current = inner.source();
    }
    parts.join(": ")
}

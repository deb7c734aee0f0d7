//! Request body extractors that reject in the shared error envelope.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::{StatusCode, header::CONTENT_TYPE},
};
use axum_extra::extract::{
    Multipart,
    multipart::{MultipartError, MultipartRejection},
};
use serde_json::Value;
use tracing::error;

use crate::application::catalog::{
    media::Upload,
    payload::{MultipartForm, ProductBody},
};

use super::HttpState;
use super::error::ApiError;

const SOURCE: &str = "catalogue::http::body";

/// Any JSON document; shape checks happen in the decoders.
#[derive(Debug)]
pub struct JsonBody(pub Value);

impl FromRequest<HttpState> for JsonBody {
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &HttpState) -> Result<Self, Self::Rejection> {
        match Json::<Value>::from_request(request, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(rejection, state.max_request_bytes)),
        }
    }
}

/// A product write body: JSON, or a multipart form whose file parts become
/// uploads.
#[derive(Debug)]
pub struct ProductForm(pub ProductBody);

impl FromRequest<HttpState> for ProductForm {
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &HttpState) -> Result<Self, Self::Rejection> {
        let is_multipart = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        if !is_multipart {
            let JsonBody(value) = JsonBody::from_request(request, state).await?;
            return Ok(Self(ProductBody::Json(value)));
        }

        let mut multipart = Multipart::from_request(request, state)
            .await
            .map_err(multipart_rejection)?;
        let form = read_form(&mut multipart, state.max_request_bytes).await?;
        Ok(Self(ProductBody::Multipart(form)))
    }
}

async fn read_form(multipart: &mut Multipart, limit_bytes: u64) -> Result<MultipartForm, ApiError> {
    let mut form = MultipartForm::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err(multipart_error(err, limit_bytes)),
        };

        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let content_type = field.content_type().map(|mime| mime.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| multipart_error(err, limit_bytes))?;
                form.files.push((
                    name,
                    Upload {
                        file_name,
                        content_type,
                        bytes,
                    },
                ));
            }
            None => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| multipart_error(err, limit_bytes))?;
                form.fields.push((name, value));
            }
        }
    }
    Ok(form)
}

fn multipart_error(err: MultipartError, limit_bytes: u64) -> ApiError {
    let status = err.status();
    match status {
        StatusCode::PAYLOAD_TOO_LARGE => {
            ApiError::payload_too_large(limit_bytes).with_detail(err.to_string())
        }
        StatusCode::BAD_REQUEST => ApiError::bad_request(format!("multipart: {err}")),
        _ => {
            error!(
                target = SOURCE,
                status = status.as_u16(),
                error = %err,
                "failed to read multipart payload"
            );
            ApiError::internal(format!("multipart: {err}"))
        }
    }
}

fn multipart_rejection(rejection: MultipartRejection) -> ApiError {
    ApiError::bad_request(format!("multipart: {}", rejection.body_text()))
}

fn json_rejection(rejection: JsonRejection, limit_bytes: u64) -> ApiError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::payload_too_large(limit_bytes).with_detail(rejection.body_text());
    }
    ApiError::bad_request(rejection.body_text())
}

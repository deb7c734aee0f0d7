use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use super::HttpState;
use super::error::ApiError;

/// Admin gate: `Authorization: Bearer <token>` or `x-api-key: <token>`.
///
/// With no token configured every gated request is refused.
pub async fn require_admin_token(
    State(state): State<HttpState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        return ApiError::unauthorized()
            .with_detail("admin token not configured")
            .into_response();
    };

    match presented_token(request.headers()) {
        Some(token) if token_matches(expected, token) => next.run(request).await,
        Some(_) => ApiError::unauthorized()
            .with_detail("admin token mismatch")
            .into_response(),
        None => ApiError::unauthorized()
            .with_detail("admin token missing")
            .into_response(),
    }
}

fn presented_token(headers: &HeaderMap) -> Option<&str> {
    extract_bearer(headers).or_else(|| {
        headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    })
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn token_matches(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let map = headers(&[("authorization", "bearer s3cret")]);
        assert_eq!(presented_token(&map), Some("s3cret"));
    }

    #[test]
    fn api_key_header_is_a_fallback() {
        let map = headers(&[("x-api-key", "s3cret")]);
        assert_eq!(presented_token(&map), Some("s3cret"));

        let basic = headers(&[("authorization", "Basic abc"), ("x-api-key", "k")]);
        assert_eq!(presented_token(&basic), Some("k"));
    }

    #[test]
    fn empty_tokens_are_absent() {
        assert_eq!(presented_token(&headers(&[("authorization", "Bearer  ")])), None);
        assert_eq!(presented_token(&headers(&[("x-api-key", " ")])), None);
    }

    #[test]
    fn comparison_requires_exact_match() {
        assert!(token_matches("s3cret", "s3cret"));
        assert!(!token_matches("s3cret", "s3cre"));
        assert!(!token_matches("s3cret", "S3CRET"));
    }
}

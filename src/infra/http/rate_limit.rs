//! Sliding-window limiter for the public form endpoints.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tracing::debug;

use super::HttpState;
use super::error::ApiError;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    buckets: Arc<DashMap<String, Vec<Instant>>>,
    last_sweep: Arc<Mutex<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            buckets: Arc::new(DashMap::new()),
            last_sweep: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Record one request for `client` on `route`. Returns whether it is
    /// allowed and how many requests remain in the window.
    pub fn allow(&self, client: &str, route: &str) -> (bool, u32) {
        self.allow_at(client, route, Instant::now())
    }

    fn allow_at(&self, client: &str, route: &str, now: Instant) -> (bool, u32) {
        self.sweep_idle(now);

        let bucket_key = format!("{client}:{route}");
        let window = self.window;

        let mut entry = self.buckets.entry(bucket_key).or_default();
        entry.retain(|instant| now.saturating_duration_since(*instant) < window);

        let remaining = self.max_requests.saturating_sub(entry.len() as u32);
        if remaining == 0 {
            return (false, 0);
        }

        entry.push(now);
        (true, remaining.saturating_sub(1))
    }

    /// Drop buckets with no request left in the window, at most once per
    /// window. Client addresses are unbounded, so idle keys must not linger.
    fn sweep_idle(&self, now: Instant) {
        let Ok(mut last_sweep) = self.last_sweep.try_lock() else {
            return;
        };
        if now.saturating_duration_since(*last_sweep) < self.window {
            return;
        }
        *last_sweep = now;
        drop(last_sweep);

        let window = self.window;
        let before = self.buckets.len();
        self.buckets.retain(|_, hits| {
            hits.retain(|instant| now.saturating_duration_since(*instant) < window);
            !hits.is_empty()
        });
        debug!(
            target = "catalogue::http::rate_limit",
            removed = before.saturating_sub(self.buckets.len()),
            "Idle rate limit buckets swept"
        );
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }
}

/// Limits requests per client address and path. Requests without connection
/// info (in-process tests) share one bucket.
pub async fn rate_limit_forms(
    State(state): State<HttpState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "local".to_string());
    let path = request.uri().path().to_string();

    let (allowed, remaining) = state.rate_limiter.allow(&client, &path);
    if !allowed {
        debug!(
            target = "catalogue::http::rate_limit",
            client = %client,
            path = %path,
            limit = state.rate_limiter.limit(),
            "Form submission rate limited"
        );
        return ApiError::rate_limited(state.rate_limiter.retry_after_secs()).into_response();
    }

    debug!(
        target = "catalogue::http::rate_limit",
        client = %client,
        path = %path,
        remaining,
        "Form submission admitted"
    );
    next.run(request).await
}

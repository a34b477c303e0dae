//! API Rate Limiting - Global Request Quota
//!
//! A single unkeyed token bucket (governor GCRA) shared by every route.
//! Requests over quota get 429 without reaching the handler.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tracing::debug;

use super::types::ErrorResponse;

pub type ApiRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Limiter allowing `per_minute` requests per minute, bursting to the same.
pub fn limiter(per_minute: u32) -> Arc<ApiRateLimiter> {
  let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
  Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))
}

/// Middleware: reject with 429 once the quota is spent.
pub async fn enforce(State(limiter): State<Arc<ApiRateLimiter>>, request: Request, next: Next) -> Response {
  if limiter.check().is_err() {
    debug!(path = %request.uri().path(), "Rate limit exceeded");
    let body = ErrorResponse {
      error: "rate limit exceeded".to_string(),
    };
    return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
  }
  next.run(request).await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_quota_is_enforced() {
    let limiter = limiter(2);
    assert!(limiter.check().is_ok());
    assert!(limiter.check().is_ok());
    assert!(limiter.check().is_err());
  }

  #[test]
  fn test_zero_quota_still_admits_one() {
    let limiter = limiter(0);
    assert!(limiter.check().is_ok());
    assert!(limiter.check().is_err());
  }
}

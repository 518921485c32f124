//! Rate limit response metadata and the default rejection response.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::ratelimit::AdmissionResult;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// JSON body sent with a 429.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionBody {
    pub error: String,
    pub message: String,
    #[serde(rename = "retryAfter")]
    pub retry_after: u64,
}

impl RejectionBody {
    pub fn new(retry_after: u64) -> Self {
        Self {
            error: "Too many requests".to_string(),
            message: "Rate limit exceeded. Please try again later.".to_string(),
            retry_after,
        }
    }
}

/// The default rejection response: 429 with a [`RejectionBody`].
pub fn too_many_requests(retry_after: u64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(RejectionBody::new(retry_after)),
    )
        .into_response()
}

/// Attach the `X-RateLimit-*` headers, plus `Retry-After` on rejection.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, limit: u32, result: &AdmissionResult) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(result.reset_secs));

    if let Some(retry_after) = result.retry_after_secs {
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    }
}

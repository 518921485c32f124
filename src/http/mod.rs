//! HTTP integration: the admission middleware and the service routes.

mod layer;
mod response;
mod server;

pub use layer::{KeyFn, RateLimit, RateLimitLayer, RejectFn, SkipFn};
pub use response::{
    apply_rate_limit_headers, too_many_requests, RejectionBody, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use server::HttpServer;

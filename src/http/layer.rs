//! Tower middleware that admits or rejects requests before they reach a
//! handler.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::response::{apply_rate_limit_headers, too_many_requests};
use crate::ratelimit::{
    client_origin, AdmissionController, AdmissionResult, IdentityKey, Preset, WindowPolicy,
};

/// Derives the caller identity from a request.
pub type KeyFn = Arc<dyn Fn(&Request<Body>) -> String + Send + Sync>;
/// Returns `true` for requests that bypass admission entirely.
pub type SkipFn = Arc<dyn Fn(&Request<Body>) -> bool + Send + Sync>;
/// Builds the response for a rejected request.
pub type RejectFn = Arc<dyn Fn(&Request<Body>, &AdmissionResult) -> Response + Send + Sync>;

/// Scope used when the layer is built without a preset.
const DEFAULT_SCOPE: &str = "default";

/// Applies a [`WindowPolicy`] to every request passing through the wrapped
/// service.
///
/// Every checked response carries `X-RateLimit-Limit`, `X-RateLimit-Remaining`
/// and `X-RateLimit-Reset`. Rejected requests also get `Retry-After` and never
/// reach the inner service.
#[derive(Clone)]
pub struct RateLimitLayer {
    controller: Arc<AdmissionController>,
    policy: WindowPolicy,
    scope: Arc<str>,
    key_fn: KeyFn,
    skip: Option<SkipFn>,
    on_reject: RejectFn,
}

impl RateLimitLayer {
    /// A layer using the default policy.
    pub fn new(controller: Arc<AdmissionController>) -> Self {
        Self {
            controller,
            policy: WindowPolicy::default(),
            scope: Arc::from(DEFAULT_SCOPE),
            key_fn: Arc::new(client_origin::<Body>),
            skip: None,
            on_reject: Arc::new(|_: &Request<Body>, result: &AdmissionResult| {
                too_many_requests(result.retry_after_secs.unwrap_or(0))
            }),
        }
    }

    /// A layer using the controller's current policy for `preset`, scoped by
    /// the preset name.
    pub fn preset(controller: Arc<AdmissionController>, preset: Preset) -> Self {
        let policy = controller.policy(preset);
        Self::new(controller).policy(preset.name(), policy)
    }

    /// Use an explicit policy, counted under `scope`.
    pub fn policy(mut self, scope: &str, policy: WindowPolicy) -> Self {
        self.scope = Arc::from(scope);
        self.policy = policy;
        self
    }

    pub fn key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request<Body>) -> String + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(f);
        self
    }

    pub fn skip_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request<Body>) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(f));
        self
    }

    pub fn on_reject<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request<Body>, &AdmissionResult) -> Response + Send + Sync + 'static,
    {
        self.on_reject = Arc::new(f);
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimit<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimit {
            inner,
            layer: self.clone(),
        }
    }
}

/// The service produced by [`RateLimitLayer`].
#[derive(Clone)]
pub struct RateLimit<S> {
    inner: S,
    layer: RateLimitLayer,
}

impl<S> Service<Request<Body>> for RateLimit<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // Take the service that was polled ready and leave a clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let layer = self.layer.clone();

        Box::pin(async move {
            if layer.skip.as_ref().is_some_and(|skip| skip(&req)) {
                return inner.call(req).await;
            }

            let key = IdentityKey::new(&layer.scope, &(layer.key_fn)(&req));
            let result = layer
                .controller
                .check(&key.to_store_key(), &layer.policy)
                .await;

            if !result.allowed {
                warn!(
                    key = %key,
                    method = %req.method(),
                    path = %req.uri().path(),
                    retry_after_secs = ?result.retry_after_secs,
                    "Request rejected by rate limit"
                );
                let mut response = (layer.on_reject)(&req, &result);
                apply_rate_limit_headers(
                    response.headers_mut(),
                    layer.policy.max_requests(),
                    &result,
                );
                return Ok(response);
            }

            debug!(key = %key, remaining = result.remaining, "Request admitted");

            let mut response = inner.call(req).await?;
            apply_rate_limit_headers(response.headers_mut(), layer.policy.max_requests(), &result);
            Ok(response)
        })
    }
}

//! HTTP server exposing the admission controller.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::layer::RateLimitLayer;
use crate::error::{AdmissionError, Result};
use crate::ratelimit::{AdmissionController, Preset};

/// HTTP server for the admission service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The controller shared by every route
    controller: Arc<AdmissionController>,
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    preset: Option<String>,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, controller: Arc<AdmissionController>) -> Self {
        Self { addr, controller }
    }

    /// Build the application routes.
    ///
    /// `/healthz` is never limited. The admin routes run under the `readonly`
    /// and `write` presets; CORS preflights bypass both.
    pub fn router(&self) -> Router {
        let limited = |preset| {
            RateLimitLayer::preset(self.controller.clone(), preset)
                .skip_if(|req: &Request<Body>| req.method() == Method::OPTIONS)
        };

        let admin = get(limit_stats)
            .layer(limited(Preset::Readonly))
            .merge(delete(reset_limit).layer(limited(Preset::Write)));

        Router::new()
            .route("/healthz", get(healthz))
            .route("/admin/limits/{key}", admin)
            .with_state(self.controller.clone())
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let app = self.router();

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            AdmissionError::Io(e)
        })
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn limit_stats(
    State(controller): State<Arc<AdmissionController>>,
    Path(key): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Response {
    let preset = match query.preset.as_deref().map(str::parse::<Preset>) {
        None => Preset::Api,
        Some(Ok(preset)) => preset,
        Some(Err(e)) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    };

    let stats = controller.stats(&key, &controller.policy(preset)).await;
    Json(stats).into_response()
}

async fn reset_limit(
    State(controller): State<Arc<AdmissionController>>,
    Path(key): Path<String>,
) -> StatusCode {
    controller.reset(&key).await;
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{ManualClock, WindowPolicy};
    use tower::ServiceExt;

    fn server() -> HttpServer {
        let controller = AdmissionController::builder()
            .clock(Arc::new(ManualClock::new(0)))
            .build();
        HttpServer::new("127.0.0.1:0".parse().unwrap(), Arc::new(controller))
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_healthz_is_not_limited() {
        let server = server();
        let app = server.router();

        for _ in 0..300 {
            let response = app
                .clone()
                .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get("x-ratelimit-limit").is_none());
        }
        assert_eq!(server.controller.key_count().await, 0);
    }

    #[tokio::test]
    async fn test_stats_route() {
        let server = server();
        let policy = WindowPolicy::from_millis(5, 60_000).unwrap();
        server.controller.check("api:10.0.0.1", &policy).await;

        let response = server
            .router()
            .oneshot(
                Request::get("/admin/limits/api:10.0.0.1?preset=api")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "200");
        let body = json_body(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["remaining"], 99);
        assert_eq!(body["limited"], false);
    }

    #[tokio::test]
    async fn test_stats_route_unknown_preset() {
        let response = server()
            .router()
            .oneshot(
                Request::get("/admin/limits/k?preset=bulk")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Unknown preset: bulk");
    }

    #[tokio::test]
    async fn test_reset_route_clears_key() {
        let server = server();
        let policy = WindowPolicy::from_millis(1, 60_000).unwrap();
        server.controller.check("auth:10.0.0.1", &policy).await;
        assert!(!server.controller.check("auth:10.0.0.1", &policy).await.allowed);

        let response = server
            .router()
            .oneshot(
                Request::delete("/admin/limits/auth:10.0.0.1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["x-ratelimit-limit"], "20");
        assert!(server.controller.check("auth:10.0.0.1", &policy).await.allowed);
    }

    #[tokio::test]
    async fn test_admin_routes_are_limited() {
        let server = server();
        let mut policies = crate::ratelimit::PolicyTable::new();
        policies.set(Preset::Readonly, WindowPolicy::from_millis(1, 60_000).unwrap());
        server.controller.set_policies(policies);
        let app = server.router();

        let request = || {
            Request::get("/admin/limits/k")
                .header("x-real-ip", "198.51.100.3")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()["retry-after"], "60");
    }
}

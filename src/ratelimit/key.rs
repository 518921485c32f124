//! Identity key derivation.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;

/// Identity used when nothing about the caller's origin is known.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// A key that buckets requests by endpoint class and caller.
///
/// Callers hitting different endpoint classes are counted separately, so an
/// exhausted `auth` window does not block `api` traffic from the same origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    /// The endpoint class, usually a preset name
    pub scope: String,
    /// The caller identity, usually a network origin
    pub identity: String,
}

impl IdentityKey {
    pub fn new(scope: &str, identity: &str) -> Self {
        let identity = identity.trim();
        Self {
            scope: scope.to_string(),
            identity: if identity.is_empty() {
                UNKNOWN_IDENTITY.to_string()
            } else {
                identity.to_string()
            },
        }
    }

    /// The string stored in the request log.
    pub fn to_store_key(&self) -> String {
        format!("{}:{}", self.scope, self.identity)
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}

/// The caller's network origin.
///
/// Prefers the first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer
/// address from `ConnectInfo`, and finally [`UNKNOWN_IDENTITY`].
pub fn client_origin<B>(req: &Request<B>) -> String {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header("x-forwarded-for")
        .and_then(|v| v.split(',').map(str::trim).find(|ip| !ip.is_empty()))
        .or_else(|| header("x-real-ip"))
        .map(str::to_string)
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
        })
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
}

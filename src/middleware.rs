//! # HTTP Middleware
//!
//! Thin wrapper layers around the request router: structured logging and CORS.
//! Everything plugin-specific (auth, rate limiting, body transforms) belongs to
//! the plugins themselves, dispatched through [`crate::router`] — this module
//! only carries the concerns that apply uniformly to every request before a
//! plugin is ever chosen.

use crate::config::CorsConfig;
use axum::body::Body;
use axum::http::{self, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

/// Logs method, URI, status, and latency for every request, with a fresh
/// request id for correlating log lines across a single request's lifetime.
pub async fn logging_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let request_id = uuid::Uuid::new_v4().to_string();

    let response = next.run(req).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        latency_ms = start.elapsed().as_millis(),
        "request processed"
    );

    response
}

/// Builds the CORS layer from configuration. A disabled config yields a layer
/// with no origins allowed, which is what an empty `CorsLayer::new()` already does.
pub fn cors_middleware(cors_config: &CorsConfig) -> CorsLayer {
    if !cors_config.enabled {
        return CorsLayer::new();
    }

    let mut cors = CorsLayer::new();

    if cors_config.allowed_origins.iter().any(|o| o == "*") {
        cors = cors.allow_origin(Any);
    } else {
        for origin in &cors_config.allowed_origins {
            if let Ok(origin) = origin.parse::<http::header::HeaderValue>() {
                cors = cors.allow_origin(origin);
            }
        }
    }

    cors.allow_methods(Any).allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_cors_builds_without_panicking() {
        let _cors = cors_middleware(&CorsConfig {
            enabled: false,
            allowed_origins: vec!["https://example.com".into()],
        });
    }

    #[test]
    fn wildcard_origin_builds_without_panicking() {
        let _cors = cors_middleware(&CorsConfig {
            enabled: true,
            allowed_origins: vec!["*".into()],
        });
    }

    #[test]
    fn explicit_origin_builds_without_panicking() {
        let _cors = cors_middleware(&CorsConfig {
            enabled: true,
            allowed_origins: vec!["https://example.com".into()],
        });
    }
}

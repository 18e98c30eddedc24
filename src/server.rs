//! # HTTP Server
//!
//! Builds the axum `Router`: a single catch-all route through [`crate::router::dispatch`],
//! layered with body-size limiting, CORS, request logging, and a response timeout —
//! in that order, outermost first, so a request rejected for size never reaches a
//! plugin and a slow plugin still gets logged once it (or the timeout) finishes.

use crate::config::Config;
use crate::manager::PluginManager;
use crate::middleware::{cors_middleware, logging_middleware};
use crate::router;
use axum::routing::any;
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Builds the router and starts the worker pool against a freshly loaded plugin set.
///
/// Loads plugins from `config.runtime.plugins_dir` once before returning, so the
/// server is ready to dispatch as soon as it starts accepting connections.
pub fn create_server(config: &Config) -> anyhow::Result<Router> {
    let manager = PluginManager::new(&config.runtime);
    let outcomes = manager.refresh();
    for (name, outcome) in &outcomes {
        match outcome {
            crate::manager::PluginHostLoadOutcome::Loaded => {
                tracing::info!(plugin = %name, "plugin loaded");
            }
            crate::manager::PluginHostLoadOutcome::Failed(reason) => {
                tracing::error!(plugin = %name, error = %reason, "plugin failed to load");
            }
        }
    }
    manager.start_workers(config.runtime.worker_count);

    Ok(build_router(manager, config))
}

fn build_router(manager: Arc<PluginManager>, config: &Config) -> Router {
    Router::new()
        .route("/", any(router::dispatch))
        .route("/{*path}", any(router::dispatch))
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(config.server.max_body_size))
                .layer(cors_middleware(&config.server.cors))
                .layer(axum::middleware::from_fn(logging_middleware))
                .layer(TimeoutLayer::new(config.server.timeout)),
        )
        .with_state(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use axum_test::TestServer;

    fn test_manager(dir: &std::path::Path) -> Arc<PluginManager> {
        let manager = PluginManager::new(&RuntimeConfig {
            plugins_dir: dir.to_string_lossy().to_string(),
            worker_count: 1,
            max_recursion_depth: 10,
        });
        manager.refresh();
        manager.start_workers(1);
        manager
    }

    #[tokio::test]
    async fn missing_route_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let manager = test_manager(dir.path());
        let app = build_router(manager, &config);
        let server = TestServer::new(app).unwrap();
        let response = server.get("/nope").await;
        assert_eq!(response.status_code(), 404);
    }

    #[tokio::test]
    async fn plugin_route_is_dispatched() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("hello");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("plugin.lua"),
            "function handle_request(req) return { status = 200, body = \"hi\" } end",
        )
        .unwrap();

        let config = Config::default();
        let manager = test_manager(dir.path());
        let app = build_router(manager, &config);
        let server = TestServer::new(app).unwrap();
        let response = server.get("/hello/").await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.text(), "hi");
    }
}

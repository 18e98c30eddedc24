//! # Plugin Host
//!
//! An embeddable host for sandboxed Lua plugins. Each plugin runs in its own
//! `mlua` state with its own SQLite database; plugins register synchronous
//! `query` hooks and asynchronous `emit` listeners, defer background work onto
//! a shared worker pool, and serve HTTP requests routed to them by URL prefix.
//!
//! ## Architecture
//!
//! - [`config`]: loads and validates `config.toml`, with `PLUGINHOST_*` env overrides
//! - [`manager`]: owns the plugin list, hook registry, and job queue; runs `refresh()`
//! - [`plugin`]: one sandboxed Lua environment plus its SQLite connection
//! - [`lua_framework`]: the `core` Lua library installed into every plugin
//! - [`dispatch`]: `query` (synchronous, first match) and `emit` (asynchronous, all matches)
//! - [`queue`] / [`worker`]: the shared FIFO work queue and the OS-thread pool draining it
//! - [`router`]: prefix-matches an HTTP request to a plugin, or falls back to `default`
//! - [`template`]: renders `views/*.etlua` with `tera`
//! - [`server`] / [`middleware`]: axum wiring, CORS, and request logging
//! - [`value`]: the typed bridge for copying data between Lua states and JSON
//! - [`error`]: the error taxonomy shared across all of the above
//!
//! ## Quick Start
//!
//! ```no_run
//! use pluginhost::config::Config;
//! use pluginhost::server::create_server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml")?;
//!     config.validate()?;
//!     let app = create_server(&config)?;
//!     let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.server.port)).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod lua_framework;
pub mod manager;
pub mod middleware;
pub mod plugin;
pub mod queue;
pub mod registry;
pub mod router;
pub mod server;
pub mod template;
pub mod value;
pub mod worker;

pub use server::create_server;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum_test::TestServer;

    #[tokio::test]
    async fn server_serves_a_plugin_and_404s_everything_else() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("hello");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("plugin.lua"),
            "function handle_request(req) return { status = 200, body = \"hi\" } end",
        )
        .unwrap();

        let mut config = Config::default();
        config.runtime.plugins_dir = dir.path().to_string_lossy().to_string();
        config.runtime.worker_count = 1;

        let app = create_server(&config).unwrap();
        let server = TestServer::new(app).unwrap();

        let hello = server.get("/hello/").await;
        assert_eq!(hello.status_code(), 200);
        assert_eq!(hello.text(), "hi");

        let missing = server.get("/nope").await;
        assert_eq!(missing.status_code(), 404);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
    }
}

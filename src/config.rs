//! # Configuration Management Module
//!
//! Loads, validates, and applies environment-variable overrides to the plugin
//! host's settings. A `config.toml` file provides defaults; `PLUGINHOST_*`
//! environment variables override specific fields; [`Config::validate`] rejects
//! nonsensical values before the server binds a socket.
//!
//! ## Configuration File Example
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8888
//! timeout = "30s"
//! max_body_size = 10485760
//!
//! [server.cors]
//! enabled = false
//! allowed_origins = []
//!
//! [runtime]
//! plugins_dir = "./plugins"
//! worker_count = 4
//! max_recursion_depth = 10
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the plugin host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration: bind address, timeouts, body size, and CORS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Upper bound on request body size; requests over this are rejected with 413.
    pub max_body_size: usize,
    pub cors: CorsConfig,
}

/// CORS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
}

/// Plugin runtime configuration: where plugins live, how many workers drain the
/// job queue, and how deep a `query` chain may recurse before failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub plugins_dir: String,
    pub worker_count: usize,
    pub max_recursion_depth: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8888,
                timeout: Duration::from_secs(30),
                max_body_size: 10 * 1024 * 1024,
                cors: CorsConfig {
                    enabled: false,
                    allowed_origins: vec![],
                },
            },
            runtime: RuntimeConfig {
                plugins_dir: "./plugins".to_string(),
                worker_count: 4,
                max_recursion_depth: 10,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file, falling back to defaults if the file
    /// does not exist, then applies environment overrides.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let text = std::fs::read_to_string(path)?;
            toml::from_str(&text)?
        } else {
            Config::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Applies `PLUGINHOST_*` environment variable overrides on top of whatever was
    /// loaded from file or defaults.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = std::env::var("PLUGINHOST_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("PLUGINHOST_PORT") {
            self.server.port = port.parse()?;
        }
        if let Ok(timeout) = std::env::var("PLUGINHOST_TIMEOUT") {
            self.server.timeout = parse_duration(&timeout)?;
        }
        if let Ok(level) = std::env::var("PLUGINHOST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(dir) = std::env::var("PLUGINHOST_PLUGINS_DIR") {
            self.runtime.plugins_dir = dir;
        }
        if let Ok(workers) = std::env::var("PLUGINHOST_WORKERS") {
            self.runtime.worker_count = workers.parse()?;
        }
        Ok(())
    }

    /// Rejects configurations that could never serve traffic correctly.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must be nonzero");
        }
        if self.server.max_body_size == 0 {
            anyhow::bail!("server.max_body_size must be nonzero");
        }
        if self.runtime.worker_count == 0 {
            anyhow::bail!("runtime.worker_count must be at least 1");
        }
        if self.runtime.max_recursion_depth == 0 {
            anyhow::bail!("runtime.max_recursion_depth must be at least 1");
        }
        Ok(())
    }
}

/// Parses a duration string like `"30s"`, `"1m"`, `"2h"`, or `"500ms"`.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return Ok(Duration::from_millis(ms.parse()?));
    }
    if let Some(secs) = s.strip_suffix('s') {
        return Ok(Duration::from_secs(secs.parse()?));
    }
    if let Some(mins) = s.strip_suffix('m') {
        return Ok(Duration::from_secs(mins.parse::<u64>()? * 60));
    }
    if let Some(hours) = s.strip_suffix('h') {
        return Ok(Duration::from_secs(hours.parse::<u64>()? * 3600));
    }
    anyhow::bail!("invalid duration format: '{}'", s)
}

mod duration_serde {
    use super::parse_duration;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{}ms", d.as_millis()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

//! # Plugin Host Binary
//!
//! Loads configuration, builds the server, and serves HTTP until interrupted.
//!
//! ```bash
//! pluginhost --config config.toml
//! pluginhost --host 0.0.0.0 --port 8080
//! pluginhost --log-level debug
//! ```

use clap::Parser;
use pluginhost::config::Config;
use pluginhost::server::create_server;
use std::net::SocketAddr;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Port number for the HTTP server; overrides the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Host address to bind the server to; overrides the config file.
    #[arg(long)]
    host: Option<String>,

    /// Logging level: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, path = %args.config, "failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    let app = match create_server(&config) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!(%addr, "plugin host listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

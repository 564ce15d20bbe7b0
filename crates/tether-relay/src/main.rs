//! # Tether Relay
//!
//! Development messaging service for Tether clients.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! tether-relay
//!
//! # Run with custom config
//! tether-relay --config /path/to/tether-relay.toml
//!
//! # Run with environment variables
//! TETHER_RELAY__PORT=8080 TETHER_RELAY__HOST=0.0.0.0 tether-relay
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tether_relay::{run_server, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tether development relay
#[derive(Parser, Debug)]
#[command(name = "tether-relay")]
#[command(about = "Development messaging service speaking the Tether protocol")]
#[command(version)]
struct Args {
    /// Read this TOML file instead of searching the default locations.
    /// Environment overrides are not applied to it.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => Config::from_file(path),
            None => Config::load(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_relay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.load_config()?;
    tracing::info!("Starting Tether relay on {}:{}", config.host, config.port);

    run_server(config).await
}

//! # Murmur Server
//!
//! Long-poll chat server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! murmur
//!
//! # Run with a config file in the working directory
//! cp murmur.example.toml murmur.toml && murmur
//!
//! # Run with environment variables
//! MURMUR_PORT=8080 MURMUR_HOST=0.0.0.0 murmur
//! ```
//!
//! ## Endpoints
//!
//! - `POST /a/message/new` - publish `{"body": "...", "room": "...", "author": "..."}`
//! - `POST /a/message/updates` - long-poll with `{"cursor": "<last id>", "room": "..."}`
//! - `GET /a/stats` - per-room buffer statistics
//! - `GET /health` - liveness

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "murmur_server=debug,murmur_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting Murmur server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}

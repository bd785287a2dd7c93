//! # Beacon
//!
//! Topic-based publish/subscribe broker.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (port 1234)
//! beacon
//!
//! # Bind a different port
//! beacon 4000
//!
//! # Run with environment variables
//! BEACON_PORT=4000 BEACON_HOST=127.0.0.1 beacon
//! ```

mod config;
mod metrics;
mod server;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=info,beacon_core=info,beacon_transport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = config::Config::load()?;
    if let Some(port) = std::env::args().nth(1) {
        config.port = port
            .parse()
            .with_context(|| format!("Invalid port: {}", port))?;
    }

    tracing::info!("Starting Beacon broker on {}:{}", config.host, config.port);

    server::run_server(config).await?;

    Ok(())
}

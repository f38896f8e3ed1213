//! Ticketing server.
//!
//! Serves the HTTP API and runs the expiry sweep and the payout schedulers.
//!
//! # Usage
//!
//! ```bash
//! # In-memory storage, simulated payouts
//! cargo run --bin server
//!
//! # PostgreSQL and an HTTP payout adapter
//! DATABASE_URL=postgres://localhost/boxoffice \
//! PAYOUT_BASE_URL=http://localhost:7070 PAYOUT_API_KEY=... \
//! cargo run --bin server
//! ```

use ticketing::config::StorageConfig;
use ticketing::{Config, TicketingApp};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ticketing=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ticketing server...");

    let config = Config::from_env()?;
    let storage = match &config.storage {
        StorageConfig::Memory => "memory",
        StorageConfig::Postgres(_) => "postgres",
    };
    tracing::info!(
        http = %config.http_addr(),
        metrics = %config.metrics_addr(),
        storage,
        "Configuration loaded"
    );

    let app = TicketingApp::new(config).await?;
    tracing::info!("Application initialized");

    app.run().await?;
    Ok(())
}

//! tradegate - Headless order-management service
//!
//! Accepts trade intents, validates and risk-checks them, routes each
//! accepted order to a broker, executes with at-most-once semantics and
//! reconciles fills into the portfolio view. Metrics are pushed via
//! structured JSON logs to stdout - no HTTP server, no incoming
//! connections.
//!
//! # Usage
//! ```sh
//! MODE=mock cargo run
//! ```
//!
//! # Environment Variables
//! - `MODE` - `live` (HTTP adapters) or `mock` (in-process), default mock
//! - `DATABASE_URL` - SQLite url (default sqlite://data/tradegate.db)
//! - `OBSERVABILITY_ENABLED` - Enable metrics reporting (default: true)
//! - `OBSERVABILITY_INTERVAL` - Seconds between metric outputs (default: 60)
//!
//! Metrics are output as JSON to stdout with prefix `METRICS_JSON:` for
//! collection by log aggregators.

use anyhow::Result;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

use tradegate::application::Application;
use tradegate::config::Config;
use tradegate::infrastructure::observability::MetricsReporter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Setup logging (stdout only)
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("tradegate {} starting...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: Mode={:?}, Brokers={:?}",
        config.mode,
        config
            .services
            .brokers
            .iter()
            .map(|b| b.name.as_str())
            .collect::<Vec<_>>()
    );

    // Build and start the application
    info!("Building order-management core...");
    let app = Application::build(config.clone()).await?;

    info!("Starting lifecycle scheduler...");
    let _handles = app.start();

    // Start metrics reporter if enabled
    if config.observability.enabled {
        let reporter = MetricsReporter::new(
            app.metrics.clone(),
            app.breakers.clone(),
            app.portfolio.clone(),
            app.health.clone(),
            config.observability.interval_secs,
        );

        tokio::spawn(async move {
            reporter.run().await;
        });

        info!(
            "Metrics reporter started (interval: {}s)",
            config.observability.interval_secs
        );
    } else {
        info!("Metrics reporting disabled.");
    }

    info!("Service running. Press Ctrl+C to shutdown.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting...");

    Ok(())
}

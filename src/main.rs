//! Entrypoint: set up tracing, connect the Postgres pool, ensure the schema,
//! optionally load the dataset, then serve analytics, metrics & health over HTTP.
//!
//! This application uses a strongly-typed configuration (`Settings`) defined in `config.rs`,
//! which provides:
//!  - `database.*`         – Postgres location, credentials and pool sizing
//!  - `server_bind`        – HTTP bind address
//!  - `ingest.*`           – source directory, file names, null token, load schedule
//!  - `query_timeout`      – deadline for each analytic query

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use rust_flights_analytics::config::Settings;
use rust_flights_analytics::db::Database;
use rust_flights_analytics::ingestor::{IngestOptions, Ingestor};
use rust_flights_analytics::query::QueryEngine;
use rust_flights_analytics::schema::SchemaManager;
use rust_flights_analytics::server::{self, AppState};

/// Application entrypoint for the OpenFlights analytics service.
///
/// **Workflow**:
/// 1. Initialise tracing/logging from `RUST_LOG` (or default to `info`).
/// 2. Load `Config.toml` (and apply any `APP__…` env-var overrides).
/// 3. Open the Postgres pool and ensure the schema exists.
/// 4. Optionally load the dataset once, and optionally keep reloading it on
///    `ingest.interval`.
/// 5. Serve HTTP until Ctrl-C, then drain requests and close the pool.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ───────────────────────────────────────────────────────────────
    // 1. Initialise tracing / logging
    // ───────────────────────────────────────────────────────────────
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("Starting OpenFlights analytics service…");

    // ───────────────────────────────────────────────────────────────
    // 2. Load configuration
    // ───────────────────────────────────────────────────────────────
    let settings = Settings::new().context("loading configuration")?;
    info!(?settings, "Loaded configuration");

    let addr: SocketAddr = settings
        .server_bind
        .parse()
        .with_context(|| format!("invalid server_bind '{}'", settings.server_bind))?;

    // ───────────────────────────────────────────────────────────────
    // 3. Database pool & schema
    // ───────────────────────────────────────────────────────────────
    let db = Database::connect(&settings.database)
        .await
        .context("connecting to Postgres")?;

    SchemaManager::new(db.pool().clone())
        .ensure_schema()
        .await
        .context("ensuring schema")?;
    info!("Schema ready");

    let ingestor = Arc::new(Ingestor::new(
        db.pool().clone(),
        IngestOptions::from(&settings.ingest),
    ));
    let queries = QueryEngine::new(db.pool().clone(), settings.query_timeout);

    // ───────────────────────────────────────────────────────────────
    // 4. Initial load & reload schedule
    // ───────────────────────────────────────────────────────────────
    if settings.ingest.load_on_startup {
        // A failed startup load leaves whatever was loaded before; keep serving it.
        if let Err(e) = ingestor.load_all(None).await {
            warn!(error = %e, "Startup load failed");
        }
    }

    if let Some(every) = settings.ingest.interval {
        let ingestor = ingestor.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the startup load covers it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!("Scheduled reload");
                // load_all already logs and counts the failure.
                if let Err(e) = ingestor.load_all(None).await {
                    debug!(error = %e, "Scheduled reload failed");
                }
            }
        });
        info!(interval = %humantime::format_duration(every), "Scheduled periodic reloads");
    }

    // ───────────────────────────────────────────────────────────────
    // 5. HTTP server
    // ───────────────────────────────────────────────────────────────
    let state = Arc::new(AppState {
        db: db.clone(),
        ingestor,
        queries,
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    let served = server::serve(state, addr, shutdown).await;

    db.close().await;
    served.context("HTTP server failed")?;
    info!("Shutdown complete");
    Ok(())
}

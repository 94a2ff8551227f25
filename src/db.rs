//! Process-wide Postgres pool shared by the loader and the query engine.

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseSettings;
use crate::errors::AppError;

/// Owns the pool for the lifetime of the process: built once by
/// [`Database::connect`], cloned into every component, closed by
/// [`Database::close`].
#[derive(Clone, Debug)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Build the pool and open the first connection, so a bad host or bad
    /// credentials fail at startup rather than on the first request.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, AppError> {
        let pool = pool_options(settings)
            .connect_with(connect_options(settings)?)
            .await
            .map_err(AppError::Unavailable)?;

        info!(
            host = %settings.host,
            database = %settings.name,
            max_connections = settings.max_connections,
            "Connected to Postgres"
        );
        Ok(Database { pool })
    }

    /// Wrap an existing pool (tests, or callers that manage their own).
    pub fn from_pool(pool: PgPool) -> Self {
        Database { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip `SELECT 1` through the pool.
    pub async fn health_check(&self) -> Result<i32, AppError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::from_query)
    }

    /// Wait for checked-out connections to come back, then close them all.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Postgres pool closed");
    }
}

/// Connection target: the explicit URL when configured, otherwise the
/// discrete host/port/user/password/name fields.
pub fn connect_options(settings: &DatabaseSettings) -> Result<PgConnectOptions, AppError> {
    match &settings.url {
        Some(url) => url.parse::<PgConnectOptions>().map_err(|e| {
            AppError::Config(config::ConfigError::Message(format!(
                "invalid database.url: {}",
                e
            )))
        }),
        None => Ok(PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.name)),
    }
}

/// Pool sizing plus liveness: connections are pinged before reuse and
/// replaced after `max_lifetime`.
pub fn pool_options(settings: &DatabaseSettings) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections.min(settings.max_connections))
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(non_zero(settings.idle_timeout))
        .max_lifetime(non_zero(settings.max_lifetime))
        .test_before_acquire(true)
}

// Zero disables the limit.
fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

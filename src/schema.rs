//! Idempotent DDL for the three dataset tables and their lookup indexes.

use sqlx::{PgConnection, PgPool};
use tracing::debug;

use crate::errors::AppError;
use crate::ingestor::LOAD_LOCK_KEY;

/// Statements run in order; each is a no-op when its object already exists.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS airports (
        id          INTEGER PRIMARY KEY,
        name        TEXT,
        city        TEXT,
        country     TEXT,
        iata        TEXT,
        icao        TEXT,
        latitude    DOUBLE PRECISION,
        longitude   DOUBLE PRECISION,
        altitude    INTEGER,
        timezone    DOUBLE PRECISION,
        dst         TEXT,
        tz          TEXT,
        "type"      TEXT,
        source      TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS airlines (
        id          INTEGER PRIMARY KEY,
        name        TEXT,
        alias       TEXT,
        iata        TEXT,
        icao        TEXT,
        callsign    TEXT,
        country     TEXT,
        active      TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS routes (
        id              INTEGER PRIMARY KEY,
        airline         TEXT,
        airline_id      INTEGER,
        src_airport     TEXT,
        src_airport_id  INTEGER,
        dst_airport     TEXT,
        dst_airport_id  INTEGER,
        codeshare       TEXT,
        stops           INTEGER,
        equipment       TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_airports_iata ON airports (iata)",
    "CREATE INDEX IF NOT EXISTS idx_routes_src_dst ON routes (src_airport_id, dst_airport_id)",
];

/// Create any missing table or index on `conn`. Inside a transaction the DDL
/// commits or rolls back with it.
pub async fn ensure_schema_on(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    for stmt in SCHEMA_STATEMENTS {
        sqlx::query(*stmt).execute(&mut *conn).await?;
    }
    debug!("Schema ensured");
    Ok(())
}

/// Owns schema creation for startup, outside of any load.
#[derive(Clone, Debug)]
pub struct SchemaManager {
    pool: PgPool,
}

impl SchemaManager {
    pub fn new(pool: PgPool) -> Self {
        SchemaManager { pool }
    }

    /// Safe to call on every startup: existing objects and their rows are
    /// left untouched. Holds the load lock so processes starting together do
    /// not race on the same `CREATE`.
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(AppError::Unavailable)?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(LOAD_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(AppError::from_load)?;
        ensure_schema_on(&mut tx).await.map_err(AppError::from_load)?;

        tx.commit().await.map_err(AppError::from_load)
    }
}

//! ingestor.rs
//!
//! Core load logic: parse the three source files, dedupe keyed entities, and
//! replace the contents of the `airports`, `airlines` and `routes` tables in a
//! single transaction. Readers see either the previous snapshot or the new
//! one, never a mix.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::query_builder::Separated;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info};

use crate::config::IngestSettings;
use crate::errors::AppError;
use crate::metrics::{LOAD_COUNTER, LOAD_HISTOGRAM, ROWS_LOADED};
use crate::models::{Airline, Airport, Route};
use crate::parser::{read_dataset, Dataset, SourcePaths, DEFAULT_NULL_TOKEN};
use crate::schema::ensure_schema_on;

/// Key for `pg_advisory_xact_lock`, shared by every process loading into the
/// same database.
pub const LOAD_LOCK_KEY: i64 = 0x6f70_656e_666c_7473;

/// Rows per multi-row INSERT. The widest table has 14 columns, which keeps a
/// statement well under Postgres' 65535 bind parameters.
const INSERT_CHUNK_ROWS: usize = 1000;

/// Where to find the source files and how long a load may take.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub data_dir: PathBuf,
    pub airports_file: String,
    pub airlines_file: String,
    pub routes_file: String,
    pub null_token: String,
    pub timeout: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        IngestOptions {
            data_dir: PathBuf::from("data"),
            airports_file: "airports.dat".into(),
            airlines_file: "airlines.dat".into(),
            routes_file: "routes.dat".into(),
            null_token: DEFAULT_NULL_TOKEN.into(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl From<&IngestSettings> for IngestOptions {
    fn from(s: &IngestSettings) -> Self {
        IngestOptions {
            data_dir: s.data_dir.clone(),
            airports_file: s.airports_file.clone(),
            airlines_file: s.airlines_file.clone(),
            routes_file: s.routes_file.clone(),
            null_token: s.null_token.clone(),
            timeout: s.timeout,
        }
    }
}

/// Outcome of a successful load.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub airports: usize,
    pub airlines: usize,
    pub routes: usize,
    /// Rows skipped because an earlier row had the same id
    pub airports_dropped: usize,
    pub airlines_dropped: usize,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub loaded_at: DateTime<Utc>,
}

/// A table that can be refilled from parsed rows.
trait TableRow {
    const TABLE: &'static str;
    /// Column list in bind order, including the parentheses.
    const COLUMNS: &'static str;

    fn push_row<'args>(&'args self, b: &mut Separated<'_, 'args, Postgres, &'static str>);
}

impl TableRow for Airport {
    const TABLE: &'static str = "airports";
    const COLUMNS: &'static str = r#"(id, name, city, country, iata, icao, latitude, longitude, altitude, timezone, dst, tz, "type", source)"#;

    fn push_row<'args>(&'args self, b: &mut Separated<'_, 'args, Postgres, &'static str>) {
        b.push_bind(self.id)
            .push_bind(self.name.as_deref())
            .push_bind(self.city.as_deref())
            .push_bind(self.country.as_deref())
            .push_bind(self.iata.as_deref())
            .push_bind(self.icao.as_deref())
            .push_bind(self.latitude)
            .push_bind(self.longitude)
            .push_bind(self.altitude)
            .push_bind(self.timezone)
            .push_bind(self.dst.as_deref())
            .push_bind(self.tz.as_deref())
            .push_bind(self.airport_type.as_deref())
            .push_bind(self.source.as_deref());
    }
}

impl TableRow for Airline {
    const TABLE: &'static str = "airlines";
    const COLUMNS: &'static str = "(id, name, alias, iata, icao, callsign, country, active)";

    fn push_row<'args>(&'args self, b: &mut Separated<'_, 'args, Postgres, &'static str>) {
        b.push_bind(self.id)
            .push_bind(self.name.as_deref())
            .push_bind(self.alias.as_deref())
            .push_bind(self.iata.as_deref())
            .push_bind(self.icao.as_deref())
            .push_bind(self.callsign.as_deref())
            .push_bind(self.country.as_deref())
            .push_bind(self.active.as_deref());
    }
}

impl TableRow for Route {
    const TABLE: &'static str = "routes";
    const COLUMNS: &'static str = "(id, airline, airline_id, src_airport, src_airport_id, dst_airport, dst_airport_id, codeshare, stops, equipment)";

    fn push_row<'args>(&'args self, b: &mut Separated<'_, 'args, Postgres, &'static str>) {
        b.push_bind(self.id)
            .push_bind(self.airline.as_deref())
            .push_bind(self.airline_id)
            .push_bind(self.src_airport.as_deref())
            .push_bind(self.src_airport_id)
            .push_bind(self.dst_airport.as_deref())
            .push_bind(self.dst_airport_id)
            .push_bind(self.codeshare.as_deref())
            .push_bind(self.stops)
            .push_bind(self.equipment.as_deref());
    }
}

/// Delete every row of `T`'s table, then insert `rows` in file order.
async fn replace_table<T: TableRow>(conn: &mut PgConnection, rows: &[T]) -> Result<(), sqlx::Error> {
    let delete = format!("DELETE FROM {}", T::TABLE);
    sqlx::query(&delete).execute(&mut *conn).await?;

    for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO {} {} ", T::TABLE, T::COLUMNS));
        qb.push_values(chunk, |mut b, row| row.push_row(&mut b));
        qb.build().execute(&mut *conn).await?;
    }

    info!(table = T::TABLE, rows = rows.len(), "Replaced table contents");
    Ok(())
}

/// Loads the dataset into the store. One load runs at a time per process;
/// the advisory lock extends that to every process sharing the database.
#[derive(Debug)]
pub struct Ingestor {
    pool: PgPool,
    options: IngestOptions,
    lock: Mutex<()>,
}

impl Ingestor {
    pub fn new(pool: PgPool, options: IngestOptions) -> Self {
        Ingestor {
            pool,
            options,
            lock: Mutex::new(()),
        }
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Paths of the three source files under `dir`.
    pub fn source_paths(&self, dir: &Path) -> SourcePaths {
        SourcePaths::in_dir(
            dir,
            &self.options.airports_file,
            &self.options.airlines_file,
            &self.options.routes_file,
        )
    }

    /// Replace the whole dataset with the files in `source_dir` (or the
    /// configured data directory).
    ///
    /// # Errors
    ///
    /// * `SourceMissing` / `SourceRead` / `MalformedRow` if any file is unusable;
    ///   the store is not touched.
    /// * `Unavailable` / `Load` if the store fails mid-load; the transaction is
    ///   rolled back.
    /// * `Timeout` if the configured deadline passes; the open transaction is
    ///   dropped, which rolls it back.
    pub async fn load_all(&self, source_dir: Option<&Path>) -> Result<LoadReport, AppError> {
        self.load_all_within(source_dir, self.options.timeout).await
    }

    /// [`Ingestor::load_all`] with a caller-supplied deadline.
    pub async fn load_all_within(
        &self,
        source_dir: Option<&Path>,
        deadline: Duration,
    ) -> Result<LoadReport, AppError> {
        let start = Instant::now();

        let result = match timeout(deadline, self.load_locked(source_dir)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout {
                operation: "load",
                after: deadline,
            }),
        };

        LOAD_HISTOGRAM.observe(start.elapsed().as_secs_f64());
        match &result {
            Ok(report) => {
                LOAD_COUNTER.with_label_values(&["ok"]).inc();
                ROWS_LOADED.with_label_values(&["airports"]).set(report.airports as i64);
                ROWS_LOADED.with_label_values(&["airlines"]).set(report.airlines as i64);
                ROWS_LOADED.with_label_values(&["routes"]).set(report.routes as i64);
                info!(
                    airports = report.airports,
                    airlines = report.airlines,
                    routes = report.routes,
                    airports_dropped = report.airports_dropped,
                    airlines_dropped = report.airlines_dropped,
                    elapsed = %humantime::format_duration(report.elapsed),
                    "Dataset load complete"
                );
            }
            Err(e) => {
                LOAD_COUNTER.with_label_values(&["error"]).inc();
                error!(error = %e, "Dataset load failed; previous data kept");
            }
        }

        result
    }

    async fn load_locked(&self, source_dir: Option<&Path>) -> Result<LoadReport, AppError> {
        // Dropped on every exit path, including cancellation by the timeout.
        let _guard = self.lock.lock().await;
        let start = Instant::now();

        let dir = source_dir.unwrap_or(self.options.data_dir.as_path());
        let paths = self.source_paths(dir);
        info!(dir = %dir.display(), "Starting dataset load");

        let null_token = self.options.null_token.clone();
        let dataset = tokio::task::spawn_blocking(move || read_dataset(&paths, &null_token)).await??;

        self.replace_all(&dataset).await.map_err(AppError::from_load)?;

        Ok(LoadReport {
            airports: dataset.airports.len(),
            airlines: dataset.airlines.len(),
            routes: dataset.routes.len(),
            airports_dropped: dataset.airports_dropped,
            airlines_dropped: dataset.airlines_dropped,
            elapsed: start.elapsed(),
            loaded_at: Utc::now(),
        })
    }

    /// Schema check plus the three replaces, committed together. An early
    /// return drops `tx`, which rolls everything back.
    async fn replace_all(&self, dataset: &Dataset) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(LOAD_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        ensure_schema_on(&mut tx).await?;
        replace_table(&mut tx, &dataset.airports).await?;
        replace_table(&mut tx, &dataset.airlines).await?;
        replace_table(&mut tx, &dataset.routes).await?;

        tx.commit().await
    }
}

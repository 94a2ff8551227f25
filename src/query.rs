//! query.rs
//!
//! Read-only analytics over the loaded snapshot: most-connected airports,
//! routes between two airports, and nearest airports to a point.
//!
//! Inputs are validated before any connection is taken from the pool. Every
//! query runs under the engine's deadline and is never retried here.

use std::future::Future;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::metrics::{QUERY_COUNTER, QUERY_HISTOGRAM};
use crate::models::{NearbyAirport, RouteBetween, TopAirport};

pub const TOP_AIRPORTS_MAX: u32 = 100;
pub const NEAREST_MAX: u32 = 50;
/// Hard cap on rows returned by [`QueryEngine::routes_between`].
pub const ROUTES_BETWEEN_CAP: i64 = 200;
pub const EARTH_RADIUS_KM: f64 = 6371.0;

// Each route is paired with each distinct endpoint, so a route whose source
// and destination are the same airport counts once for it.
const TOP_AIRPORTS_SQL: &str = r#"
    WITH endpoints AS (
        SELECT id AS route_id, src_airport_id AS airport_id FROM routes
        UNION
        SELECT id AS route_id, dst_airport_id AS airport_id FROM routes
    )
    SELECT a.iata, a.name, COUNT(e.route_id) AS route_count
    FROM airports a
    JOIN endpoints e ON e.airport_id = a.id
    GROUP BY a.id
    ORDER BY route_count DESC, a.id ASC
    LIMIT $1
"#;

const ROUTES_BETWEEN_SQL: &str = r#"
    SELECT r.id, sa.iata AS src_iata, da.iata AS dst_iata, r.stops, r.equipment
    FROM routes r
    JOIN airports sa ON sa.id = r.src_airport_id
    JOIN airports da ON da.id = r.dst_airport_id
    WHERE sa.iata = $1 AND da.iata = $2
    ORDER BY r.stops ASC NULLS LAST, r.id ASC
    LIMIT $3
"#;

// Haversine in SQL. LEAST keeps rounding from pushing ASIN out of its domain
// for near-antipodal points.
const NEAREST_AIRPORTS_SQL: &str = r#"
    SELECT id, iata, name,
           $4::float8 * 2 * ASIN(LEAST(1.0, SQRT(
               POWER(SIN(RADIANS(latitude - $1::float8) / 2), 2)
               + COS(RADIANS($1::float8)) * COS(RADIANS(latitude))
                 * POWER(SIN(RADIANS(longitude - $2::float8) / 2), 2)
           ))) AS distance_km
    FROM airports
    WHERE latitude IS NOT NULL AND longitude IS NOT NULL
    ORDER BY distance_km ASC, id ASC
    LIMIT $3
"#;

/// Great-circle distance in kilometres between two points given in degrees.
/// Same formula the store evaluates for [`QueryEngine::nearest_airports`].
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Check `value` lies in `1..=max`.
pub fn validate_limit(name: &str, value: u32, max: u32) -> Result<i64, AppError> {
    if (1..=max).contains(&value) {
        Ok(i64::from(value))
    } else {
        Err(AppError::InvalidInput(format!(
            "{} must be between 1 and {}, got {}",
            name, max, value
        )))
    }
}

/// Trim and upper-case an airport code, which must be 3 or 4 characters.
pub fn normalize_code(name: &str, code: &str) -> Result<String, AppError> {
    let code = code.trim();
    let len = code.chars().count();
    if !(3..=4).contains(&len) {
        return Err(AppError::InvalidInput(format!(
            "{} must be 3 or 4 characters, got '{}'",
            name, code
        )));
    }
    Ok(code.to_uppercase())
}

pub fn validate_point(lat: f64, lon: f64) -> Result<(), AppError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(AppError::InvalidInput(format!(
            "lat must be within [-90, 90], got {}",
            lat
        )));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(AppError::InvalidInput(format!(
            "lon must be within [-180, 180], got {}",
            lon
        )));
    }
    Ok(())
}

/// Executes the analytic queries against the shared pool.
#[derive(Clone, Debug)]
pub struct QueryEngine {
    pool: PgPool,
    timeout: Duration,
}

impl QueryEngine {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        QueryEngine { pool, timeout }
    }

    /// Same engine with a different per-query deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        QueryEngine {
            pool: self.pool.clone(),
            timeout,
        }
    }

    /// Airports ranked by the number of routes that start or end there,
    /// busiest first; equal counts are ordered by airport id.
    pub async fn top_airports(&self, limit: u32) -> Result<Vec<TopAirport>, AppError> {
        let limit = validate_limit("limit", limit, TOP_AIRPORTS_MAX)?;

        self.run(
            "top_airports",
            sqlx::query_as::<_, TopAirport>(TOP_AIRPORTS_SQL)
                .bind(limit)
                .fetch_all(&self.pool),
        )
        .await
    }

    /// Routes flying from `src` to `dst` (IATA codes, any case), fewest stops
    /// first, then by route id. Unknown codes give an empty list.
    pub async fn routes_between(&self, src: &str, dst: &str) -> Result<Vec<RouteBetween>, AppError> {
        let src = normalize_code("src", src)?;
        let dst = normalize_code("dst", dst)?;

        self.run(
            "routes_between",
            sqlx::query_as::<_, RouteBetween>(ROUTES_BETWEEN_SQL)
                .bind(&src)
                .bind(&dst)
                .bind(ROUTES_BETWEEN_CAP)
                .fetch_all(&self.pool),
        )
        .await
    }

    /// The `k` airports closest to (`lat`, `lon`) by haversine distance.
    /// Airports without coordinates are never ranked. This scans every
    /// airport, which is fine for the few thousand in the dataset.
    pub async fn nearest_airports(
        &self,
        lat: f64,
        lon: f64,
        k: u32,
    ) -> Result<Vec<NearbyAirport>, AppError> {
        validate_point(lat, lon)?;
        let k = validate_limit("k", k, NEAREST_MAX)?;

        self.run(
            "nearest_airports",
            sqlx::query_as::<_, NearbyAirport>(NEAREST_AIRPORTS_SQL)
                .bind(lat)
                .bind(lon)
                .bind(k)
                .bind(EARTH_RADIUS_KM)
                .fetch_all(&self.pool),
        )
        .await
    }

    async fn run<T, F>(&self, operation: &'static str, query: F) -> Result<Vec<T>, AppError>
    where
        F: Future<Output = Result<Vec<T>, sqlx::Error>>,
    {
        let start = Instant::now();

        let result = match timeout(self.timeout, query).await {
            Ok(rows) => rows.map_err(AppError::from_query),
            Err(_) => Err(AppError::Timeout {
                operation,
                after: self.timeout,
            }),
        };

        let elapsed = start.elapsed().as_secs_f64();
        QUERY_HISTOGRAM.with_label_values(&[operation]).observe(elapsed);

        match &result {
            Ok(rows) => {
                QUERY_COUNTER.with_label_values(&[operation, "ok"]).inc();
                debug!(operation, rows = rows.len(), duration_s = elapsed, "Query complete");
            }
            Err(e) => {
                QUERY_COUNTER.with_label_values(&[operation, "error"]).inc();
                warn!(operation, error = %e, duration_s = elapsed, "Query failed");
            }
        }

        result
    }
}

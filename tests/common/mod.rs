//! Common helpers for database-backed integration tests.
//!
//! Each `TestStore` gets its own Postgres schema and a pool whose
//! `search_path` points at it, so tests can run in parallel against one
//! database without seeing each other's tables. `TEST_DATABASE_URL` picks
//! the database; without it the local `flights_test` database is used, and a
//! test fails if that cannot be reached.
//!
//! ```no_run
//! let store = TestStore::new().await;
//! // ... use store.pool ...
//! store.cleanup().await;
//! ```

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use rust_flights_analytics::ingestor::{IngestOptions, Ingestor};
use rust_flights_analytics::models::{Airline, Airport, Route};
use rust_flights_analytics::query::QueryEngine;

static NEXT_SCHEMA: AtomicUsize = AtomicUsize::new(0);

pub struct TestStore {
    pub pool: PgPool,
    url: String,
    schema: String,
}

impl TestStore {
    pub async fn new() -> Self {
        let url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/flights_test".to_string());

        let schema = format!(
            "flights_test_{}_{}",
            std::process::id(),
            NEXT_SCHEMA.fetch_add(1, Ordering::SeqCst)
        );

        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .unwrap_or_else(|e| panic!("Failed to connect to test database {}: {}", url, e));
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema))
            .execute(&admin)
            .await
            .expect("Failed to drop stale schema");
        sqlx::query(&format!("CREATE SCHEMA {}", schema))
            .execute(&admin)
            .await
            .expect("Failed to create test schema");
        admin.close().await;

        let options = url
            .parse::<PgConnectOptions>()
            .expect("Invalid TEST_DATABASE_URL")
            .options([("search_path", schema.as_str())]);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .expect("Failed to connect test pool");

        TestStore { pool, url, schema }
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(self.pool.clone(), IngestOptions::default())
    }

    pub fn queries(&self) -> QueryEngine {
        QueryEngine::new(self.pool.clone(), Duration::from_secs(10))
    }

    /// Every row of every table, in key order.
    pub async fn snapshot(&self) -> (Vec<Airport>, Vec<Airline>, Vec<Route>) {
        let airports = sqlx::query_as::<_, Airport>("SELECT * FROM airports ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .expect("Failed to read airports");
        let airlines = sqlx::query_as::<_, Airline>("SELECT * FROM airlines ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .expect("Failed to read airlines");
        let routes = sqlx::query_as::<_, Route>("SELECT * FROM routes ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .expect("Failed to read routes");
        (airports, airlines, routes)
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .expect("Failed to count rows")
    }

    pub async fn cleanup(self) {
        self.pool.close().await;
        if let Ok(admin) = PgPoolOptions::new().max_connections(1).connect(&self.url).await {
            let _ = sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema))
                .execute(&admin)
                .await;
            admin.close().await;
        }
    }
}

/// Write the three source files into `dir`.
pub fn write_dataset(dir: &Path, airports: &str, airlines: &str, routes: &str) {
    fs::write(dir.join("airports.dat"), airports).expect("write airports.dat");
    fs::write(dir.join("airlines.dat"), airlines).expect("write airlines.dat");
    fs::write(dir.join("routes.dat"), routes).expect("write routes.dat");
}

pub const AIRPORTS: &str = r#"1,"Alpha Field","Alpha","Testland","AAA","TAAA",0,0,10,0,"N","Etc/UTC","airport","Fixture"
2,"Bravo Intl","Bravo","Testland","BBB","TBBB",0,1,20,0,"N","Etc/UTC","airport","Fixture"
3,"Charlie Regional","Charlie","Testland","CCC","TCCC",10,10,30,1,"E","Etc/GMT-1","airport","Fixture"
4,"Nullville","Nowhere","Testland","NUL",\N,\N,5,\N,\N,\N,\N,"airport","Fixture"
"#;

pub const AIRLINES: &str = r#"-1,"Unknown",\N,"-","N/A",\N,\N,"Y"
10,"Fixture Air",\N,"FX","FXA","FIXTURE","Testland","Y"
"#;

// id 1..6 in file order. Route 3 flies the reverse direction and route 5
// points at an airport that does not exist.
pub const ROUTES: &str = "FX,10,AAA,1,BBB,2,,0,738
FX,10,AAA,1,BBB,2,Y,1,320
FX,10,BBB,2,AAA,1,,0,738
FX,10,AAA,1,CCC,3,,0,777
FX,10,AAA,1,ZZZ,999,,0,777
FX,10,AAA,1,BBB,2,,0,319
";

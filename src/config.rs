//! Type-safe configuration loader using the `config` crate.
//!
//! Built-in defaults are overlaid by `Config.toml` (if present) and then by
//! `APP__`-prefixed environment variables, where `__` separates nested keys:
//!
//! - `APP__DATABASE__HOST`, `APP__DATABASE__PASSWORD`, `APP__DATABASE__URL`, ...
//! - `APP__SERVER_BIND`
//! - `APP__INGEST__DATA_DIR`, `APP__INGEST__INTERVAL`, ...

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Top-level application settings.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,

    /// HTTP bind address for analytics, metrics & health endpoints
    pub server_bind: String,

    pub ingest: IngestSettings,

    /// Deadline applied to every analytic query (e.g. "10s")
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
}

/// Store location, credentials and pool sizing.
#[derive(Deserialize, Clone)]
pub struct DatabaseSettings {
    /// Full Postgres URL; takes precedence over the discrete fields when set.
    #[serde(default)]
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,

    pub max_connections: u32,
    pub min_connections: u32,

    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Connections older than this are closed and replaced.
    #[serde(with = "humantime_serde")]
    pub max_lifetime: Duration,
}

// Hand-written so the password never reaches the logs.
impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_lifetime", &self.max_lifetime)
            .finish()
    }
}

/// Where the dataset lives and how loads are scheduled.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestSettings {
    /// Directory holding the three source files
    pub data_dir: PathBuf,
    pub airports_file: String,
    pub airlines_file: String,
    pub routes_file: String,

    /// Token that stands for an absent value in any field
    pub null_token: String,

    /// Run one load before the HTTP server starts
    pub load_on_startup: bool,

    /// Reload the dataset on this interval (e.g. "24h"); disabled when unset
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,

    /// Deadline for a whole load (e.g. "5m")
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Settings {
    /// Load settings from defaults, `Config.toml` (if present) and
    /// `APP__*` environment variables, in increasing precedence.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_builder(
            Config::builder()
                .add_source(File::with_name("Config").required(false))
                .add_source(
                    Environment::with_prefix("APP")
                        .prefix_separator("__")
                        .separator("__")
                        .try_parsing(true),
                ),
        )
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        builder
            .set_default("database.host", "127.0.0.1")?
            .set_default("database.port", 5432)?
            .set_default("database.user", "app")?
            .set_default("database.password", "apppw")?
            .set_default("database.name", "openflights")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.acquire_timeout", "5s")?
            .set_default("database.idle_timeout", "10m")?
            .set_default("database.max_lifetime", "1h")?
            .set_default("server_bind", "0.0.0.0:8080")?
            .set_default("query_timeout", "10s")?
            .set_default("ingest.data_dir", "data")?
            .set_default("ingest.airports_file", "airports.dat")?
            .set_default("ingest.airlines_file", "airlines.dat")?
            .set_default("ingest.routes_file", "routes.dat")?
            .set_default("ingest.null_token", "\\N")?
            .set_default("ingest.load_on_startup", false)?
            .set_default("ingest.timeout", "5m")?
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn defaults_fill_every_field() {
        let settings = Settings::from_builder(Config::builder()).unwrap();

        assert_eq!(settings.database.host, "127.0.0.1");
        assert_eq!(settings.database.port, 5432);
        assert_eq!(settings.database.name, "openflights");
        assert_eq!(settings.database.max_lifetime, Duration::from_secs(3600));
        assert_eq!(settings.ingest.null_token, "\\N");
        assert_eq!(settings.ingest.routes_file, "routes.dat");
        assert_eq!(settings.ingest.interval, None);
        assert_eq!(settings.query_timeout, Duration::from_secs(10));
    }

    #[test]
    fn file_values_override_defaults() {
        let toml = r#"
            server_bind = "127.0.0.1:9000"
            query_timeout = "2s"

            [database]
            host = "db.internal"
            max_connections = 3

            [ingest]
            data_dir = "/srv/openflights"
            interval = "24h"
        "#;
        let settings = Settings::from_builder(
            Config::builder().add_source(File::from_str(toml, FileFormat::Toml)),
        )
        .unwrap();

        assert_eq!(settings.server_bind, "127.0.0.1:9000");
        assert_eq!(settings.query_timeout, Duration::from_secs(2));
        assert_eq!(settings.database.host, "db.internal");
        assert_eq!(settings.database.max_connections, 3);
        assert_eq!(settings.database.user, "app");
        assert_eq!(settings.ingest.data_dir, PathBuf::from("/srv/openflights"));
        assert_eq!(settings.ingest.interval, Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn debug_output_hides_password() {
        let settings = Settings::from_builder(Config::builder()).unwrap();
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("apppw"));
        assert!(rendered.contains("<redacted>"));
    }
}

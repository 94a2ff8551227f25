//! Centralised error type for the loader, query engine and HTTP shell.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),

    #[error("Source file not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Failed to read {}: {source}", .path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Malformed row in {} at line {line}: {reason}", .path.display())]
    MalformedRow {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("Load failed: {0}")]
    Load(#[source] sqlx::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("{operation} timed out after {}", humantime::format_duration(*.after))]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Coarse failure classes, used for status mapping and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Unavailable,
    Ingestion,
    InvalidInput,
    Query,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Ingestion => "ingestion",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Query => "query",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Config(_) => ErrorKind::Config,
            AppError::Unavailable(_) => ErrorKind::Unavailable,
            AppError::SourceMissing(_)
            | AppError::SourceRead { .. }
            | AppError::MalformedRow { .. }
            | AppError::Load(_) => ErrorKind::Ingestion,
            AppError::InvalidInput(_) => ErrorKind::InvalidInput,
            AppError::Query(_) => ErrorKind::Query,
            AppError::Timeout { .. } => ErrorKind::Timeout,
            AppError::Task(_) => ErrorKind::Internal,
        }
    }

    /// Classify a store error raised while loading.
    pub fn from_load(e: sqlx::Error) -> Self {
        if is_connectivity(&e) {
            AppError::Unavailable(e)
        } else {
            AppError::Load(e)
        }
    }

    /// Classify a store error raised while answering a query.
    pub fn from_query(e: sqlx::Error) -> Self {
        if is_connectivity(&e) {
            AppError::Unavailable(e)
        } else {
            AppError::Query(e)
        }
    }
}

/// True when the store could not be reached or refused us, as opposed to a
/// statement failing on a healthy connection.
pub fn is_connectivity(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().as_deref().is_some_and(is_connectivity_state),
        _ => false,
    }
}

// SQLSTATE: 08 connection exception, 28 invalid authorization,
// 3D000 unknown database, 57P01..57P03 server shutting down / unavailable.
fn is_connectivity_state(code: &str) -> bool {
    code.starts_with("08")
        || code.starts_with("28")
        || matches!(code, "3D000" | "57P01" | "57P02" | "57P03")
}

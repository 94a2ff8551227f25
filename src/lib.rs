//! Library entrypoint: re‑export modules

pub mod config;
pub mod db;
pub mod errors;
pub mod ingestor;
pub mod metrics;
pub mod models;
pub mod parser;
pub mod query;
pub mod schema;
pub mod server;

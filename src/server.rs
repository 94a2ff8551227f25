//! HTTP shell over the loader and query engine.
//!
//! | Method | Path                           | Parameters            |
//! |--------|--------------------------------|-----------------------|
//! | GET    | `/health`                      |                       |
//! | POST   | `/load`                        | `dir` (optional)      |
//! | GET    | `/analytics/top-airports`      | `limit` (default 10)  |
//! | GET    | `/analytics/routes-between`    | `src`, `dst`          |
//! | GET    | `/analytics/nearest-airports`  | `lat`, `lon`, `k` (5) |
//! | GET    | `/metrics`                     |                       |

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::db::Database;
use crate::errors::{AppError, ErrorKind};
use crate::ingestor::Ingestor;
use crate::metrics;
use crate::query::QueryEngine;

const DEFAULT_TOP_LIMIT: u32 = 10;
const DEFAULT_NEAREST_K: u32 = 5;

/// Everything a request handler needs.
#[derive(Debug, Clone)]
pub struct AppState {
    pub db: Database,
    pub ingestor: Arc<Ingestor>,
    pub queries: QueryEngine,
}

/// Serve until `shutdown` resolves, then finish in-flight requests.
pub async fn serve<F>(state: Arc<AppState>, addr: SocketAddr, shutdown: F) -> Result<(), hyper::Error>
where
    F: Future<Output = ()>,
{
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let state = state.clone();
                async move { Ok::<_, Infallible>(handle(&state, req).await) }
            }))
        }
    });

    info!(%addr, "Starting HTTP server");
    Server::try_bind(&addr)?
        .serve(make_svc)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Route one request. Failures become JSON error bodies, never a dropped
/// connection.
pub async fn handle(state: &AppState, req: Request<Body>) -> Response<Body> {
    let params = query_params(&req);
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let result = match (&method, path.as_str()) {
        (&Method::GET, "/health") => health(state).await,
        (&Method::POST, "/load") => load(state, &params).await,
        (&Method::GET, "/analytics/top-airports") => top_airports(state, &params).await,
        (&Method::GET, "/analytics/routes-between") => routes_between(state, &params).await,
        (&Method::GET, "/analytics/nearest-airports") => nearest_airports(state, &params).await,
        (&Method::GET, "/metrics") => return metrics_response(),
        _ => return json_response(StatusCode::NOT_FOUND, json!({"status": "error", "detail": "not found"})),
    };

    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => error_response(&e),
    }
}

async fn health(state: &AppState) -> Result<Value, AppError> {
    let value = state.db.health_check().await?;
    Ok(json!({"status": "ok", "db": value}))
}

async fn load(state: &AppState, params: &HashMap<String, String>) -> Result<Value, AppError> {
    let dir = params.get("dir").map(PathBuf::from);
    let ingestor = state.ingestor.clone();

    // Detached so a client hanging up does not abort a load half way.
    let report = tokio::spawn(async move { ingestor.load_all(dir.as_deref()).await }).await??;
    Ok(json!({"status": "loaded", "report": report}))
}

async fn top_airports(state: &AppState, params: &HashMap<String, String>) -> Result<Value, AppError> {
    let limit = parse_param(params, "limit")?.unwrap_or(DEFAULT_TOP_LIMIT);
    let items = state.queries.top_airports(limit).await?;
    Ok(json!({"items": items}))
}

async fn routes_between(state: &AppState, params: &HashMap<String, String>) -> Result<Value, AppError> {
    let src = required(params, "src")?;
    let dst = required(params, "dst")?;
    let items = state.queries.routes_between(src, dst).await?;
    Ok(json!({"items": items}))
}

async fn nearest_airports(state: &AppState, params: &HashMap<String, String>) -> Result<Value, AppError> {
    let lat: f64 = parse_required(params, "lat")?;
    let lon: f64 = parse_required(params, "lon")?;
    let k = parse_param(params, "k")?.unwrap_or(DEFAULT_NEAREST_K);
    let items = state.queries.nearest_airports(lat, lon, k).await?;
    Ok(json!({"origin": {"lat": lat, "lon": lon}, "items": items}))
}

fn query_params(req: &Request<Body>) -> HashMap<String, String> {
    req.uri()
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> Result<&'a str, AppError> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| AppError::InvalidInput(format!("missing query parameter '{}'", name)))
}

fn parse_param<T: FromStr>(params: &HashMap<String, String>, name: &str) -> Result<Option<T>, AppError> {
    params
        .get(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| {
                AppError::InvalidInput(format!("query parameter '{}' has invalid value '{}'", name, raw))
            })
        })
        .transpose()
}

fn parse_required<T: FromStr>(params: &HashMap<String, String>, name: &str) -> Result<T, AppError> {
    parse_param(params, name)?
        .ok_or_else(|| AppError::InvalidInput(format!("missing query parameter '{}'", name)))
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Ingestion | ErrorKind::Query | ErrorKind::Config | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(e: &AppError) -> Response<Body> {
    let kind = e.kind();
    if kind != ErrorKind::InvalidInput {
        error!(kind = kind.as_str(), error = %e, "Request failed");
    }
    json_response(
        status_for(kind),
        json!({"status": "error", "kind": kind.as_str(), "detail": e.to_string()}),
    )
}

fn json_response(status: StatusCode, body: Value) -> Response<Body> {
    let mut resp = Response::new(Body::from(body.to_string()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

// Prometheus (v3+) rejects scrapes without the text exposition content type.
fn metrics_response() -> Response<Body> {
    let encoder = TextEncoder::new();
    let mut resp = Response::new(Body::from(metrics::gather_metrics()));
    if let Ok(mime) = HeaderValue::from_str(encoder.format_type()) {
        resp.headers_mut().insert(CONTENT_TYPE, mime);
    }
    resp
}

//! # Telemetry Query Service
//!
//! Read-only and housekeeping HTTP access to the log tree. Every route that
//! touches storage goes through the shared [`StorageGateway`], so a request can
//! fail with `500 Storage busy, try again` while the acquisition loop holds the
//! lock. User-supplied names are validated into a [`StoragePath`] before any
//! storage call.
//!
//! | Method | Path | Params |
//! |---|---|---|
//! | GET | `/` | |
//! | GET | `/days` | |
//! | GET | `/drives` | `day` |
//! | GET | `/drive` | `day`, `drive` |
//! | GET | `/live` | |
//! | GET | `/sdinfo` | |
//! | DELETE | `/delete` | `path` |
//! | OPTIONS | `/delete` | |

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::{LoggerError, Result};
use crate::storage::{StorageGateway, StoragePath};

/// Shared state of the query routes
#[derive(Debug, Clone)]
pub struct QueryState {
    gateway: Arc<StorageGateway>,
    started: Instant,
}

impl QueryState {
    pub fn new(gateway: Arc<StorageGateway>) -> Self {
        Self {
            gateway,
            started: Instant::now(),
        }
    }
}

/// Error reply: a status code and a plain-text body
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn missing(what: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, format!("Missing {} parameter", what))
    }

    fn forbidden(err: LoggerError) -> Self {
        debug!("Rejected path: {}", err);
        Self::new(StatusCode::FORBIDDEN, "Access forbidden")
    }

    /// Map a storage error, using `not_found` for missing entries
    fn storage(err: LoggerError, not_found: &str) -> Self {
        match err {
            LoggerError::StorageBusy => Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            LoggerError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, not_found),
            LoggerError::InvalidPath(_) => Self::forbidden(err),
            other => {
                warn!("Storage request failed: {}", other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn json_body(contents: Bytes) -> Response {
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        contents,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct DayParams {
    day: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveParams {
    day: Option<String>,
    drive: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    path: Option<String>,
}

#[derive(Debug, Serialize)]
struct StorageInfo {
    status: &'static str,
    total: u64,
    used: u64,
    free: u64,
    /// Seconds since the service started
    uptime: u64,
}

async fn connected() -> &'static str {
    "Connected"
}

async fn list_days(State(state): State<QueryState>) -> ApiResult<Json<Vec<String>>> {
    let days = state.gateway.list_days().await.map_err(|e| match e {
        LoggerError::StorageBusy => ApiError::storage(e, ""),
        other => {
            warn!("Failed to list days: {}", other);
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to open root directory")
        }
    })?;
    Ok(Json(days))
}

async fn list_drives(
    State(state): State<QueryState>,
    Query(params): Query<DayParams>,
) -> ApiResult<Json<Vec<String>>> {
    let day = required(params.day).ok_or_else(|| ApiError::missing("'day'"))?;
    StoragePath::from_segments(&[day.as_str()]).map_err(ApiError::forbidden)?;

    let drives = state
        .gateway
        .list_drives(&day)
        .await
        .map_err(|e| ApiError::storage(e, "Day folder not found"))?;
    Ok(Json(drives))
}

async fn get_drive(State(state): State<QueryState>, Query(params): Query<DriveParams>) -> ApiResult<Response> {
    let (Some(day), Some(drive)) = (required(params.day), required(params.drive)) else {
        return Err(ApiError::missing("'day' or 'drive'"));
    };
    StoragePath::from_segments(&[day.as_str(), drive.as_str()]).map_err(ApiError::forbidden)?;

    let contents = state
        .gateway
        .read_drive(&day, &drive)
        .await
        .map_err(|e| ApiError::storage(e, "Drive file not found"))?;
    debug!("Serving /{}/{} ({} bytes)", day, drive, contents.len());
    Ok(json_body(contents))
}

async fn live(State(state): State<QueryState>) -> ApiResult<Response> {
    let latest = state
        .gateway
        .read_latest_drive()
        .await
        .map_err(|e| ApiError::storage(e, "No log data found"))?;
    debug!("Serving latest drive /{}/{}", latest.day, latest.drive);
    Ok(json_body(latest.contents))
}

async fn sd_info(State(state): State<QueryState>) -> ApiResult<Json<StorageInfo>> {
    let uptime = state.started.elapsed().as_secs();
    let info = match state.gateway.usage().await {
        Ok(usage) => StorageInfo {
            status: "mounted",
            total: usage.total,
            used: usage.used,
            free: usage.free,
            uptime,
        },
        Err(LoggerError::StorageBusy) => return Err(ApiError::storage(LoggerError::StorageBusy, "")),
        Err(e) => {
            warn!("Storage usage unavailable: {}", e);
            StorageInfo {
                status: "unavailable",
                total: 0,
                used: 0,
                free: 0,
                uptime,
            }
        }
    };
    Ok(Json(info))
}

async fn delete_path(State(state): State<QueryState>, Query(params): Query<DeleteParams>) -> ApiResult<&'static str> {
    let raw = required(params.path).ok_or_else(|| ApiError::missing("'path'"))?;
    let target = StoragePath::parse(&raw).map_err(ApiError::forbidden)?;
    if target.is_root() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Invalid path"));
    }

    state.gateway.delete(&target).await.map_err(|e| match e {
        LoggerError::StorageBusy => ApiError::storage(e, ""),
        other => {
            warn!("Failed to delete {}: {}", target, other);
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Delete failed")
        }
    })?;
    Ok("Deleted")
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// All query routes, with permissive CORS and request tracing
pub fn router(state: QueryState) -> Router {
    Router::new()
        .route("/", get(connected))
        .route("/days", get(list_days))
        .route("/drives", get(list_drives))
        .route("/drive", get(get_drive))
        .route("/live", get(live))
        .route("/sdinfo", get(sd_info))
        .route("/delete", axum::routing::delete(delete_path).options(preflight))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the query routes on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: QueryState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("Query service listening on http://{}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(LoggerError::Io)?;
    info!("Query service stopped");
    Ok(())
}

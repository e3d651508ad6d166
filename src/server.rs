//! HTTP surface of the sync service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/sync` | Run the sync pipeline (bearer token required) |
//! | `GET`  | `/sync-status` | Most recent run, time since it, category counts |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Error responses share one shape:
//!
//! ```json
//! { "error": "Unauthorized", "details": "missing or invalid bearer token" }
//! ```

use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::db::Pool;
use crate::notion::NotionService;
use crate::status::{self, SyncStatusReport};
use crate::sync::{self, PipelineError, SyncOptions, SyncReport, SyncSettings};

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub source: Arc<dyn NotionService>,
    pub settings: Arc<SyncSettings>,
    pub sync_secret: Arc<str>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/sync", post(handle_sync))
        .route("/sync-status", get(handle_sync_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Binds `bind_addr` and serves until the process is terminated.
pub async fn run_server(bind_addr: &str, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "http server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    details: String,
}

/// Error type that converts into a JSON HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: String,
    details: String,
}

impl AppError {
    fn new(status: StatusCode, error: &str, details: impl Into<String>) -> Self {
        Self {
            status,
            error: error.to_string(),
            details: details.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match &err {
            PipelineError::AlreadyRunning(_) => {
                AppError::new(StatusCode::CONFLICT, "Sync already running", err.to_string())
            }
            PipelineError::Aborted(cause) => AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Sync failed",
                format!("{:#}", cause),
            ),
        }
    }
}

// ============ POST /sync ============

/// Exact match of `Authorization: Bearer <secret>`.
fn is_authorized(headers: &HeaderMap, secret: &str) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret)
}

/// Parses the optional JSON body. Empty body means defaults.
fn parse_options(body: &[u8]) -> Result<SyncOptions, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(SyncOptions::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::new(StatusCode::BAD_REQUEST, "Invalid request body", e.to_string()))
}

async fn handle_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SyncReport>, AppError> {
    if !is_authorized(&headers, &state.sync_secret) {
        warn!("rejected sync request with missing or invalid token");
        return Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "missing or invalid bearer token",
        ));
    }
    let opts = parse_options(&body)?;
    info!(?opts, "sync requested");

    let report = sync::run_sync(&state.pool, state.source.as_ref(), &state.settings, &opts).await?;
    Ok(Json(report))
}

// ============ GET /sync-status ============

async fn handle_sync_status(
    State(state): State<AppState>,
) -> Result<Json<SyncStatusReport>, AppError> {
    status::load_status(&state.pool, Utc::now())
        .await
        .map(Json)
        .map_err(|e| {
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load sync status",
                format!("{:#}", e),
            )
        })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

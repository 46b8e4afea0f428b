use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::error::{ConfigError, TrackerError};
use crate::ingest::cycle::{CycleResult, Tracker};
use crate::ingest::types::{Platform, TrackedSource};

pub const DEFAULT_CONTENT_LIMIT: usize = 50;
pub const MAX_CONTENT_LIMIT: usize = 500;
pub const STATIC_DIR: &str = "static";

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Tracker>,
}

pub fn create_router(tracker: Arc<Tracker>) -> Router {
    let state = AppState { tracker };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/sources", get(list_sources).post(add_source))
        .route("/api/sources/{platform}", put(replace_sources))
        .route("/api/sources/{platform}/{handle}", delete(remove_source))
        .route("/api/check_now", post(check_now))
        .route("/api/content/{platform}", get(list_content))
        .route("/api/content/{platform}/{handle}/{id}", get(get_content))
        .route("/api/watermark/{platform}/{handle}", get(get_watermark))
        .route("/api/tracking_status", get(tracking_status))
        .route("/api/stats", get(stats))
        .fallback_service(ServeDir::new(STATIC_DIR))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// `TrackerError` as an HTTP response: JSON `{"error": ...}` with a status
/// derived from the variant.
pub struct ApiError(TrackerError);

impl From<TrackerError> for ApiError {
    fn from(e: TrackerError) -> Self {
        ApiError(e)
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        ApiError(e.into())
    }
}

pub fn status_for(err: &TrackerError) -> StatusCode {
    match err {
        TrackerError::AlreadyRunning(_) => StatusCode::CONFLICT,
        TrackerError::Fetch { .. } => StatusCode::BAD_GATEWAY,
        TrackerError::Config(ConfigError::UnknownSource(_)) => StatusCode::NOT_FOUND,
        TrackerError::RecordNotFound { .. } => StatusCode::NOT_FOUND,
        TrackerError::Config(_) => StatusCode::BAD_REQUEST,
        TrackerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn bad_request(msg: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg.into() }))).into_response()
}

// ---- sources ----

#[derive(Deserialize)]
struct PlatformQuery {
    platform: Option<String>,
}

async fn list_sources(
    State(state): State<AppState>,
    Query(q): Query<PlatformQuery>,
) -> Result<Json<Vec<TrackedSource>>, ApiError> {
    let platform = q.platform.as_deref().map(str::parse::<Platform>).transpose()?;
    Ok(Json(state.tracker.list_sources(platform)))
}

#[derive(Deserialize)]
struct AddSourceReq {
    platform: String,
    handle: String,
}

async fn add_source(
    State(state): State<AppState>,
    Json(body): Json<AddSourceReq>,
) -> Result<Response, ApiError> {
    let platform: Platform = body.platform.parse()?;
    let (source, added) = state.tracker.add_source(platform, &body.handle)?;
    let status = if added { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(source)).into_response())
}

#[derive(Deserialize)]
struct ReplaceSourcesReq {
    handles: Vec<String>,
}

async fn replace_sources(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Json(body): Json<ReplaceSourcesReq>,
) -> Result<Json<Vec<TrackedSource>>, ApiError> {
    let platform: Platform = platform.parse()?;
    Ok(Json(state.tracker.replace_sources(platform, &body.handles)?))
}

async fn remove_source(
    State(state): State<AppState>,
    Path((platform, handle)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let platform: Platform = platform.parse()?;
    state.tracker.remove_source(platform, &handle)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- cycles ----

#[derive(Deserialize, Default)]
struct CheckNowReq {
    platform: Option<String>,
    handle: Option<String>,
}

#[derive(Serialize)]
struct SourceOutcome {
    source: TrackedSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<CycleResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Empty body runs every source; `{platform}` one platform; `{platform, handle}` one source.
async fn check_now(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let req: CheckNowReq = if body.iter().all(u8::is_ascii_whitespace) {
        CheckNowReq::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => return Ok(bad_request(format!("invalid body: {e}"))),
        }
    };

    let platform = req.platform.as_deref().map(str::parse::<Platform>).transpose()?;
    match (platform, req.handle) {
        (Some(p), Some(h)) => {
            let source = TrackedSource::new(p, &h)?;
            let result = state.tracker.trigger_cycle(&source).await?;
            Ok(Json(result).into_response())
        }
        (None, Some(_)) => Ok(bad_request("handle given without platform")),
        (platform, None) => {
            let results: Vec<SourceOutcome> = state
                .tracker
                .run_all(platform)
                .await
                .into_iter()
                .map(|(source, res)| match res {
                    Ok(r) => SourceOutcome {
                        source,
                        result: Some(r),
                        error: None,
                    },
                    Err(e) => SourceOutcome {
                        source,
                        result: None,
                        error: Some(e.to_string()),
                    },
                })
                .collect();
            Ok(Json(json!({ "results": results })).into_response())
        }
    }
}

// ---- content ----

#[derive(Deserialize)]
struct ContentQuery {
    limit: Option<usize>,
    since: Option<String>,
}

async fn list_content(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Query(q): Query<ContentQuery>,
) -> Result<Response, ApiError> {
    let platform: Platform = platform.parse()?;
    let since = match q.since.as_deref().map(DateTime::parse_from_rfc3339).transpose() {
        Ok(s) => s.map(|d| d.with_timezone(&Utc)),
        Err(e) => return Ok(bad_request(format!("invalid since (want RFC 3339): {e}"))),
    };
    let limit = q
        .limit
        .unwrap_or(DEFAULT_CONTENT_LIMIT)
        .clamp(1, MAX_CONTENT_LIMIT);
    let records = state.tracker.list_processed(Some(platform), limit, since)?;
    Ok(Json(records).into_response())
}

async fn get_content(
    State(state): State<AppState>,
    Path((platform, handle, id)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let platform: Platform = platform.parse()?;
    let record = state.tracker.get_processed(platform, &handle, &id)?;
    Ok(Json(record).into_response())
}

async fn get_watermark(
    State(state): State<AppState>,
    Path((platform, handle)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let platform: Platform = platform.parse()?;
    let wm = state.tracker.get_watermark(platform, &handle)?;
    Ok(Json(wm).into_response())
}

async fn tracking_status(State(state): State<AppState>) -> Response {
    Json(state.tracker.tracking_status()).into_response()
}

async fn stats(State(state): State<AppState>) -> Response {
    Json(state.tracker.stats()).into_response()
}

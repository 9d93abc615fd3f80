use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};

use super::boards::{KNOWN_IMUS, battery_types, board_entries};
use super::models::{BoardType, BuildRequest, StatusEvent};
use super::service::BuildService;
use crate::errors::BuildError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub service: Arc<BuildService>,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<BuildError> for ApiError {
    fn from(err: BuildError) -> Self {
        match err {
            e if e.is_client_error() => ApiError::BadRequest(e.to_string()),
            BuildError::ShuttingDown => ApiError::Unavailable(BuildError::ShuttingDown.to_string()),
            e => {
                tracing::error!(error = %e, "Build submission failed");
                ApiError::Internal(e.to_string())
            }
        }
    }
}

fn internal(e: anyhow::Error) -> ApiError {
    tracing::error!(error = %format!("{:#}", e), "Request failed");
    ApiError::Internal(e.to_string())
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/firmwares", get(list_firmwares))
        .route("/api/firmwares/build", post(build_firmware))
        .route("/api/firmwares/build-status/{id}", get(build_status))
        .route("/api/firmwares/boards", get(list_boards))
        .route("/api/firmwares/imus", get(list_imus))
        .route("/api/firmwares/batteries", get(list_batteries))
        .route("/api/firmwares/versions", get(list_versions))
        .route("/api/firmwares/default-config/{board}", get(default_config))
        .route("/api/firmwares/{id}", get(get_firmware))
        .route("/health", get(health_check))
}

/// Static tables change only with a deploy.
fn cacheable<T: IntoResponse>(body: T) -> Response {
    let mut resp = body.into_response();
    resp.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=300"),
    );
    resp
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_firmwares(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let builds = state.service.list_builds().await.map_err(internal)?;
    Ok(cacheable(Json(builds)))
}

async fn build_firmware(
    State(state): State<SharedState>,
    Json(req): Json<BuildRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = state.service.submit(req).await?;
    Ok(Json(resp))
}

async fn build_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = state.service.status_stream(&id).await.filter_map(|event: StatusEvent| async move {
        match Event::default().json_data(&event) {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                tracing::warn!(build_id = %event.build_id, error = %e, "Failed to encode status event");
                None
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn get_firmware(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .service
        .get_build(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::NotFound("Firmware not found".into()))?;
    Ok(Json(record))
}

async fn list_boards() -> Response {
    cacheable(Json(board_entries()))
}

async fn list_imus() -> Response {
    cacheable(Json(KNOWN_IMUS))
}

async fn list_batteries() -> Response {
    cacheable(Json(battery_types()))
}

async fn list_versions(State(state): State<SharedState>) -> Response {
    cacheable(Json(state.service.list_versions().await))
}

async fn default_config(
    State(state): State<SharedState>,
    Path(board): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let board = BoardType::from_str(&board).map_err(ApiError::BadRequest)?;
    let config = state.service.default_config(board)?;
    Ok(cacheable(Json(config)))
}

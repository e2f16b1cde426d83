use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::error;

use crate::db;
use crate::hub::Hub;
use crate::ingest;
use crate::metrics;
use crate::model::TelemetryEnvelope;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub hub: Hub,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    hours: Option<i64>,
    limit: Option<i64>,
}

pub fn create_router(pool: PgPool, hub: Hub) -> Router {
    let state = AppState { pool, hub };

    Router::new()
        .route("/api/devices", get(list_devices))
        .route("/api/devices/:device_id", get(get_device))
        .route("/api/device-data", post(ingest_telemetry))
        .route("/api/monitoring/data/:device_id", get(get_device_data))
        .route("/api/monitoring/stats/:device_id", get(get_device_stats))
        .route("/ws", get(crate::ws::ws_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}

async fn list_devices(State(state): State<AppState>) -> Result<Response, AppError> {
    let devices = db::list_devices(&state.pool).await?;
    Ok(Json(json!({ "success": true, "devices": devices })).into_response())
}

async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Response, AppError> {
    match db::find_device(&state.pool, &device_id).await? {
        Some(device) => Ok(Json(json!({ "success": true, "device": device })).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "device not found" })),
        )
            .into_response()),
    }
}

/// HTTP ingestion path. Converges on the same upsert/persist/broadcast
/// contract as the queue consumer.
async fn ingest_telemetry(
    State(state): State<AppState>,
    Json(envelope): Json<TelemetryEnvelope>,
) -> Result<Response, AppError> {
    if envelope.device_id.trim().is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "device_id must not be empty" })),
        )
            .into_response());
    }

    ingest::process_record(&state.pool, &state.hub, envelope.into_record()).await;
    Ok(Json(json!({ "success": true })).into_response())
}

async fn get_device_data(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<WindowQuery>,
) -> Result<Response, AppError> {
    let since = Utc::now() - Duration::hours(params.hours.unwrap_or(1));
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);

    let data = db::query_telemetry(&state.pool, &device_id, since, limit).await?;
    Ok(Json(json!({ "success": true, "data": data })).into_response())
}

async fn get_device_stats(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<WindowQuery>,
) -> Result<Response, AppError> {
    let hours = params.hours.unwrap_or(24);
    let since = Utc::now() - Duration::hours(hours);

    let stats = db::aggregate_stats(&state.pool, &device_id, since).await?;
    Ok(Json(json!({
        "success": true,
        "stats": stats,
        "time_range": format!("Last {hours} hours"),
    }))
    .into_response())
}

pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("API error: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": "internal server error" })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

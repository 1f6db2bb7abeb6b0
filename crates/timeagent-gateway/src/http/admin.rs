//! Admin endpoints: manual runs and the cron trigger.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use timeagent_core::Argument;
use tracing::info;

use crate::app::AppState;
use crate::http::error::ApiError;
use crate::http::info::InfoView;

/// Header naming who asked for a manual run.
pub const EXECUTOR_HEADER: &str = "x-executor";

/// POST /admin/run: submit a manual run.
///
/// The body is an optional JSON array of `{key, value}` arguments. Returns as
/// soon as the run is handed to the worker.
pub async fn run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let arguments: Vec<Argument> = if body.iter().all(u8::is_ascii_whitespace) {
        Vec::new()
    } else {
        serde_json::from_slice::<Option<Vec<Argument>>>(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid arguments: {e}")))?
            .unwrap_or_default()
    };
    let executor = headers
        .get(EXECUTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    info!(args = arguments.len(), executor = ?executor, "manual run requested");
    state.scheduler.run(arguments, executor).await?;
    Ok(StatusCode::OK)
}

/// POST /admin/trigger: install a cron trigger (text/plain body).
pub async fn set_trigger(
    State(state): State<Arc<AppState>>,
    expression: String,
) -> Result<Json<InfoView>, ApiError> {
    let saved = state.scheduler.set_trigger(&expression).await?;
    Ok(Json(saved.into()))
}

/// DELETE /admin/trigger: remove the cron trigger.
pub async fn delete_trigger(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.scheduler.delete_trigger().await?;
    Ok(StatusCode::OK)
}

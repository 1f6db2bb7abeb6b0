use axum::{body::Bytes, extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use timeagent_core::{AgentInfo, ErrorCause, InfoSearch, RuntimeError};
use timeagent_scheduler::trigger;
use tracing::debug;

use crate::app::AppState;
use crate::http::error::ApiError;

/// An [`AgentInfo`] as rendered over HTTP, with its next cron firing.
#[derive(Debug, Serialize)]
pub struct InfoView {
    #[serde(flatten)]
    pub info: AgentInfo,
    pub next_execution: Option<DateTime<Utc>>,
}

impl From<AgentInfo> for InfoView {
    fn from(info: AgentInfo) -> Self {
        let next_execution = info.cron_trigger.as_deref().and_then(trigger::next_fire);
        Self {
            info,
            next_execution,
        }
    }
}

/// GET /info: the current record.
pub async fn current_info(State(state): State<Arc<AppState>>) -> Json<InfoView> {
    Json(state.scheduler.info().await.into())
}

/// GET /info/search: history matching a JSON search request.
///
/// The request travels in the body of the GET; an empty body is a missing
/// search model.
pub async fn search_info(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Vec<InfoView>>, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let search: InfoSearch = serde_json::from_slice(&body).map_err(|e| {
            RuntimeError::new(
                ErrorCause::InvalidSearchModel,
                format!("search model is malformed: {e}"),
            )
        })?;
        Some(search)
    };

    let found = state.search.search(request)?;
    debug!(count = found.len(), "search answered");
    Ok(Json(found.into_iter().map(InfoView::from).collect()))
}

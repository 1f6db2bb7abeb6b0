use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use timeagent_core::config::TimeAgentConfig;
use timeagent_scheduler::{AgentScheduler, SearchEngine};

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: TimeAgentConfig,
    pub scheduler: AgentScheduler,
    pub search: SearchEngine,
}

impl AppState {
    pub fn new(config: TimeAgentConfig, scheduler: AgentScheduler, search: SearchEngine) -> Self {
        Self {
            config,
            scheduler,
            search,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/info", get(crate::http::info::current_info))
        .route("/info/search", get(crate::http::info::search_info))
        .route("/admin/run", post(crate::http::admin::run))
        .route(
            "/admin/trigger",
            post(crate::http::admin::set_trigger).delete(crate::http::admin::delete_trigger),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

use timeagent_core::{AgentInfo, ErrorCause, InfoSearch, RuntimeError};
use timeagent_store::{HistoryStore, InfoQuery, TimeWindow};
use tracing::debug;

use crate::error::Result;

/// Validates search requests and turns them into one history query.
#[derive(Clone)]
pub struct SearchEngine {
    agent_name: String,
    max_limit: i64,
    store: HistoryStore,
}

impl SearchEngine {
    pub fn new(agent_name: impl Into<String>, max_limit: i64, store: HistoryStore) -> Self {
        Self {
            agent_name: agent_name.into(),
            max_limit,
            store,
        }
    }

    /// Build the query for `search`.
    ///
    /// A missing request is rejected with `INVALID_SEARCH_MODEL`. A limit
    /// outside `1..=max_limit` is replaced by `max_limit`. The time predicate
    /// is BETWEEN, AFTER or BEFORE depending on which bounds are present.
    pub fn plan(&self, search: Option<InfoSearch>) -> std::result::Result<InfoQuery, RuntimeError> {
        let search = search.ok_or_else(|| {
            RuntimeError::new(ErrorCause::InvalidSearchModel, "search model is missing")
        })?;

        let limit = if search.limit <= 0 || search.limit > self.max_limit {
            debug!(requested = search.limit, max = self.max_limit, "search limit normalised");
            self.max_limit
        } else {
            search.limit
        };

        let query = InfoQuery {
            agent_name: self.agent_name.clone(),
            status: search.status,
            executor: search.executor,
            window: TimeWindow::from_bounds(search.from_start_time, search.to_start_time),
            limit,
        };
        debug!(?query, "search planned");
        Ok(query)
    }

    /// Plan and execute a search over the history of this agent.
    pub fn search(&self, search: Option<InfoSearch>) -> Result<Vec<AgentInfo>> {
        let query = self.plan(search)?;
        Ok(self.store.find(&query)?)
    }
}

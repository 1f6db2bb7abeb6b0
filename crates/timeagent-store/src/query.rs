use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use timeagent_core::AgentStatus;

use crate::store::format_ts;

/// Predicate over `start_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    /// No time predicate.
    Any,
    /// `start_time > from`
    After(DateTime<Utc>),
    /// `start_time < to`
    Before(DateTime<Utc>),
    /// `from <= start_time <= to`
    Between(DateTime<Utc>, DateTime<Utc>),
}

impl TimeWindow {
    pub fn from_bounds(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        match (from, to) {
            (Some(from), Some(to)) => TimeWindow::Between(from, to),
            (Some(from), None) => TimeWindow::After(from),
            (None, Some(to)) => TimeWindow::Before(to),
            (None, None) => TimeWindow::Any,
        }
    }
}

/// One history query: agent name is always a predicate, status, executor and
/// time window are optional. Results are ordered by `updated_at` descending
/// and limited to `limit` rows starting at offset 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoQuery {
    pub agent_name: String,
    pub status: Option<AgentStatus>,
    pub executor: Option<String>,
    pub window: TimeWindow,
    pub limit: i64,
}

impl InfoQuery {
    pub fn new(agent_name: impl Into<String>, limit: i64) -> Self {
        Self {
            agent_name: agent_name.into(),
            status: None,
            executor: None,
            window: TimeWindow::Any,
            limit,
        }
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_executor(mut self, executor: impl Into<String>) -> Self {
        self.executor = Some(executor.into());
        self
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    /// Build the `SELECT` over `info` and its positional parameters.
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut sql = String::from(
            "SELECT id, agent_name, cron_trigger, executor, start_time, finish_time,
                    status, created_at, updated_at
             FROM info WHERE agent_name = ?1",
        );
        let mut params = vec![Value::Text(self.agent_name.clone())];

        let mut push = |clause: &str, value: Value, sql: &mut String| {
            params.push(value);
            sql.push_str(&format!(" AND {clause} ?{}", params.len()));
        };

        if let Some(status) = self.status {
            push("status =", Value::Text(status.as_str().to_string()), &mut sql);
        }
        if let Some(ref executor) = self.executor {
            push("executor =", Value::Text(executor.clone()), &mut sql);
        }
        match self.window {
            TimeWindow::Any => {}
            TimeWindow::After(from) => push("start_time >", Value::Text(format_ts(&from)), &mut sql),
            TimeWindow::Before(to) => push("start_time <", Value::Text(format_ts(&to)), &mut sql),
            TimeWindow::Between(from, to) => {
                push("start_time >=", Value::Text(format_ts(&from)), &mut sql);
                push("start_time <=", Value::Text(format_ts(&to)), &mut sql);
            }
        }

        params.push(Value::Integer(self.limit));
        sql.push_str(&format!(
            " ORDER BY updated_at DESC, id DESC LIMIT ?{} OFFSET 0",
            params.len()
        ));
        (sql, params)
    }
}

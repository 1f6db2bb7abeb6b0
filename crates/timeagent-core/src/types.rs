use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Current time, truncated to the microsecond precision the history store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Lifecycle state of an [`AgentInfo`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    /// Pending cron slot: carries a staged cron expression, nothing else.
    NotSet,
    /// Current record, waiting for the next run.
    Ready,
    /// Current record, a run is in progress.
    Running,
    /// The run returned normally. Immutable.
    Finished,
    /// The run failed with a job error. Immutable.
    Aborted,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::NotSet => "NOT_SET",
            AgentStatus::Ready => "READY",
            AgentStatus::Running => "RUNNING",
            AgentStatus::Finished => "FINISHED",
            AgentStatus::Aborted => "ABORTED",
        }
    }

    /// FINISHED and ABORTED records describe a completed run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Finished | AgentStatus::Aborted)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "NOT_SET" => Ok(AgentStatus::NotSet),
            "READY" => Ok(AgentStatus::Ready),
            "RUNNING" => Ok(AgentStatus::Running),
            "FINISHED" => Ok(AgentStatus::Finished),
            "ABORTED" => Ok(AgentStatus::Aborted),
            other => Err(format!("unknown agent status: {other}")),
        }
    }
}

/// One protocol line, owned by exactly one [`AgentInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEntry {
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl ProtocolEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            created_at: now(),
        }
    }
}

/// One record per historical run, plus the current record and the
/// optional pending cron slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Row id, assigned on first persist.
    pub id: Option<i64>,
    pub agent_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Set at the transition to RUNNING.
    pub start_time: Option<DateTime<Utc>>,
    /// Set at the transition to FINISHED or ABORTED.
    pub finish_time: Option<DateTime<Utc>>,
    /// Who initiated the run, if known.
    pub executor: Option<String>,
    pub status: AgentStatus,
    pub cron_trigger: Option<String>,
    #[serde(default)]
    pub protocol: Vec<ProtocolEntry>,
}

impl AgentInfo {
    pub fn new(agent_name: impl Into<String>, status: AgentStatus) -> Self {
        Self {
            id: None,
            agent_name: agent_name.into(),
            created_at: None,
            updated_at: None,
            start_time: None,
            finish_time: None,
            executor: None,
            status,
            cron_trigger: None,
            protocol: Vec::new(),
        }
    }

    pub fn add_protocol(&mut self, message: impl Into<String>) {
        self.protocol.push(ProtocolEntry::new(message));
    }

    pub fn clear_protocol(&mut self) {
        self.protocol.clear();
    }

    /// Turn this record into a fresh READY record that will be inserted as a
    /// new row on the next save. Keeps `agent_name` and `cron_trigger`.
    pub fn reinit(&mut self) {
        self.id = None;
        self.created_at = None;
        self.updated_at = None;
        self.executor = None;
        self.start_time = None;
        self.finish_time = None;
        self.status = AgentStatus::Ready;
        self.clear_protocol();
    }

    /// Protocol messages in insertion order.
    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.protocol.iter().map(|p| p.message.as_str())
    }
}

/// Key/value argument for a manual run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub key: String,
    pub value: String,
}

impl Argument {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for Argument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.value)
    }
}

/// Search request over historical runs. Every predicate is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoSearch {
    /// Page size; out-of-range values are replaced by the configured maximum.
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub executor: Option<String>,
    #[serde(default)]
    pub from_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to_start_time: Option<DateTime<Utc>>,
}

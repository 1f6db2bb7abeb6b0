use std::sync::Arc;

use async_trait::async_trait;
use timeagent_core::{now, AgentInfo, AgentStatus, Argument, ErrorCause};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::error::{ExecuteError, Result, SchedulerError};
use crate::model::ModelEngine;

/// The current record, shared between the worker and the HTTP readers.
pub type SharedInfo = Arc<Mutex<AgentInfo>>;

/// Executor recorded for runs fired by a cron trigger.
pub const CRON_EXECUTOR: &str = "cron";

/// Job body supplied by the host application.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Run the job once.
    ///
    /// Return a [`JobError`](timeagent_core::JobError) (via `?` or `.into()`)
    /// to mark the run ABORTED; any checkpoint failure from
    /// [`RunContext::update`] should be propagated as-is.
    async fn execute(
        &self,
        ctx: &mut RunContext,
        arguments: &[Argument],
    ) -> std::result::Result<(), ExecuteError>;
}

/// One unit of work for the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub arguments: Vec<Argument>,
    pub executor: Option<String>,
}

impl RunRequest {
    pub fn manual(arguments: Vec<Argument>, executor: Option<String>) -> Self {
        Self {
            arguments,
            executor,
        }
    }

    pub fn cron() -> Self {
        Self {
            arguments: Vec::new(),
            executor: Some(CRON_EXECUTOR.to_string()),
        }
    }
}

/// What a running job can see and do.
///
/// The job works on a private copy of the current record; [`update`]
/// persists it and publishes it to readers of the current record.
///
/// [`update`]: RunContext::update
pub struct RunContext {
    info: AgentInfo,
    model: ModelEngine,
    current: SharedInfo,
}

impl RunContext {
    fn new(info: AgentInfo, model: ModelEngine, current: SharedInfo) -> Self {
        Self {
            info,
            model,
            current,
        }
    }

    pub fn agent_name(&self) -> &str {
        self.model.agent_name()
    }

    pub fn agent_info(&self) -> &AgentInfo {
        &self.info
    }

    pub fn agent_info_mut(&mut self) -> &mut AgentInfo {
        &mut self.info
    }

    /// Append one protocol line to the in-memory record.
    pub fn add_protocol(&mut self, message: impl Into<String>) {
        self.info.add_protocol(message);
    }

    /// Persist the in-memory record; lines appended since the last call are
    /// written atomically.
    pub async fn update(&mut self) -> Result<()> {
        let mut current = self.current.lock().await;
        self.model.update(&mut self.info)?;
        *current = self.info.clone();
        Ok(())
    }
}

/// Single-run state machine around one [`Agent`].
pub struct AgentRuntime {
    agent: Arc<dyn Agent>,
    model: ModelEngine,
    current: SharedInfo,
}

impl AgentRuntime {
    pub fn new(agent: Arc<dyn Agent>, model: ModelEngine, current: SharedInfo) -> Self {
        Self {
            agent,
            model,
            current,
        }
    }

    /// Execute the agent once and return the terminal status.
    ///
    /// Fails with `ALREADY_RUNNING` if the current record is RUNNING. A
    /// [`JobError`](timeagent_core::JobError) ends the run as ABORTED and is
    /// not an error of this call; every other failure is returned.
    #[instrument(skip(self, request), fields(agent = %self.model.agent_name(), executor = ?request.executor))]
    pub async fn run(&self, request: RunRequest) -> Result<AgentStatus> {
        let info = self.start(&request).await?;
        let mut ctx = RunContext::new(info, self.model.clone(), self.current.clone());

        if request.arguments.is_empty() {
            ctx.add_protocol("no arguments set");
        } else {
            ctx.add_protocol("arguments are set:");
            for argument in &request.arguments {
                ctx.add_protocol(argument.to_string());
            }
        }
        ctx.update().await?;

        match self.agent.execute(&mut ctx, &request.arguments).await {
            Ok(()) => {
                let mut current = self.current.lock().await;
                ctx.info.status = AgentStatus::Finished;
                ctx.info.finish_time = Some(now());
                self.model.update(&mut ctx.info)?;
                info!(id = ?ctx.info.id, "agent run finished");

                *current = self.model.next_info()?;
                Ok(AgentStatus::Finished)
            }
            Err(ExecuteError::Job(err)) => {
                error!(id = ?ctx.info.id, error = %err, "agent run aborted");
                ctx.info.status = AgentStatus::Aborted;
                ctx.info.finish_time = Some(now());
                ctx.add_protocol(format!("job error - {}", err.full_error_message()));
                ctx.update().await?;
                Ok(AgentStatus::Aborted)
            }
            Err(ExecuteError::Scheduler(e)) => {
                // the record stays RUNNING until recover_interrupted at the next start
                warn!(id = ?ctx.info.id, error = %e, "agent run failed outside the job, record left RUNNING");
                Err(e)
            }
        }
    }

    /// Precondition check and transition to RUNNING, under the current-record
    /// lock so trigger changes cannot interleave.
    async fn start(&self, request: &RunRequest) -> Result<AgentInfo> {
        let mut current = self.current.lock().await;

        if current.status == AgentStatus::Running {
            return Err(already_running(&current));
        }
        if current.status.is_terminal() || current.status == AgentStatus::NotSet {
            // a finished or aborted record stays as history; run on a fresh row
            *current = self.model.next_info()?;
        }

        current.status = AgentStatus::Running;
        current.start_time = Some(now());
        current.finish_time = None;
        current.executor = request.executor.clone();
        current.clear_protocol();
        self.model.update(&mut current)?;
        info!(id = ?current.id, "agent run started");

        Ok(current.clone())
    }
}

pub(crate) fn already_running(current: &AgentInfo) -> SchedulerError {
    let since = current
        .start_time
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "an unknown time".to_string());
    SchedulerError::runtime(
        ErrorCause::AlreadyRunning,
        format!("the agent is already running since {since}"),
    )
}

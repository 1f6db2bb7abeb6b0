use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use timeagent_core::{AgentInfo, AgentStatus, Argument, ErrorCause};
use timeagent_store::HistoryStore;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info, instrument, warn};

use crate::error::{Result, SchedulerError};
use crate::model::ModelEngine;
use crate::runtime::{already_running, Agent, AgentRuntime, RunRequest, SharedInfo};
use crate::trigger::{self, CronTrigger};

/// Hands run requests to the single worker, enforcing single-flight.
///
/// Shared by manual runs and every cron firing.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    worker: mpsc::Sender<RunRequest>,
    busy: Arc<AtomicBool>,
    current: SharedInfo,
}

impl Dispatcher {
    /// Submit `request` unless a run is in progress or already queued.
    pub(crate) async fn submit(&self, request: RunRequest) -> Result<()> {
        {
            let current = self.current.lock().await;
            if current.status == AgentStatus::Running {
                return Err(already_running(&current));
            }
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SchedulerError::runtime(
                ErrorCause::AlreadyRunning,
                "the agent is already running",
            ));
        }

        if let Err(e) = self.worker.try_send(request) {
            self.busy.store(false, Ordering::Release);
            return Err(SchedulerError::Internal(format!("worker unavailable: {e}")));
        }
        Ok(())
    }
}

/// Front-end of the runner: owns the worker, the current record and the
/// installed cron trigger.
pub struct AgentScheduler {
    model: ModelEngine,
    current: SharedInfo,
    dispatcher: Dispatcher,
    trigger: Mutex<Option<CronTrigger>>,
}

impl AgentScheduler {
    /// Build the scheduler and spawn its worker.
    ///
    /// Must be called inside a Tokio runtime. The worker stops when `shutdown`
    /// broadcasts `true`; a run in progress is finished first.
    pub fn new(
        agent_name: &str,
        agent: Arc<dyn Agent>,
        store: HistoryStore,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let model = ModelEngine::new(agent_name, store);
        let current: SharedInfo = Arc::new(Mutex::new(AgentInfo::new(
            agent_name,
            AgentStatus::NotSet,
        )));
        let runtime = Arc::new(AgentRuntime::new(agent, model.clone(), current.clone()));

        // capacity 1: the busy flag already guarantees at most one request in flight
        let (tx, rx) = mpsc::channel(1);
        let busy = Arc::new(AtomicBool::new(false));
        tokio::spawn(run_worker(runtime, rx, busy.clone(), shutdown));

        Self {
            model,
            dispatcher: Dispatcher {
                worker: tx,
                busy,
                current: current.clone(),
            },
            current,
            trigger: Mutex::new(None),
        }
    }

    pub fn agent_name(&self) -> &str {
        self.model.agent_name()
    }

    /// Load or create the current record and re-install its cron trigger.
    ///
    /// Records left RUNNING by a previous process are marked ABORTED first.
    #[instrument(skip(self), fields(agent = %self.agent_name()))]
    pub async fn init_agent_info(&self) -> Result<AgentInfo> {
        let recovered = self.model.store().recover_interrupted(self.agent_name())?;
        if recovered > 0 {
            warn!(count = recovered, "interrupted runs recovered");
        }

        let next = self.model.next_info()?;
        *self.current.lock().await = next.clone();

        if let Some(ref expression) = next.cron_trigger {
            match trigger::parse(expression) {
                Ok(schedule) => {
                    let mut slot = self.trigger.lock().await;
                    *slot = Some(CronTrigger::spawn(
                        expression,
                        schedule,
                        self.dispatcher.clone(),
                    ));
                }
                Err(e) => warn!(trigger = %expression, error = %e, "stored trigger not installed"),
            }
        }

        info!(id = ?next.id, status = %next.status, "agent info initialised");
        Ok(next)
    }

    /// Snapshot of the current record.
    pub async fn info(&self) -> AgentInfo {
        self.current.lock().await.clone()
    }

    /// Submit a manual run. Returns once the run is handed to the worker.
    #[instrument(skip(self, arguments), fields(args = arguments.len()))]
    pub async fn run(&self, arguments: Vec<Argument>, executor: Option<String>) -> Result<()> {
        self.dispatcher
            .submit(RunRequest::manual(arguments, executor))
            .await?;
        info!("manual run submitted");
        Ok(())
    }

    /// Validate and install `expression`, replacing any installed trigger,
    /// and persist it. Returns the record that now owns the expression.
    #[instrument(skip(self))]
    pub async fn set_trigger(&self, expression: &str) -> Result<AgentInfo> {
        let expression = expression.trim();
        let schedule = trigger::parse(expression)?;

        let mut slot = self.trigger.lock().await;
        cancel_installed(&mut slot).await?;
        *slot = Some(CronTrigger::spawn(
            expression,
            schedule,
            self.dispatcher.clone(),
        ));

        let mut current = self.current.lock().await;
        let saved = self.model.save_trigger(Some(expression), &mut current)?;
        info!(trigger = %expression, owner = ?saved.id, "trigger set");
        Ok(saved)
    }

    /// Cancel the installed trigger (if any) and persist the removal.
    #[instrument(skip(self))]
    pub async fn delete_trigger(&self) -> Result<AgentInfo> {
        let mut slot = self.trigger.lock().await;
        cancel_installed(&mut slot).await?;
        *slot = None;

        let mut current = self.current.lock().await;
        let saved = self.model.save_trigger(None, &mut current)?;
        info!(owner = ?saved.id, "trigger deleted");
        Ok(saved)
    }

    /// Expression of the installed trigger, if it is still live.
    pub async fn installed_trigger(&self) -> Option<String> {
        self.trigger
            .lock()
            .await
            .as_ref()
            .filter(|t| t.is_live())
            .map(|t| t.expression().to_string())
    }

    /// Stop future cron firings.
    pub async fn shutdown(&self) {
        if let Some(mut trigger) = self.trigger.lock().await.take() {
            if !trigger.cancel().await {
                warn!(trigger = %trigger.expression(), "cron trigger still running at shutdown");
            }
        }
    }
}

/// Cancel the installed trigger, if any. The slot keeps a trigger that did
/// not stop so a later call can retry.
async fn cancel_installed(slot: &mut Option<CronTrigger>) -> Result<()> {
    if let Some(trigger) = slot.as_mut() {
        if !trigger.cancel().await {
            return Err(SchedulerError::runtime(
                ErrorCause::CancelTrigger,
                format!(
                    "installed trigger {:?} could not be cancelled",
                    trigger.expression()
                ),
            ));
        }
    }
    Ok(())
}

/// The single worker: runs requests one at a time until shutdown.
async fn run_worker(
    runtime: Arc<AgentRuntime>,
    mut rx: mpsc::Receiver<RunRequest>,
    busy: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("agent worker started");
    loop {
        tokio::select! {
            request = rx.recv() => {
                let Some(request) = request else { break };
                let runtime = runtime.clone();
                // a panicking job must not take the worker down with it
                match tokio::spawn(async move { runtime.run(request).await }).await {
                    Ok(Ok(status)) => info!(%status, "agent run completed"),
                    Ok(Err(e)) => error!(error = %e, "agent run failed"),
                    Err(e) => error!(error = %e, "agent run panicked"),
                }
                busy.store(false, Ordering::Release);
            }
            changed = shutdown.changed() => {
                // a dropped sender counts as shutdown
                if changed.is_err() || *shutdown.borrow() {
                    info!("agent worker shutting down");
                    break;
                }
            }
        }
    }
}

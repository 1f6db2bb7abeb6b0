use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use cron::Schedule;
use timeagent_core::{ErrorCause, RuntimeError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SchedulerError;
use crate::runtime::RunRequest;
use crate::scheduler::Dispatcher;

/// Parse a Quartz-style cron expression.
///
/// Six fields (`sec min hour day-of-month month day-of-week`) with an optional
/// seventh year field. Quartz's `?` ("no specific value") is accepted in any
/// position and read as `*`.
pub fn parse(expression: &str) -> std::result::Result<Schedule, RuntimeError> {
    let invalid = |reason: String| {
        RuntimeError::new(
            ErrorCause::InvalidTrigger,
            format!("invalid trigger: {expression:?} ({reason})"),
        )
    };

    let fields: Vec<&str> = expression.split_whitespace().collect();
    if !(6..=7).contains(&fields.len()) {
        return Err(invalid(format!("expected 6 or 7 fields, got {}", fields.len())));
    }
    let normalized = fields
        .iter()
        .map(|f| if *f == "?" { "*" } else { *f })
        .collect::<Vec<_>>()
        .join(" ");

    Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))
}

/// Next firing of `expression` after now, evaluated in local time.
///
/// `None` when the expression does not parse or never fires again.
pub fn next_fire(expression: &str) -> Option<DateTime<Utc>> {
    let schedule = parse(expression).ok()?;
    schedule.upcoming(Local).next().map(|dt| dt.with_timezone(&Utc))
}

/// How long [`CronTrigger::cancel`] waits for the firing task to exit.
pub const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// An installed cron trigger: one background task that submits a run to the
/// worker at every firing.
pub struct CronTrigger {
    expression: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl CronTrigger {
    /// Spawn the firing loop for `schedule`.
    pub(crate) fn spawn(expression: &str, schedule: Schedule, dispatcher: Dispatcher) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let label = expression.to_string();

        let handle = tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Local).next() else {
                    info!(trigger = %label, "cron trigger has no further firings");
                    break;
                };
                let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
                debug!(trigger = %label, next = %next, "waiting for next firing");

                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                match dispatcher.submit(RunRequest::cron()).await {
                    Ok(()) => info!(trigger = %label, "cron firing submitted"),
                    Err(SchedulerError::Runtime(e)) if e.cause == ErrorCause::AlreadyRunning => {
                        // missed firings are dropped, never queued
                        info!(trigger = %label, "cron firing dropped, agent busy");
                    }
                    Err(e) => warn!(trigger = %label, error = %e, "cron firing failed"),
                }
            }
        });

        info!(trigger = %expression, "cron trigger installed");
        Self {
            expression: expression.to_string(),
            token,
            handle,
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// True while future firings are still possible.
    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    /// Suppress future firings without touching a run already handed to the
    /// worker.
    ///
    /// Returns `true` once the firing task has exited. A task that does not
    /// exit within [`CANCEL_GRACE`] (e.g. blocked while submitting a firing)
    /// yields `false`; its token stays cancelled.
    pub async fn cancel(&mut self) -> bool {
        self.token.cancel();
        if self.handle.is_finished() {
            return true;
        }
        let stopped = tokio::time::timeout(CANCEL_GRACE, &mut self.handle)
            .await
            .is_ok();
        debug!(trigger = %self.expression, stopped, "cron trigger cancelled");
        stopped
    }
}

impl Drop for CronTrigger {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quartz_expressions() {
        assert!(parse("0 0/3 * 1/1 * ?").is_ok());
        assert!(parse("0 0 0 1/1 * ?").is_ok());
        assert!(parse("0 0 12 ? * MON-FRI").is_ok());
        assert!(parse("0 0 12 * * ? 2099").is_ok());
    }

    #[test]
    fn rejects_garbage_with_expression_in_message() {
        let err = parse("xyz").unwrap_err();
        assert_eq!(err.cause, ErrorCause::InvalidTrigger);
        assert!(err.message.contains("xyz"));
    }

    #[test]
    fn rejects_five_field_unix_cron() {
        assert!(parse("*/5 * * * *").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(parse("0 61 * * * ?").is_err());
    }

    #[test]
    fn next_fire_is_in_the_future() {
        let next = next_fire("0 0/3 * 1/1 * ?").unwrap();
        assert!(next > Utc::now());
        assert!(next_fire("not a cron").is_none());
    }
}

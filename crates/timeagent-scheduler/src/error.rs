use thiserror::Error;
use timeagent_core::{ErrorCause, JobError, RuntimeError};
use timeagent_store::StoreError;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Precondition or validation failure; carries a typed cause.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// The history store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Worker or task plumbing failed.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn runtime(cause: ErrorCause, message: impl Into<String>) -> Self {
        SchedulerError::Runtime(RuntimeError::new(cause, message))
    }

    /// Typed cause, if this is a runtime error.
    pub fn cause(&self) -> Option<ErrorCause> {
        match self {
            SchedulerError::Runtime(e) => Some(e.cause),
            _ => None,
        }
    }

    /// Short error code string used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Runtime(e) => e.cause.as_str(),
            SchedulerError::Store(_) => "DATABASE_ERROR",
            SchedulerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// What a job returns on failure.
///
/// Only the `Job` arm is recorded in the protocol; a `Scheduler` failure
/// (e.g. a checkpoint that could not be persisted) escapes the runtime.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure while loading or validating configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Typed cause of a [`RuntimeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCause {
    /// A run is already in progress.
    AlreadyRunning,
    /// The supplied cron expression does not parse.
    InvalidTrigger,
    /// An installed cron trigger could not be cancelled.
    CancelTrigger,
    /// The search request was absent or malformed.
    InvalidSearchModel,
}

impl ErrorCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCause::AlreadyRunning => "ALREADY_RUNNING",
            ErrorCause::InvalidTrigger => "INVALID_TRIGGER",
            ErrorCause::CancelTrigger => "CANCEL_TRIGGER",
            ErrorCause::InvalidSearchModel => "INVALID_SEARCH_MODEL",
        }
    }
}

impl std::fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Precondition or validation failure raised by the runner itself.
///
/// These never touch persisted state; the HTTP layer maps the cause to a
/// status code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{cause}: {message}")]
pub struct RuntimeError {
    pub cause: ErrorCause,
    pub message: String,
}

impl RuntimeError {
    pub fn new(cause: ErrorCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
        }
    }

    /// `"CAUSE: message"`
    pub fn full_error_message(&self) -> String {
        format!("{}: {}", self.cause, self.message)
    }
}

/// Failure raised by a user-supplied job.
///
/// The cause is free-form so jobs can name their own failure kinds
/// (e.g. `"UPSTREAM_TIMEOUT"`). A run ending in a `JobError` is recorded
/// as ABORTED.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{cause}: {message}")]
pub struct JobError {
    pub cause: String,
    pub message: String,
}

impl JobError {
    pub fn new(cause: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            message: message.into(),
        }
    }

    /// `"CAUSE: message"`
    pub fn full_error_message(&self) -> String {
        format!("{}: {}", self.cause, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_full_message() {
        let err = RuntimeError::new(ErrorCause::AlreadyRunning, "running");
        assert_eq!(err.cause, ErrorCause::AlreadyRunning);
        assert_eq!(err.message, "running");
        assert_eq!(err.full_error_message(), "ALREADY_RUNNING: running");
        assert_eq!(err.to_string(), err.full_error_message());
    }

    #[test]
    fn job_error_full_message() {
        let err = JobError::new("UPSTREAM", "connection refused");
        assert_eq!(err.full_error_message(), "UPSTREAM: connection refused");
    }

    #[test]
    fn cause_serializes_as_screaming_snake() {
        let json = serde_json::to_string(&ErrorCause::InvalidSearchModel).unwrap();
        assert_eq!(json, r#""INVALID_SEARCH_MODEL""#);
    }
}

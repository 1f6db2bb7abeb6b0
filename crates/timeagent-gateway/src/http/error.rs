use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use timeagent_core::{ErrorCause, RuntimeError};
use timeagent_scheduler::SchedulerError;
use tracing::{error, warn};

/// Error returned by every handler.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// The request body could not be decoded.
    #[error("{0}")]
    BadRequest(String),
}

impl From<RuntimeError> for ApiError {
    fn from(e: RuntimeError) -> Self {
        ApiError::Scheduler(SchedulerError::Runtime(e))
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub timestamp: String,
    pub status: String,
    pub code: u16,
    pub error: String,
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Scheduler(SchedulerError::Runtime(e)) => status_for(e.cause),
            ApiError::Scheduler(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_name(&self) -> &'static str {
        match self {
            ApiError::Scheduler(e) => e.code(),
            ApiError::BadRequest(_) => "BAD_REQUEST",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Scheduler(SchedulerError::Runtime(e)) => e.message.clone(),
            other => other.to_string(),
        }
    }

    pub fn body(&self) -> ErrorBody {
        let status = self.status();
        ErrorBody {
            timestamp: Utc::now().to_rfc3339(),
            status: status_name(status),
            code: status.as_u16(),
            error: self.error_name().to_string(),
            message: self.message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.error_name(), error = %self, "request failed");
        } else {
            warn!(code = self.error_name(), error = %self, "request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

/// HTTP status for a typed runtime cause.
pub fn status_for(cause: ErrorCause) -> StatusCode {
    match cause {
        ErrorCause::AlreadyRunning | ErrorCause::CancelTrigger => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCause::InvalidTrigger => StatusCode::NOT_ACCEPTABLE,
        ErrorCause::InvalidSearchModel => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `UNPROCESSABLE_ENTITY` style name of a status code.
fn status_name(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("UNKNOWN")
        .replace([' ', '-'], "_")
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use timeagent_store::StoreError;

    #[test]
    fn causes_map_to_status_codes() {
        assert_eq!(status_for(ErrorCause::AlreadyRunning), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(ErrorCause::CancelTrigger), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(ErrorCause::InvalidTrigger), StatusCode::NOT_ACCEPTABLE);
        assert_eq!(
            status_for(ErrorCause::InvalidSearchModel),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn body_carries_status_name_and_cause() {
        let err = ApiError::from(RuntimeError::new(
            ErrorCause::AlreadyRunning,
            "the agent is already running",
        ));
        let body = err.body();

        assert_eq!(body.status, "UNPROCESSABLE_ENTITY");
        assert_eq!(body.code, 422);
        assert_eq!(body.error, "ALREADY_RUNNING");
        assert_eq!(body.message, "the agent is already running");
        assert!(!body.timestamp.is_empty());
    }

    #[test]
    fn store_failure_is_internal() {
        let err = ApiError::from(SchedulerError::from(StoreError::NotFound { id: 3 }));
        let body = err.body();

        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.status, "INTERNAL_SERVER_ERROR");
        assert_eq!(body.error, "DATABASE_ERROR");
    }

    #[test]
    fn bad_request_body() {
        let body = ApiError::BadRequest("expected an array".into()).body();
        assert_eq!(body.code, 400);
        assert_eq!(body.status, "BAD_REQUEST");
    }
}

//! `timeagent-core`: configuration, shared data model and error types
//! for the scheduled job runner.

pub mod config;
pub mod error;
pub mod types;

pub use error::{CoreError, ErrorCause, JobError, Result, RuntimeError};
pub use types::{now, AgentInfo, AgentStatus, Argument, InfoSearch, ProtocolEntry};

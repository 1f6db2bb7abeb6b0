//! `timeagent-scheduler`: single-agent run orchestration.
//!
//! # Overview
//!
//! One [`AgentScheduler`] owns a worker of size one and at most one installed
//! cron trigger. Manual runs and cron firings go through the same
//! single-flight gate; a firing that arrives while the agent is busy is
//! dropped, never queued.
//!
//! | Component        | Role                                                   |
//! |------------------|--------------------------------------------------------|
//! | [`AgentRuntime`] | READY → RUNNING → FINISHED/ABORTED for one run         |
//! | [`ModelEngine`]  | next current record, pending cron slot                 |
//! | [`SearchEngine`] | search validation, limit normalisation, query planning |
//! | [`trigger`]      | cron parsing and the firing loop                       |

pub mod error;
pub mod model;
pub mod runtime;
pub mod scheduler;
pub mod search;
pub mod trigger;

pub use error::{ExecuteError, Result, SchedulerError};
pub use model::ModelEngine;
pub use runtime::{Agent, AgentRuntime, RunContext, RunRequest, SharedInfo, CRON_EXECUTOR};
pub use scheduler::AgentScheduler;
pub use search::SearchEngine;
pub use trigger::CronTrigger;

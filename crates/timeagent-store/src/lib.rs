//! `timeagent-store`: SQLite persistence for run history.
//!
//! Two tables: `info` holds one row per run (plus the current record and the
//! optional pending cron slot), `protocol` holds the ordered log lines of each
//! run and cascades on delete.

pub mod db;
pub mod error;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use query::{InfoQuery, TimeWindow};
pub use store::HistoryStore;

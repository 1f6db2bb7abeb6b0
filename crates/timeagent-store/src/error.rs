use thiserror::Error;

/// Errors that can occur within the history store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A persisted row could not be mapped back to the model.
    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    /// No record with the given id exists.
    #[error("Record not found: {id}")]
    NotFound { id: i64 },

    /// The connection mutex was poisoned by a panicking writer.
    #[error("Store connection poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

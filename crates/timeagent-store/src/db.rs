use rusqlite::Connection;

use crate::error::Result;

/// Initialise the history schema in `conn`.
///
/// Safe to call on every startup; it uses `IF NOT EXISTS` throughout. Status is
/// stored as its enum name, timestamps as RFC 3339 UTC with microseconds so
/// that text ordering matches time ordering.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS info (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_name   TEXT    NOT NULL,
            cron_trigger TEXT,
            executor     TEXT,
            start_time   TEXT,
            finish_time  TEXT,
            status       TEXT    NOT NULL,
            created_at   TEXT    NOT NULL,
            updated_at   TEXT    NOT NULL
        );

        -- every finder filters on agent_name and sorts by updated_at
        CREATE INDEX IF NOT EXISTS idx_info_agent_updated
            ON info (agent_name, updated_at DESC);

        CREATE TABLE IF NOT EXISTS protocol (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            info_id     INTEGER NOT NULL REFERENCES info (id) ON DELETE CASCADE,
            message     TEXT    NOT NULL,
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_protocol_info ON protocol (info_id, id);
        ",
    )?;
    Ok(())
}

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use timeagent_core::{now, AgentInfo, AgentStatus, ProtocolEntry};
use tracing::{debug, info, instrument, warn};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::query::InfoQuery;

/// Protocol line written onto records left RUNNING by a crashed process.
pub const INTERRUPTED_MESSAGE: &str = "aborted: process restarted while running";

const INFO_COLUMNS: &str = "id, agent_name, cron_trigger, executor, start_time, finish_time,
                            status, created_at, updated_at";

/// Durable table of past and current run records.
///
/// Cheap to clone: all clones share one SQLite connection behind a `Mutex`,
/// which is enough for a single runner process.
#[derive(Clone)]
pub struct HistoryStore {
    db: Arc<Mutex<Connection>>,
}

impl HistoryStore {
    /// Wrap an already-open connection and initialise the schema.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &str, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!(%path, "history store opened");
        Self::new(conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Insert `info` when it has no id, update it otherwise.
    ///
    /// Assigns `id` and `created_at` on insert and bumps `updated_at` on every
    /// call. The protocol is rewritten in the same transaction so its order
    /// always matches the in-memory order.
    #[instrument(skip(self, info), fields(id = ?info.id, status = %info.status))]
    pub fn save(&self, info: &mut AgentInfo) -> Result<()> {
        let mut db = self.conn()?;
        save_in(&mut db, info)
    }

    /// Most recently updated record for `agent_name`, optionally restricted to
    /// one status.
    #[instrument(skip(self))]
    pub fn find_latest(
        &self,
        agent_name: &str,
        status: Option<AgentStatus>,
    ) -> Result<Option<AgentInfo>> {
        let db = self.conn()?;
        let row = match status {
            Some(status) => db
                .query_row(
                    &format!(
                        "SELECT {INFO_COLUMNS} FROM info
                         WHERE agent_name = ?1 AND status = ?2
                         ORDER BY updated_at DESC, id DESC LIMIT 1"
                    ),
                    params![agent_name, status.as_str()],
                    row_to_raw,
                )
                .optional()?,
            None => db
                .query_row(
                    &format!(
                        "SELECT {INFO_COLUMNS} FROM info
                         WHERE agent_name = ?1
                         ORDER BY updated_at DESC, id DESC LIMIT 1"
                    ),
                    params![agent_name],
                    row_to_raw,
                )
                .optional()?,
        };
        row.map(|raw| hydrate(&db, raw)).transpose()
    }

    /// Run one history query; every returned record has its protocol loaded.
    #[instrument(skip(self), fields(agent = %query.agent_name, limit = query.limit))]
    pub fn find(&self, query: &InfoQuery) -> Result<Vec<AgentInfo>> {
        let db = self.conn()?;
        let (sql, values) = query.to_sql();
        let raws: Vec<RawInfo> = {
            let mut stmt = db.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), row_to_raw)?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        debug!(count = raws.len(), "history query returned");
        raws.into_iter().map(|raw| hydrate(&db, raw)).collect()
    }

    /// Load one record by id.
    pub fn get(&self, id: i64) -> Result<Option<AgentInfo>> {
        let db = self.conn()?;
        let row = db
            .query_row(
                &format!("SELECT {INFO_COLUMNS} FROM info WHERE id = ?1"),
                params![id],
                row_to_raw,
            )
            .optional()?;
        row.map(|raw| hydrate(&db, raw)).transpose()
    }

    /// Delete a record; its protocol lines go with it.
    #[instrument(skip(self))]
    pub fn delete(&self, id: i64) -> Result<()> {
        let db = self.conn()?;
        let n = db.execute("DELETE FROM info WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(StoreError::NotFound { id });
        }
        info!(id, "history record deleted");
        Ok(())
    }

    /// Number of records for `agent_name`, optionally restricted to one status.
    pub fn count(&self, agent_name: &str, status: Option<AgentStatus>) -> Result<i64> {
        let db = self.conn()?;
        let n = match status {
            Some(status) => db.query_row(
                "SELECT COUNT(*) FROM info WHERE agent_name = ?1 AND status = ?2",
                params![agent_name, status.as_str()],
                |row| row.get(0),
            )?,
            None => db.query_row(
                "SELECT COUNT(*) FROM info WHERE agent_name = ?1",
                params![agent_name],
                |row| row.get(0),
            )?,
        };
        Ok(n)
    }

    /// Mark every RUNNING record of `agent_name` as ABORTED.
    ///
    /// A RUNNING row at startup belongs to a process that died mid-run; left
    /// alone it would sit next to the fresh current record forever.
    #[instrument(skip(self))]
    pub fn recover_interrupted(&self, agent_name: &str) -> Result<usize> {
        let mut db = self.conn()?;
        let stale: Vec<AgentInfo> = {
            let raws: Vec<RawInfo> = {
                let mut stmt = db.prepare(&format!(
                    "SELECT {INFO_COLUMNS} FROM info WHERE agent_name = ?1 AND status = ?2"
                ))?;
                let rows = stmt.query_map(
                    params![agent_name, AgentStatus::Running.as_str()],
                    row_to_raw,
                )?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            raws.into_iter()
                .map(|raw| hydrate(&db, raw))
                .collect::<Result<_>>()?
        };

        let count = stale.len();
        for mut info in stale {
            info.status = AgentStatus::Aborted;
            info.finish_time = Some(now());
            info.add_protocol(INTERRUPTED_MESSAGE);
            save_in(&mut db, &mut info)?;
            warn!(id = ?info.id, "interrupted run marked aborted");
        }
        Ok(count)
    }
}

/// Fixed-width RFC 3339 so that text comparison in SQL is time comparison.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(table: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            reason: format!("bad timestamp {value:?}: {e}"),
        })
}

fn parse_opt_ts(table: &'static str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(|v| parse_ts(table, v)).transpose()
}

/// `updated_at` never moves backwards for a given record.
fn next_update_ts(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let current = now();
    match previous {
        Some(prev) if current <= prev => prev + chrono::Duration::microseconds(1),
        _ => current,
    }
}

/// Drop sub-microsecond digits so the in-memory record equals what a reload
/// returns.
fn truncate_timestamps(info: &mut AgentInfo) {
    for ts in [
        &mut info.created_at,
        &mut info.updated_at,
        &mut info.start_time,
        &mut info.finish_time,
    ] {
        *ts = ts.map(|t| t.trunc_subsecs(6));
    }
    for entry in &mut info.protocol {
        entry.created_at = entry.created_at.trunc_subsecs(6);
    }
}

fn save_in(db: &mut Connection, info: &mut AgentInfo) -> Result<()> {
    truncate_timestamps(info);
    let updated_at = next_update_ts(info.updated_at);
    let tx = db.transaction()?;

    let id = match info.id {
        None => {
            let created_at = info.created_at.unwrap_or(updated_at);
            tx.execute(
                "INSERT INTO info
                 (agent_name, cron_trigger, executor, start_time, finish_time,
                  status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    info.agent_name,
                    info.cron_trigger,
                    info.executor,
                    info.start_time.as_ref().map(format_ts),
                    info.finish_time.as_ref().map(format_ts),
                    info.status.as_str(),
                    format_ts(&created_at),
                    format_ts(&updated_at),
                ],
            )?;
            info.created_at = Some(created_at);
            tx.last_insert_rowid()
        }
        Some(id) => {
            let n = tx.execute(
                "UPDATE info SET cron_trigger = ?1, executor = ?2, start_time = ?3,
                        finish_time = ?4, status = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    info.cron_trigger,
                    info.executor,
                    info.start_time.as_ref().map(format_ts),
                    info.finish_time.as_ref().map(format_ts),
                    info.status.as_str(),
                    format_ts(&updated_at),
                    id,
                ],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound { id });
            }
            id
        }
    };

    tx.execute("DELETE FROM protocol WHERE info_id = ?1", params![id])?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO protocol (info_id, message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for entry in &info.protocol {
            stmt.execute(params![
                id,
                entry.message,
                format_ts(&entry.created_at),
                format_ts(&updated_at),
            ])?;
        }
    }
    tx.commit()?;

    info.id = Some(id);
    info.updated_at = Some(updated_at);
    debug!(id, lines = info.protocol.len(), "agent info saved");
    Ok(())
}

/// Column values of one `info` row before timestamp parsing.
struct RawInfo {
    id: i64,
    agent_name: String,
    cron_trigger: Option<String>,
    executor: Option<String>,
    start_time: Option<String>,
    finish_time: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawInfo> {
    Ok(RawInfo {
        id: row.get(0)?,
        agent_name: row.get(1)?,
        cron_trigger: row.get(2)?,
        executor: row.get(3)?,
        start_time: row.get(4)?,
        finish_time: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn hydrate(db: &Connection, raw: RawInfo) -> Result<AgentInfo> {
    let status: AgentStatus = raw.status.parse().map_err(|reason| StoreError::CorruptRow {
        table: "info",
        reason,
    })?;

    let protocol = {
        let mut stmt = db.prepare_cached(
            "SELECT message, created_at FROM protocol WHERE info_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![raw.id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (message, created_at) = row?;
            entries.push(ProtocolEntry {
                message,
                created_at: parse_ts("protocol", &created_at)?,
            });
        }
        entries
    };

    Ok(AgentInfo {
        id: Some(raw.id),
        agent_name: raw.agent_name,
        created_at: Some(parse_ts("info", &raw.created_at)?),
        updated_at: Some(parse_ts("info", &raw.updated_at)?),
        start_time: parse_opt_ts("info", raw.start_time)?,
        finish_time: parse_opt_ts("info", raw.finish_time)?,
        executor: raw.executor,
        status,
        cron_trigger: raw.cron_trigger,
        protocol,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::TimeWindow;
    use chrono::Duration as ChronoDuration;

    fn store() -> HistoryStore {
        HistoryStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn finished(store: &HistoryStore, executor: &str, start: DateTime<Utc>) -> AgentInfo {
        let mut info = AgentInfo::new("agent", AgentStatus::Finished);
        info.executor = Some(executor.to_string());
        info.start_time = Some(start);
        info.finish_time = Some(start + ChronoDuration::seconds(1));
        info.add_protocol(format!("run by {executor}"));
        store.save(&mut info).unwrap();
        info
    }

    #[test]
    fn save_assigns_id_and_timestamps() {
        let store = store();
        let mut info = AgentInfo::new("agent", AgentStatus::Ready);
        store.save(&mut info).unwrap();

        assert!(info.id.is_some());
        assert!(info.created_at.is_some());
        assert_eq!(info.created_at, info.updated_at);
    }

    #[test]
    fn save_with_id_updates_in_place() {
        let store = store();
        let mut info = AgentInfo::new("agent", AgentStatus::Ready);
        store.save(&mut info).unwrap();
        let id = info.id;
        let first_update = info.updated_at.unwrap();

        info.status = AgentStatus::Running;
        store.save(&mut info).unwrap();

        assert_eq!(info.id, id);
        assert!(info.updated_at.unwrap() > first_update);
        assert_eq!(store.count("agent", None).unwrap(), 1);
    }

    #[test]
    fn persist_then_load_is_equal() {
        let store = store();
        let mut info = AgentInfo::new("agent", AgentStatus::Running);
        info.executor = Some("x123456".to_string());
        info.cron_trigger = Some("0 0/3 * 1/1 * ?".to_string());
        info.start_time = Some(Utc::now());
        info.add_protocol("first");
        info.add_protocol("second");
        info.add_protocol("third");
        store.save(&mut info).unwrap();

        let loaded = store.get(info.id.unwrap()).unwrap().unwrap();
        assert_eq!(loaded, info);
        assert_eq!(
            loaded.messages().collect::<Vec<_>>(),
            vec!["first", "second", "third"]
        );

        // an update with a finish time still reloads equal
        info.status = AgentStatus::Finished;
        info.finish_time = Some(Utc::now());
        info.add_protocol("fourth");
        store.save(&mut info).unwrap();
        assert_eq!(store.get(info.id.unwrap()).unwrap().unwrap(), info);
    }

    #[test]
    fn find_latest_respects_status_filter() {
        let store = store();
        let mut slot = AgentInfo::new("agent", AgentStatus::NotSet);
        store.save(&mut slot).unwrap();
        let mut ready = AgentInfo::new("agent", AgentStatus::Ready);
        store.save(&mut ready).unwrap();

        let latest = store.find_latest("agent", None).unwrap().unwrap();
        assert_eq!(latest.id, ready.id);

        let pending = store
            .find_latest("agent", Some(AgentStatus::NotSet))
            .unwrap()
            .unwrap();
        assert_eq!(pending.id, slot.id);

        assert!(store.find_latest("other", None).unwrap().is_none());
    }

    #[test]
    fn find_filters_and_orders_newest_first() {
        let store = store();
        let base = Utc::now() - ChronoDuration::hours(3);
        let a1 = finished(&store, "a", base);
        let _b = finished(&store, "b", base + ChronoDuration::hours(1));
        let a2 = finished(&store, "a", base + ChronoDuration::hours(2));

        let query = InfoQuery::new("agent", 10)
            .with_status(AgentStatus::Finished)
            .with_executor("a");
        let found = store.find(&query).unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, a2.id);
        assert_eq!(found[1].id, a1.id);
        assert_eq!(found[0].messages().collect::<Vec<_>>(), vec!["run by a"]);
    }

    #[test]
    fn find_applies_time_windows() {
        let store = store();
        let base = Utc::now() - ChronoDuration::hours(3);
        let early = finished(&store, "a", base);
        let middle = finished(&store, "a", base + ChronoDuration::hours(1));
        let late = finished(&store, "a", base + ChronoDuration::hours(2));

        let after = store
            .find(&InfoQuery::new("agent", 10).with_window(TimeWindow::After(
                base + ChronoDuration::minutes(30),
            )))
            .unwrap();
        assert_eq!(after.iter().map(|i| i.id).collect::<Vec<_>>(), vec![late.id, middle.id]);

        let before = store
            .find(&InfoQuery::new("agent", 10).with_window(TimeWindow::Before(
                base + ChronoDuration::minutes(30),
            )))
            .unwrap();
        assert_eq!(before.iter().map(|i| i.id).collect::<Vec<_>>(), vec![early.id]);

        let between = store
            .find(&InfoQuery::new("agent", 10).with_window(TimeWindow::Between(
                base + ChronoDuration::hours(1),
                base + ChronoDuration::hours(2),
            )))
            .unwrap();
        assert_eq!(between.iter().map(|i| i.id).collect::<Vec<_>>(), vec![late.id, middle.id]);
    }

    #[test]
    fn find_honours_limit() {
        let store = store();
        let base = Utc::now();
        for i in 0..5 {
            finished(&store, "a", base + ChronoDuration::seconds(i));
        }
        assert_eq!(store.find(&InfoQuery::new("agent", 3)).unwrap().len(), 3);
    }

    #[test]
    fn delete_cascades_protocol() {
        let store = store();
        let info = finished(&store, "a", Utc::now());
        let id = info.id.unwrap();
        store.delete(id).unwrap();

        let db = store.conn().unwrap();
        let lines: i64 = db
            .query_row("SELECT COUNT(*) FROM protocol WHERE info_id = ?1", params![id], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(lines, 0);
        drop(db);
        assert!(matches!(store.delete(id), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn recover_interrupted_aborts_running_rows() {
        let store = store();
        let mut running = AgentInfo::new("agent", AgentStatus::Running);
        running.start_time = Some(Utc::now());
        store.save(&mut running).unwrap();

        assert_eq!(store.recover_interrupted("agent").unwrap(), 1);

        let loaded = store.get(running.id.unwrap()).unwrap().unwrap();
        assert_eq!(loaded.status, AgentStatus::Aborted);
        assert!(loaded.finish_time.is_some());
        assert_eq!(loaded.messages().last(), Some(INTERRUPTED_MESSAGE));
        assert_eq!(store.recover_interrupted("agent").unwrap(), 0);
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let path = path.to_str().unwrap();

        let id = {
            let store = HistoryStore::open(path, Duration::from_secs(1)).unwrap();
            let mut info = AgentInfo::new("agent", AgentStatus::Ready);
            info.add_protocol("kept");
            store.save(&mut info).unwrap();
            info.id.unwrap()
        };

        let store = HistoryStore::open(path, Duration::from_secs(1)).unwrap();
        let loaded = store.get(id).unwrap().unwrap();
        assert_eq!(loaded.messages().collect::<Vec<_>>(), vec!["kept"]);
    }
}

use timeagent_core::{AgentInfo, AgentStatus};
use timeagent_store::HistoryStore;
use tracing::{debug, info, instrument};

use crate::error::Result;

/// Reconciles prior-run state into the current record.
///
/// The only component that moves a record across a run boundary: it turns
/// the pending cron slot or the last run into a fresh READY record, and it
/// decides where a new cron expression is stored.
#[derive(Clone)]
pub struct ModelEngine {
    agent_name: String,
    store: HistoryStore,
}

impl ModelEngine {
    pub fn new(agent_name: impl Into<String>, store: HistoryStore) -> Self {
        Self {
            agent_name: agent_name.into(),
            store,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// Derive and persist the next current record. Never returns an empty
    /// result: a missing history yields a brand-new READY record.
    ///
    /// Order of preference:
    /// 1. the pending cron slot (NOT_SET), promoted to READY;
    /// 2. the last record: reused if it never ran (NOT_SET or READY),
    ///    otherwise re-initialised into a new row that keeps the cron trigger;
    /// 3. a new READY record.
    #[instrument(skip(self), fields(agent = %self.agent_name))]
    pub fn next_info(&self) -> Result<AgentInfo> {
        if let Some(mut slot) = self
            .store
            .find_latest(&self.agent_name, Some(AgentStatus::NotSet))?
        {
            debug!(id = ?slot.id, trigger = ?slot.cron_trigger, "promoting pending cron slot");
            slot.status = AgentStatus::Ready;
            self.store.save(&mut slot)?;
            return Ok(slot);
        }

        let mut info = match self.store.find_latest(&self.agent_name, None)? {
            None => {
                debug!("no history, creating first record");
                AgentInfo::new(self.agent_name.as_str(), AgentStatus::Ready)
            }
            Some(mut last) if matches!(last.status, AgentStatus::NotSet | AgentStatus::Ready) => {
                debug!(id = ?last.id, status = %last.status, "reusing record that never ran");
                last.status = AgentStatus::Ready;
                last
            }
            Some(mut last) => {
                debug!(id = ?last.id, status = %last.status, "re-initialising last record");
                last.reinit();
                last
            }
        };

        self.store.save(&mut info)?;
        info!(id = ?info.id, trigger = ?info.cron_trigger, "next agent info ready");
        Ok(info)
    }

    /// Persist `trigger` (or its removal) and return the record that now owns it.
    ///
    /// A READY current record takes the expression directly. Any other current
    /// record must not change, so the expression is staged on the pending
    /// NOT_SET slot (created on demand) and adopted by the next
    /// [`next_info`](Self::next_info).
    #[instrument(skip(self, current), fields(agent = %self.agent_name, status = %current.status))]
    pub fn save_trigger(&self, trigger: Option<&str>, current: &mut AgentInfo) -> Result<AgentInfo> {
        if current.status == AgentStatus::Ready {
            current.cron_trigger = trigger.map(str::to_string);
            self.store.save(current)?;
            debug!(trigger = ?current.cron_trigger, "trigger saved on current record");
            return Ok(current.clone());
        }

        let mut slot = self
            .store
            .find_latest(&self.agent_name, Some(AgentStatus::NotSet))?
            .unwrap_or_else(|| AgentInfo::new(self.agent_name.as_str(), AgentStatus::NotSet));
        slot.cron_trigger = trigger.map(str::to_string);
        self.store.save(&mut slot)?;
        debug!(id = ?slot.id, trigger = ?slot.cron_trigger, "trigger staged on pending slot");
        Ok(slot)
    }

    /// Persist `info` as-is.
    pub fn update(&self, info: &mut AgentInfo) -> Result<()> {
        self.store.save(info)?;
        Ok(())
    }
}

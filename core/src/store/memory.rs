//! In-memory implementation of the storage port. Used by tests and
//! anywhere durability is not required.

use super::LedgerStore;
use crate::{
    account::Account,
    error::LedgerResult,
    escrow::{EscrowSession, EscrowStatus},
    event::EventLogEntry,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<String, Account>>,
    sessions: RwLock<HashMap<String, EscrowSession>>,
    events: RwLock<Vec<EventLogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn load_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        Ok(self.accounts.read().get(account_id).cloned())
    }

    fn save_account(&self, account: &Account) -> LedgerResult<()> {
        self.accounts
            .write()
            .insert(account.account_id.clone(), account.clone());
        Ok(())
    }

    fn account_ids(&self) -> LedgerResult<Vec<String>> {
        let mut ids: Vec<String> = self.accounts.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn load_session(&self, session_id: &str) -> LedgerResult<Option<EscrowSession>> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    fn save_session(&self, session: &EscrowSession) -> LedgerResult<()> {
        self.sessions
            .write()
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    fn sessions_for_account(&self, account_id: &str) -> LedgerResult<Vec<EscrowSession>> {
        let mut sessions: Vec<EscrowSession> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.account_id == account_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    fn pending_sessions_due(&self, now: DateTime<Utc>) -> LedgerResult<Vec<EscrowSession>> {
        let mut due: Vec<EscrowSession> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.status == EscrowStatus::Pending && s.expires_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|s| s.expires_at);
        Ok(due)
    }

    fn append_event(&self, entry: &EventLogEntry) -> LedgerResult<()> {
        let mut events = self.events.write();
        let mut entry = entry.clone();
        entry.id = Some(events.len() as i64 + 1);
        events.push(entry);
        Ok(())
    }

    fn events_for_account(&self, account_id: &str) -> LedgerResult<Vec<EventLogEntry>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect())
    }
}

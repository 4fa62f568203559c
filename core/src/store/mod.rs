//! Storage port.
//!
//! RULE: Only store implementations talk to a backend.
//! The ledger calls port methods — it never executes SQL directly,
//! and any durable backend may sit behind the trait.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::{
    account::Account,
    error::LedgerResult,
    escrow::EscrowSession,
    event::EventLogEntry,
};
use chrono::{DateTime, Utc};

/// The persisted shape the engine requires: accounts keyed by id,
/// escrow sessions keyed by id and queryable by account and by due
/// time, and an append-only event log.
pub trait LedgerStore: Send + Sync {
    fn load_account(&self, account_id: &str) -> LedgerResult<Option<Account>>;
    fn save_account(&self, account: &Account) -> LedgerResult<()>;
    fn account_ids(&self) -> LedgerResult<Vec<String>>;

    fn load_session(&self, session_id: &str) -> LedgerResult<Option<EscrowSession>>;
    fn save_session(&self, session: &EscrowSession) -> LedgerResult<()>;
    fn sessions_for_account(&self, account_id: &str) -> LedgerResult<Vec<EscrowSession>>;
    /// Pending sessions whose `expires_at` is at or before `now`,
    /// ordered by expiry. The sweep's work queue.
    fn pending_sessions_due(&self, now: DateTime<Utc>) -> LedgerResult<Vec<EscrowSession>>;

    fn append_event(&self, entry: &EventLogEntry) -> LedgerResult<()>;
    fn events_for_account(&self, account_id: &str) -> LedgerResult<Vec<EventLogEntry>>;
}

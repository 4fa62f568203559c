//! SQLite implementation of the storage port.

use super::LedgerStore;
use crate::{
    account::{Account, UsageStats},
    error::{LedgerError, LedgerResult},
    escrow::{EscrowSession, EscrowStatus},
    event::EventLogEntry,
};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

/// Connection behind a mutex so the store is shareable across the
/// per-account workers; each port call holds it only for one statement.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl SqliteStore {
    pub fn open(path: &str) -> LedgerResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only matters for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests and the demo driver).
    pub fn in_memory() -> LedgerResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> LedgerResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(include_str!("../../../migrations/001_ledger.sql"))?;
        Ok(())
    }
}

impl LedgerStore for SqliteStore {
    fn load_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        let conn = self.conn.lock();
        let row: Option<AccountRow> = conn
            .query_row(
                "SELECT account_id, balance, earned_total, spent_total, pending_escrow,
                        tier_level, achievements, gb_shared, communities_created, created_at
                 FROM account WHERE account_id = ?1",
                params![account_id],
                account_row_mapper,
            )
            .optional()?;
        row.map(AccountRow::into_account).transpose()
    }

    fn save_account(&self, account: &Account) -> LedgerResult<()> {
        let achievements = serde_json::to_string(&account.achievements)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO account (
                account_id, balance, earned_total, spent_total, pending_escrow,
                tier_level, achievements, gb_shared, communities_created, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(account_id) DO UPDATE SET
                balance = excluded.balance,
                earned_total = excluded.earned_total,
                spent_total = excluded.spent_total,
                pending_escrow = excluded.pending_escrow,
                tier_level = excluded.tier_level,
                achievements = excluded.achievements,
                gb_shared = excluded.gb_shared,
                communities_created = excluded.communities_created",
            params![
                account.account_id,
                account.balance,
                account.earned_total,
                account.spent_total,
                account.pending_escrow,
                account.tier_level as i64,
                achievements,
                account.stats.gb_shared,
                account.stats.communities_created as i64,
                account.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn account_ids(&self) -> LedgerResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT account_id FROM account ORDER BY account_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn load_session(&self, session_id: &str) -> LedgerResult<Option<EscrowSession>> {
        let conn = self.conn.lock();
        let row: Option<SessionRow> = conn
            .query_row(
                "SELECT session_id, account_id, amount, status, created_at, expires_at, settled_at
                 FROM escrow_session WHERE session_id = ?1",
                params![session_id],
                session_row_mapper,
            )
            .optional()?;
        row.map(SessionRow::into_session).transpose()
    }

    fn save_session(&self, session: &EscrowSession) -> LedgerResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO escrow_session (
                session_id, account_id, amount, status, created_at, expires_at, settled_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(session_id) DO UPDATE SET
                status = excluded.status,
                settled_at = excluded.settled_at",
            params![
                session.session_id,
                session.account_id,
                session.amount,
                session.status.as_str(),
                session.created_at.to_rfc3339(),
                session.expires_at.to_rfc3339(),
                session.settled_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn sessions_for_account(&self, account_id: &str) -> LedgerResult<Vec<EscrowSession>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, account_id, amount, status, created_at, expires_at, settled_at
             FROM escrow_session WHERE account_id = ?1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![account_id], session_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    fn pending_sessions_due(&self, now: DateTime<Utc>) -> LedgerResult<Vec<EscrowSession>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, account_id, amount, status, created_at, expires_at, settled_at
             FROM escrow_session
             WHERE status = 'pending' AND expires_at <= ?1
             ORDER BY expires_at ASC",
        )?;
        let rows = stmt
            .query_map(params![now.to_rfc3339()], session_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    fn append_event(&self, entry: &EventLogEntry) -> LedgerResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO event_log (account_id, event_type, payload, occurred_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.account_id,
                entry.event_type,
                entry.payload,
                entry.occurred_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn events_for_account(&self, account_id: &str) -> LedgerResult<Vec<EventLogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, account_id, event_type, payload, occurred_at
             FROM event_log WHERE account_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![account_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, account_id, event_type, payload, occurred_at)| {
                Ok(EventLogEntry {
                    id: Some(id),
                    account_id,
                    event_type,
                    payload,
                    occurred_at: parse_ts(&occurred_at)?,
                })
            })
            .collect()
    }
}

// ── Row mapping ────────────────────────────────────────────────────

/// Raw account row; timestamps and JSON columns decoded outside the
/// rusqlite closure so failures surface as LedgerError.
struct AccountRow {
    account_id: String,
    balance: f64,
    earned_total: f64,
    spent_total: f64,
    pending_escrow: f64,
    tier_level: i64,
    achievements: String,
    gb_shared: f64,
    communities_created: i64,
    created_at: String,
}

fn account_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccountRow> {
    Ok(AccountRow {
        account_id: row.get(0)?,
        balance: row.get(1)?,
        earned_total: row.get(2)?,
        spent_total: row.get(3)?,
        pending_escrow: row.get(4)?,
        tier_level: row.get(5)?,
        achievements: row.get(6)?,
        gb_shared: row.get(7)?,
        communities_created: row.get(8)?,
        created_at: row.get(9)?,
    })
}

impl AccountRow {
    fn into_account(self) -> LedgerResult<Account> {
        Ok(Account {
            account_id: self.account_id,
            balance: self.balance,
            earned_total: self.earned_total,
            spent_total: self.spent_total,
            pending_escrow: self.pending_escrow,
            tier_level: self.tier_level as u8,
            achievements: serde_json::from_str(&self.achievements)?,
            stats: UsageStats {
                gb_shared: self.gb_shared,
                communities_created: self.communities_created as u32,
            },
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct SessionRow {
    session_id: String,
    account_id: String,
    amount: f64,
    status: String,
    created_at: String,
    expires_at: String,
    settled_at: Option<String>,
}

fn session_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        session_id: row.get(0)?,
        account_id: row.get(1)?,
        amount: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        expires_at: row.get(5)?,
        settled_at: row.get(6)?,
    })
}

impl SessionRow {
    fn into_session(self) -> LedgerResult<EscrowSession> {
        let status = EscrowStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("unknown escrow status '{}'", self.status))?;
        Ok(EscrowSession {
            session_id: self.session_id,
            account_id: self.account_id,
            amount: self.amount,
            status,
            created_at: parse_ts(&self.created_at)?,
            expires_at: parse_ts(&self.expires_at)?,
            settled_at: self.settled_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow!("bad timestamp '{s}': {e}").into())
}

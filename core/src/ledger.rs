//! The ledger — authoritative per-account balance and transaction state.
//!
//! RULES:
//!   - Every mutation is serialized per account: one live mutation per
//!     account id, different accounts fully in parallel. No global lock.
//!   - Reads return cloned snapshots and never block writers.
//!   - Every mutation preserves the accounting identity
//!     `balance = earned_total - spent_total - pending_escrow`.
//!   - All state changes are recorded in the event log and forwarded to
//!     subscriber channels before the account lock is released.

use crate::{
    account::Account,
    achievement::UnlockOutcome,
    clock::Clock,
    error::{LedgerError, LedgerResult},
    escrow::{EscrowOutcome, EscrowSession, EscrowStatus},
    event::{event_type_name, EventBus, EventLogEntry, LedgerEvent},
    store::LedgerStore,
    tier::{TierDefinition, TierTable},
    types::{AccountId, Credits},
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    sync::{mpsc::Receiver, Arc},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditReason {
    Earn,
    Achievement,
}

impl CreditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earn => "earn",
            Self::Achievement => "achievement",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitReason {
    Purchase,
}

impl DebitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
        }
    }
}

/// Result of re-deriving an account's tier after a balance change.
struct TierShift {
    from_level: u8,
    to_level: u8,
    tier_name: String,
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    tiers: Arc<TierTable>,
    bus: EventBus,
    /// Per-account cells. The cell mutex IS the account's write
    /// serialization; the outer map lock is held only to fetch a cell.
    accounts: RwLock<HashMap<AccountId, Arc<Mutex<Account>>>>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, tiers: Arc<TierTable>) -> Self {
        Self {
            store,
            clock,
            tiers,
            bus: EventBus::new(),
            accounts: RwLock::new(HashMap::new()),
        }
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Outbound event channel. Every ledger event is delivered to every
    /// receiver subscribed at emit time.
    pub fn subscribe(&self) -> Receiver<LedgerEvent> {
        self.bus.subscribe()
    }

    // ── Reads (lock-free snapshots) ────────────────────────────────

    pub fn get_account(&self, account_id: &str) -> LedgerResult<Account> {
        if let Some(cell) = self.accounts.read().get(account_id) {
            return Ok(cell.lock().clone());
        }
        self.store
            .load_account(account_id)?
            .ok_or_else(|| LedgerError::UnknownAccount(account_id.to_string()))
    }

    pub fn get_tier(&self, account_id: &str) -> LedgerResult<TierDefinition> {
        let account = self.get_account(account_id)?;
        let tier = self
            .tiers
            .by_level(account.tier_level)
            .cloned()
            .unwrap_or_else(|| self.tiers.tier_for_balance(account.balance).clone());
        Ok(tier)
    }

    pub fn get_session(&self, session_id: &str) -> LedgerResult<EscrowSession> {
        self.store
            .load_session(session_id)?
            .ok_or_else(|| LedgerError::UnknownSession(session_id.to_string()))
    }

    pub fn sessions_for_account(&self, account_id: &str) -> LedgerResult<Vec<EscrowSession>> {
        self.store.sessions_for_account(account_id)
    }

    pub fn sessions_due(&self, now: DateTime<Utc>) -> LedgerResult<Vec<EscrowSession>> {
        self.store.pending_sessions_due(now)
    }

    pub fn events_for_account(&self, account_id: &str) -> LedgerResult<Vec<EventLogEntry>> {
        self.store.events_for_account(account_id)
    }

    // ── Mutations (serialized per account) ─────────────────────────

    pub fn credit(
        &self,
        account_id: &str,
        amount: Credits,
        reason: CreditReason,
    ) -> LedgerResult<Account> {
        ensure_non_negative(amount)?;
        let cell = self.cell(account_id)?;
        let mut guard = cell.lock();
        let mut next = guard.clone();
        let before = next.balance;
        next.balance += amount;
        next.earned_total += amount;
        let shift = self.recompute_tier(&mut next);
        self.store.save_account(&next)?;
        *guard = next.clone();
        debug_assert!(next.invariant_holds());

        let at = self.clock.now();
        self.emit(LedgerEvent::BalanceChanged {
            account_id: account_id.to_string(),
            at,
            balance_before: before,
            balance_after: next.balance,
            reason: reason.as_str().to_string(),
        })?;
        self.emit_tier_shift(account_id, at, before, next.balance, shift)?;
        log::debug!(
            "account={account_id} ledger: credit {amount:.2} ({}) balance {before:.2} -> {:.2}",
            reason.as_str(),
            next.balance
        );
        Ok(next)
    }

    pub fn debit(
        &self,
        account_id: &str,
        amount: Credits,
        reason: DebitReason,
    ) -> LedgerResult<Account> {
        ensure_non_negative(amount)?;
        let cell = self.cell(account_id)?;
        let mut guard = cell.lock();
        if amount > guard.balance {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available: guard.balance,
            });
        }
        let mut next = guard.clone();
        let before = next.balance;
        next.balance -= amount;
        next.spent_total += amount;
        let shift = self.recompute_tier(&mut next);
        self.store.save_account(&next)?;
        *guard = next.clone();
        debug_assert!(next.invariant_holds());

        let at = self.clock.now();
        self.emit(LedgerEvent::BalanceChanged {
            account_id: account_id.to_string(),
            at,
            balance_before: before,
            balance_after: next.balance,
            reason: reason.as_str().to_string(),
        })?;
        self.emit_tier_shift(account_id, at, before, next.balance, shift)?;
        log::debug!(
            "account={account_id} ledger: debit {amount:.2} ({}) balance {before:.2} -> {:.2}",
            reason.as_str(),
            next.balance
        );
        Ok(next)
    }

    /// Move spendable balance into escrow and open a pending session.
    pub fn hold_escrow(
        &self,
        account_id: &str,
        amount: Credits,
        ttl: Duration,
    ) -> LedgerResult<EscrowSession> {
        ensure_non_negative(amount)?;
        let cell = self.cell(account_id)?;
        let mut guard = cell.lock();
        if amount > guard.balance {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available: guard.balance,
            });
        }
        let mut next = guard.clone();
        let before = next.balance;
        next.balance -= amount;
        next.pending_escrow += amount;
        // No tier recompute: held funds are parked, not spent. The tier
        // settles when the session releases.

        let at = self.clock.now();
        let session = EscrowSession {
            session_id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            amount,
            status: EscrowStatus::Pending,
            created_at: at,
            expires_at: at + ttl,
            settled_at: None,
        };
        self.store.save_account(&next)?;
        self.store.save_session(&session)?;
        *guard = next.clone();
        debug_assert!(next.invariant_holds());

        self.emit(LedgerEvent::EscrowCreated {
            account_id: account_id.to_string(),
            at,
            balance_before: before,
            balance_after: next.balance,
            session_id: session.session_id.clone(),
            amount,
            expires_at: session.expires_at,
        })?;
        log::debug!(
            "account={account_id} ledger: escrow hold {amount:.2} session={} expires={}",
            session.session_id,
            session.expires_at
        );
        Ok(session)
    }

    /// Drive a pending session to a terminal state and settle the held
    /// funds. Re-invocation on an already-terminal session is an
    /// idempotent no-op that returns the existing terminal state; the
    /// first terminal transition is the only one that ever moves funds.
    pub fn release_escrow(
        &self,
        session_id: &str,
        outcome: EscrowOutcome,
    ) -> LedgerResult<EscrowSession> {
        let session = self.get_session(session_id)?;
        let cell = self.cell(&session.account_id)?;
        let mut guard = cell.lock();
        // Re-read under the account lock: another transition may have
        // won between the optimistic read and lock acquisition.
        let mut session = self.get_session(session_id)?;
        if session.status.is_terminal() {
            return Ok(session);
        }

        let mut next = guard.clone();
        let before = next.balance;
        next.pending_escrow -= session.amount;
        match outcome {
            EscrowOutcome::Completed => next.spent_total += session.amount,
            EscrowOutcome::Cancelled | EscrowOutcome::Failed | EscrowOutcome::Expired => {
                next.balance += session.amount;
            }
        }
        let shift = self.recompute_tier(&mut next);

        let at = self.clock.now();
        session.status = outcome.status();
        session.settled_at = Some(at);
        self.store.save_session(&session)?;
        self.store.save_account(&next)?;
        *guard = next.clone();
        debug_assert!(next.invariant_holds());

        self.emit(LedgerEvent::EscrowSettled {
            account_id: session.account_id.clone(),
            at,
            balance_before: before,
            balance_after: next.balance,
            session_id: session.session_id.clone(),
            amount: session.amount,
            outcome,
        })?;
        self.emit_tier_shift(&session.account_id, at, before, next.balance, shift)?;
        log::debug!(
            "account={} ledger: escrow {} settled as {}",
            session.account_id,
            session.session_id,
            outcome
        );
        Ok(session)
    }

    /// Membership-check-then-credit as one atomic step under the account
    /// lock: concurrent unlocks of the same achievement cannot both pass
    /// the check. Already unlocked is a no-op, not an error.
    pub fn unlock_achievement(
        &self,
        account_id: &str,
        achievement_id: &str,
        reward: Credits,
    ) -> LedgerResult<UnlockOutcome> {
        ensure_non_negative(reward)?;
        let cell = self.cell(account_id)?;
        let mut guard = cell.lock();
        if guard.achievements.contains(achievement_id) {
            return Ok(UnlockOutcome::AlreadyUnlocked);
        }
        let mut next = guard.clone();
        let before = next.balance;
        next.achievements.insert(achievement_id.to_string());
        next.balance += reward;
        next.earned_total += reward;
        let shift = self.recompute_tier(&mut next);
        self.store.save_account(&next)?;
        *guard = next.clone();
        debug_assert!(next.invariant_holds());

        let at = self.clock.now();
        self.emit(LedgerEvent::AchievementUnlocked {
            account_id: account_id.to_string(),
            at,
            balance_before: before,
            balance_after: next.balance,
            achievement_id: achievement_id.to_string(),
            reward,
        })?;
        self.emit_tier_shift(account_id, at, before, next.balance, shift)?;
        log::info!(
            "account={account_id} ledger: achievement '{achievement_id}' unlocked (+{reward:.2})"
        );
        Ok(UnlockOutcome::Unlocked { reward })
    }

    /// Add to the cumulative bandwidth counter that achievement
    /// triggers read.
    pub fn record_contribution_stats(
        &self,
        account_id: &str,
        gigabytes: f64,
    ) -> LedgerResult<Account> {
        ensure_non_negative(gigabytes)?;
        let cell = self.cell(account_id)?;
        let mut guard = cell.lock();
        let mut next = guard.clone();
        next.stats.gb_shared += gigabytes;
        self.store.save_account(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    pub fn record_community_created(&self, account_id: &str) -> LedgerResult<Account> {
        let cell = self.cell(account_id)?;
        let mut guard = cell.lock();
        let mut next = guard.clone();
        next.stats.communities_created += 1;
        self.store.save_account(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    // ── Internals ──────────────────────────────────────────────────

    /// Fetch or create the account cell. Accounts come into existence
    /// on their first mutating interaction.
    fn cell(&self, account_id: &str) -> LedgerResult<Arc<Mutex<Account>>> {
        if let Some(cell) = self.accounts.read().get(account_id) {
            return Ok(Arc::clone(cell));
        }
        let mut map = self.accounts.write();
        // Double-check: another writer may have created it meanwhile.
        if let Some(cell) = map.get(account_id) {
            return Ok(Arc::clone(cell));
        }
        let account = match self.store.load_account(account_id)? {
            Some(account) => account,
            None => {
                log::debug!("account={account_id} ledger: created on first interaction");
                Account::new(account_id.to_string(), self.clock.now())
            }
        };
        let cell = Arc::new(Mutex::new(account));
        map.insert(account_id.to_string(), Arc::clone(&cell));
        Ok(cell)
    }

    /// Re-derive the tier from the final balance. Returns a shift only
    /// when the tier increased; a single balance change that crosses
    /// several boundaries yields one shift carrying the final tier.
    fn recompute_tier(&self, account: &mut Account) -> Option<TierShift> {
        let tier = self.tiers.tier_for_balance(account.balance);
        let from_level = account.tier_level;
        account.tier_level = tier.level;
        if tier.level > from_level {
            Some(TierShift {
                from_level,
                to_level: tier.level,
                tier_name: tier.name.clone(),
            })
        } else {
            None
        }
    }

    fn emit_tier_shift(
        &self,
        account_id: &str,
        at: DateTime<Utc>,
        balance_before: Credits,
        balance_after: Credits,
        shift: Option<TierShift>,
    ) -> LedgerResult<()> {
        let Some(shift) = shift else {
            return Ok(());
        };
        log::info!(
            "account={account_id} ledger: tier {} -> {} ({})",
            shift.from_level,
            shift.to_level,
            shift.tier_name
        );
        self.emit(LedgerEvent::TierChanged {
            account_id: account_id.to_string(),
            at,
            balance_before,
            balance_after,
            from_level: shift.from_level,
            to_level: shift.to_level,
            tier_name: shift.tier_name,
        })
    }

    /// Persist to the event log, then fan out to subscribers.
    fn emit(&self, event: LedgerEvent) -> LedgerResult<()> {
        let entry = EventLogEntry {
            id: None,
            account_id: event.account_id().to_string(),
            event_type: event_type_name(&event).to_string(),
            payload: serde_json::to_string(&event)?,
            occurred_at: event.occurred_at(),
        };
        self.store.append_event(&entry)?;
        self.bus.publish(&event);
        Ok(())
    }
}

fn ensure_non_negative(amount: Credits) -> LedgerResult<()> {
    if amount < 0.0 {
        return Err(LedgerError::NegativeAmount { amount });
    }
    Ok(())
}

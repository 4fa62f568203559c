//! Domain events — the ledger's outbound contract.
//!
//! RULE: Consumers learn about state changes ONLY through events.
//! Every event is appended to the store's event log at emit time and
//! forwarded to every live subscriber channel. Delivery beyond the
//! channel boundary is out of scope.

use crate::{
    escrow::EscrowOutcome,
    types::{AccountId, Credits, SessionId},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{channel, Receiver, Sender};

/// Every event the ledger emits. Each variant carries the account,
/// the instant, and the balance on both sides of the operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    BalanceChanged {
        account_id: AccountId,
        at: DateTime<Utc>,
        balance_before: Credits,
        balance_after: Credits,
        reason: String,
    },
    TierChanged {
        account_id: AccountId,
        at: DateTime<Utc>,
        balance_before: Credits,
        balance_after: Credits,
        from_level: u8,
        to_level: u8,
        tier_name: String,
    },
    AchievementUnlocked {
        account_id: AccountId,
        at: DateTime<Utc>,
        balance_before: Credits,
        balance_after: Credits,
        achievement_id: String,
        reward: Credits,
    },
    EscrowCreated {
        account_id: AccountId,
        at: DateTime<Utc>,
        balance_before: Credits,
        balance_after: Credits,
        session_id: SessionId,
        amount: Credits,
        expires_at: DateTime<Utc>,
    },
    EscrowSettled {
        account_id: AccountId,
        at: DateTime<Utc>,
        balance_before: Credits,
        balance_after: Credits,
        session_id: SessionId,
        amount: Credits,
        outcome: EscrowOutcome,
    },
}

impl LedgerEvent {
    pub fn account_id(&self) -> &str {
        match self {
            Self::BalanceChanged { account_id, .. }
            | Self::TierChanged { account_id, .. }
            | Self::AchievementUnlocked { account_id, .. }
            | Self::EscrowCreated { account_id, .. }
            | Self::EscrowSettled { account_id, .. } => account_id,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::BalanceChanged { at, .. }
            | Self::TierChanged { at, .. }
            | Self::AchievementUnlocked { at, .. }
            | Self::EscrowCreated { at, .. }
            | Self::EscrowSettled { at, .. } => *at,
        }
    }
}

/// Stable string name for the event_type column of the event log.
pub fn event_type_name(event: &LedgerEvent) -> &'static str {
    match event {
        LedgerEvent::BalanceChanged { .. } => "balance_changed",
        LedgerEvent::TierChanged { .. } => "tier_changed",
        LedgerEvent::AchievementUnlocked { .. } => "achievement_unlocked",
        LedgerEvent::EscrowCreated { .. } => "escrow_created",
        LedgerEvent::EscrowSettled { .. } => "escrow_settled",
    }
}

/// The event log entry as persisted by the storage port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub account_id: AccountId,
    pub event_type: String,
    pub payload: String, // JSON-serialized LedgerEvent
    pub occurred_at: DateTime<Utc>,
}

/// Fan-out to subscriber channels. Dead receivers are pruned on publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<LedgerEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<LedgerEvent> {
        let (tx, rx) = channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: &LedgerEvent) {
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

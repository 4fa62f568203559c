//! Account record — the per-account view the ledger owns.

use crate::types::{AccountId, Credits};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Cumulative, monotonically increasing usage counters.
/// These feed achievement triggers; they never decrease.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub gb_shared: f64,
    pub communities_created: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub balance: Credits,
    pub earned_total: Credits,
    pub spent_total: Credits,
    pub pending_escrow: Credits,
    pub tier_level: u8,
    pub achievements: HashSet<String>,
    pub stats: UsageStats,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(account_id: AccountId, created_at: DateTime<Utc>) -> Self {
        Self {
            account_id,
            balance: 0.0,
            earned_total: 0.0,
            spent_total: 0.0,
            pending_escrow: 0.0,
            tier_level: 0,
            achievements: HashSet::new(),
            stats: UsageStats::default(),
            created_at,
        }
    }

    /// Balance not locked in escrow. Escrowed funds are already deducted
    /// from `balance` at hold time, so this is just `balance`.
    pub fn spendable(&self) -> Credits {
        self.balance
    }

    /// The accounting identity every ledger operation must preserve:
    /// `balance = earned_total - spent_total - pending_escrow`,
    /// with balance and pending escrow non-negative.
    pub fn invariant_holds(&self) -> bool {
        let derived = self.earned_total - self.spent_total - self.pending_escrow;
        (self.balance - derived).abs() < 1e-6 && self.balance >= 0.0 && self.pending_escrow >= 0.0
    }
}

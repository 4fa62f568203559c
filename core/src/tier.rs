//! Progression tiers — named balance brackets granting an earning
//! multiplier and community-creation limits.
//!
//! The table is validated once at engine build and immutable after.
//! Brackets are half-open: a tier holds `min_balance <= b < max_balance`,
//! and the last tier is unbounded above.

use crate::{
    error::{LedgerError, LedgerResult},
    types::Credits,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDefinition {
    pub level: u8,
    pub name: String,
    pub min_balance: Credits,
    /// `None` marks the unbounded top tier.
    pub max_balance: Option<Credits>,
    /// `None` = unlimited community creation.
    pub community_create_limit: Option<u32>,
    pub earning_multiplier: f64,
}

/// What it takes to reach the next tier from a given balance.
#[derive(Debug, Clone, PartialEq)]
pub struct NextTierRequirement {
    pub next_tier: TierDefinition,
    pub amount_needed: Credits,
}

/// The validated, ordered tier table. Partitions `[0, inf)` with no
/// gaps or overlaps.
#[derive(Debug, Clone)]
pub struct TierTable {
    tiers: Vec<TierDefinition>,
}

impl TierTable {
    /// Validate and freeze a tier table. Any violation is fatal:
    /// the engine refuses to start on a malformed table.
    pub fn new(tiers: Vec<TierDefinition>) -> LedgerResult<Self> {
        if tiers.is_empty() {
            return Err(malformed("table is empty"));
        }
        if tiers[0].min_balance != 0.0 {
            return Err(malformed(&format!(
                "lowest tier '{}' starts at {:.2}, must start at 0",
                tiers[0].name, tiers[0].min_balance
            )));
        }
        for pair in tiers.windows(2) {
            let (cur, next) = (&pair[0], &pair[1]);
            if next.level <= cur.level {
                return Err(malformed(&format!(
                    "tier levels not strictly increasing at '{}'",
                    next.name
                )));
            }
            match cur.max_balance {
                None => {
                    return Err(malformed(&format!(
                        "tier '{}' is unbounded but not last",
                        cur.name
                    )));
                }
                Some(max) if max != next.min_balance => {
                    return Err(malformed(&format!(
                        "gap or overlap between '{}' (ends {:.2}) and '{}' (starts {:.2})",
                        cur.name, max, next.name, next.min_balance
                    )));
                }
                Some(max) if max <= cur.min_balance => {
                    return Err(malformed(&format!("tier '{}' has an empty bracket", cur.name)));
                }
                Some(_) => {}
            }
        }
        let top = tiers.last().expect("non-empty checked above");
        if top.max_balance.is_some() {
            return Err(malformed(&format!("top tier '{}' must be unbounded", top.name)));
        }
        for tier in &tiers {
            if tier.earning_multiplier <= 0.0 {
                return Err(malformed(&format!(
                    "tier '{}' has non-positive earning multiplier {}",
                    tier.name, tier.earning_multiplier
                )));
            }
        }
        Ok(Self { tiers })
    }

    /// The tier whose bracket contains `balance`.
    /// Negative balances clamp to the lowest tier.
    pub fn tier_for_balance(&self, balance: Credits) -> &TierDefinition {
        if balance < 0.0 {
            return &self.tiers[0];
        }
        self.tiers
            .iter()
            .find(|t| match t.max_balance {
                Some(max) => balance >= t.min_balance && balance < max,
                None => balance >= t.min_balance,
            })
            .expect("validated table partitions [0, inf)")
    }

    pub fn by_level(&self, level: u8) -> Option<&TierDefinition> {
        self.tiers.iter().find(|t| t.level == level)
    }

    pub fn top(&self) -> &TierDefinition {
        self.tiers.last().expect("table is never empty")
    }

    pub fn all(&self) -> &[TierDefinition] {
        &self.tiers
    }

    /// The next tier above `balance` and the credits still needed to reach
    /// it. `None` when the balance already sits in the top tier.
    pub fn next_tier_requirement(&self, balance: Credits) -> Option<NextTierRequirement> {
        let current = self.tier_for_balance(balance);
        let idx = self
            .tiers
            .iter()
            .position(|t| t.level == current.level)
            .expect("current tier came from this table");
        let next = self.tiers.get(idx + 1)?;
        Some(NextTierRequirement {
            next_tier: next.clone(),
            amount_needed: next.min_balance - balance,
        })
    }
}

fn malformed(reason: &str) -> LedgerError {
    LedgerError::MalformedTierTable {
        reason: reason.to_string(),
    }
}

//! Achievement registry — one-time bonus awards.
//!
//! Triggers are pure predicates over the account snapshot, so they can
//! be re-evaluated after any mutation; `unlock` is idempotent, which
//! makes repeated evaluation harmless.

use crate::{
    account::Account,
    error::{LedgerError, LedgerResult},
    ledger::Ledger,
    tier::TierTable,
    types::Credits,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub label: String,
    pub reward: Credits,
    pub trigger: AchievementTrigger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AchievementTrigger {
    /// Any earn credit has landed.
    FirstEarn,
    /// Balance reached the threshold.
    BalanceReached { amount: Credits },
    /// Cumulative shared bandwidth reached the threshold.
    BandwidthShared { gigabytes: f64 },
    /// The account created its first community.
    CommunityCreated,
    /// The account reached the top tier.
    TopTierReached,
}

impl AchievementTrigger {
    pub fn satisfied(&self, account: &Account, tiers: &TierTable) -> bool {
        match self {
            Self::FirstEarn => account.earned_total > 0.0,
            Self::BalanceReached { amount } => account.balance >= *amount,
            Self::BandwidthShared { gigabytes } => account.stats.gb_shared >= *gigabytes,
            Self::CommunityCreated => account.stats.communities_created >= 1,
            Self::TopTierReached => {
                tiers.tier_for_balance(account.balance).level == tiers.top().level
            }
        }
    }
}

/// Outcome of an unlock attempt. `AlreadyUnlocked` is a normal result,
/// not an error: retries and duplicate triggers land here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnlockOutcome {
    Unlocked { reward: Credits },
    AlreadyUnlocked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnlockedAward {
    pub achievement_id: String,
    pub reward: Credits,
}

pub struct AchievementRegistry {
    ledger: Arc<Ledger>,
    catalog: Vec<Achievement>,
}

impl AchievementRegistry {
    pub fn new(ledger: Arc<Ledger>, catalog: Vec<Achievement>) -> Self {
        Self { ledger, catalog }
    }

    pub fn catalog(&self) -> &[Achievement] {
        &self.catalog
    }

    /// Unlock by id. The membership check and the bonus credit happen
    /// as one atomic step under the account's serialization.
    pub fn unlock(&self, account_id: &str, achievement_id: &str) -> LedgerResult<UnlockOutcome> {
        let achievement = self
            .catalog
            .iter()
            .find(|a| a.id == achievement_id)
            .ok_or_else(|| LedgerError::UnknownAchievement(achievement_id.to_string()))?;
        self.ledger
            .unlock_achievement(account_id, &achievement.id, achievement.reward)
    }

    /// Evaluate every catalog trigger against the account's current
    /// state and unlock any newly satisfied achievement.
    pub fn evaluate_triggers(&self, account_id: &str) -> LedgerResult<Vec<UnlockedAward>> {
        let account = self.ledger.get_account(account_id)?;
        let mut awarded = Vec::new();
        for achievement in &self.catalog {
            if account.achievements.contains(&achievement.id) {
                continue;
            }
            if !achievement.trigger.satisfied(&account, self.ledger.tiers()) {
                continue;
            }
            // The atomic unlock re-checks membership; a concurrent
            // evaluation of the same trigger credits at most once.
            if let UnlockOutcome::Unlocked { reward } =
                self.ledger
                    .unlock_achievement(account_id, &achievement.id, achievement.reward)?
            {
                awarded.push(UnlockedAward {
                    achievement_id: achievement.id.clone(),
                    reward,
                });
            }
        }
        Ok(awarded)
    }
}

//! The market engine — wires store, clock, and config into the ledger,
//! escrow sessions, achievement registry, and marketplace gate.
//!
//! Call `build()` instead of assembling the components by hand; it
//! validates the tier table once and refuses to start on a malformed
//! one.

use crate::{
    achievement::{AchievementRegistry, UnlockedAward},
    clock::Clock,
    config::EngineConfig,
    earnings::{apply_tier_multiplier, compute_earnings, EarningsBreakdown},
    error::{LedgerError, LedgerResult},
    escrow::{EscrowSession, EscrowSessions, SweeperHandle},
    event::LedgerEvent,
    ledger::{CreditReason, Ledger},
    marketplace::{Community, CommunitySpec, GateOutcome, Marketplace, PerkReceipt},
    store::LedgerStore,
    tier::TierTable,
    types::Credits,
};
use chrono::Duration;
use std::sync::{mpsc::Receiver, Arc};

/// What a metered contribution produced: the raw breakdown, the amount
/// actually credited after the tier multiplier, and any achievements
/// the contribution unlocked.
#[derive(Debug, Clone)]
pub struct ContributionOutcome {
    pub breakdown: EarningsBreakdown,
    pub credited: Credits,
    pub unlocked: Vec<UnlockedAward>,
}

pub struct MarketEngine {
    ledger: Arc<Ledger>,
    escrow: Arc<EscrowSessions>,
    achievements: Arc<AchievementRegistry>,
    marketplace: Arc<Marketplace>,
    default_ttl: Duration,
    sweep_interval: std::time::Duration,
}

impl MarketEngine {
    /// Build a fully wired engine. Fatal if the tier table does not
    /// partition `[0, inf)`.
    pub fn build(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> LedgerResult<Self> {
        let tiers = Arc::new(TierTable::new(config.tiers)?);
        let ledger = Arc::new(Ledger::new(store, clock, tiers));
        let escrow = Arc::new(EscrowSessions::new(Arc::clone(&ledger)));
        let achievements = Arc::new(AchievementRegistry::new(
            Arc::clone(&ledger),
            config.achievements,
        ));
        let marketplace = Arc::new(Marketplace::new(Arc::clone(&ledger)));
        for perk in config.perks {
            marketplace.insert_perk(perk);
        }
        for opportunity in config.opportunities {
            marketplace.insert_opportunity(opportunity);
        }
        log::info!(
            "engine: built with {} tiers, {} achievements",
            ledger.tiers().all().len(),
            achievements.catalog().len()
        );
        Ok(Self {
            ledger,
            escrow,
            achievements,
            marketplace,
            default_ttl: Duration::seconds(config.escrow_ttl_secs),
            sweep_interval: std::time::Duration::from_secs(config.sweep_interval_secs),
        })
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn escrow(&self) -> &Arc<EscrowSessions> {
        &self.escrow
    }

    pub fn achievements(&self) -> &Arc<AchievementRegistry> {
        &self.achievements
    }

    pub fn marketplace(&self) -> &Arc<Marketplace> {
        &self.marketplace
    }

    pub fn subscribe(&self) -> Receiver<LedgerEvent> {
        self.ledger.subscribe()
    }

    // ── High-level operations ──────────────────────────────────────

    /// The full earn pipeline for a metered transfer: earnings math,
    /// tier multiplier, ledger credit, bandwidth stat, achievement
    /// trigger evaluation.
    pub fn record_contribution(
        &self,
        account_id: &str,
        gigabytes: f64,
        unit_price: Credits,
        quality_bonus_ratio: f64,
    ) -> LedgerResult<ContributionOutcome> {
        let breakdown = compute_earnings(gigabytes, unit_price, quality_bonus_ratio);
        let tier = match self.ledger.get_account(account_id) {
            Ok(account) => self
                .ledger
                .tiers()
                .tier_for_balance(account.balance)
                .clone(),
            // First interaction: the account starts at the lowest tier.
            Err(LedgerError::UnknownAccount(_)) => {
                self.ledger.tiers().tier_for_balance(0.0).clone()
            }
            Err(e) => return Err(e),
        };
        let credited = apply_tier_multiplier(breakdown.net, &tier);
        self.ledger
            .credit(account_id, credited, CreditReason::Earn)?;
        self.ledger
            .record_contribution_stats(account_id, gigabytes)?;
        let unlocked = self.achievements.evaluate_triggers(account_id)?;
        Ok(ContributionOutcome {
            breakdown,
            credited,
            unlocked,
        })
    }

    /// Open a purchase escrow with the configured default TTL.
    pub fn begin_purchase(&self, account_id: &str, amount: Credits) -> LedgerResult<EscrowSession> {
        self.escrow.create(account_id, amount, self.default_ttl)
    }

    pub fn confirm_purchase(&self, session_id: &str) -> LedgerResult<EscrowSession> {
        self.escrow.confirm(session_id)
    }

    pub fn cancel_purchase(&self, session_id: &str) -> LedgerResult<EscrowSession> {
        self.escrow.cancel(session_id)
    }

    pub fn purchase_perk(&self, account_id: &str, perk_id: &str) -> LedgerResult<PerkReceipt> {
        self.marketplace.purchase_perk(account_id, perk_id)
    }

    /// Create a community and evaluate the triggers it may satisfy.
    pub fn create_community(
        &self,
        account_id: &str,
        spec: CommunitySpec,
    ) -> LedgerResult<GateOutcome<Community>> {
        let outcome = self.marketplace.create_community(account_id, spec)?;
        if matches!(outcome, GateOutcome::Granted(_)) {
            self.achievements.evaluate_triggers(account_id)?;
        }
        Ok(outcome)
    }

    /// Start the background escrow sweeper at the configured cadence.
    pub fn start_sweeper(&self) -> SweeperHandle {
        self.escrow.spawn_sweeper(self.sweep_interval)
    }
}

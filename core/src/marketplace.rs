//! Marketplace gate — eligibility predicates for opportunities, perks,
//! and communities, plus the perk purchase flow.
//!
//! RULES:
//!   - Eligibility checks are pure predicates over snapshots and may be
//!     stale; failing one is an expected outcome, reported as
//!     boolean + reason, never as an error.
//!   - Every write re-validates its gate at execution time against a
//!     fresh account read before mutating anything.
//!   - The gate mutates account state only through ledger calls.

use crate::{
    account::Account,
    error::{LedgerError, LedgerResult},
    ledger::{DebitReason, Ledger},
    types::{AccountId, Credits},
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub label: String,
    pub min_tier: u8,
    pub min_balance: Credits,
    pub reward: Credits,
    pub capacity: u32,
    #[serde(default)]
    pub participants: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Perk {
    pub id: String,
    pub label: String,
    pub cost: Credits,
    pub min_tier: u8,
    pub available: bool,
    pub inventory: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub label: String,
    pub creator_id: AccountId,
    pub min_tier: u8,
    pub min_balance: Credits,
    pub members: u32,
}

/// Everything a new community needs before the gate fills in the
/// creator and membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunitySpec {
    pub id: String,
    pub label: String,
    pub min_tier: u8,
    pub min_balance: Credits,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IneligibleReason {
    TierTooLow { required: u8, actual: u8 },
    BalanceTooLow { required: Credits, actual: Credits },
    AtCapacity,
    Unavailable,
    OutOfStock,
    CommunityLimitReached { limit: u32 },
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TierTooLow { required, actual } => {
                write!(f, "tier {actual} below required {required}")
            }
            Self::BalanceTooLow { required, actual } => {
                write!(f, "balance {actual:.2} below required {required:.2}")
            }
            Self::AtCapacity => f.write_str("at capacity"),
            Self::Unavailable => f.write_str("not available"),
            Self::OutOfStock => f.write_str("out of stock"),
            Self::CommunityLimitReached { limit } => {
                write!(f, "community creation limit {limit} reached")
            }
        }
    }
}

/// Boolean + reason. Ineligibility is normal traffic, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Eligibility {
    pub eligible: bool,
    pub reason: Option<IneligibleReason>,
}

impl Eligibility {
    pub fn ok() -> Self {
        Self {
            eligible: true,
            reason: None,
        }
    }

    pub fn blocked(reason: IneligibleReason) -> Self {
        Self {
            eligible: false,
            reason: Some(reason),
        }
    }
}

/// Outcome of a gated write: the updated record, or the reason the
/// execution-time re-check refused it.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome<T> {
    Granted(T),
    Denied(IneligibleReason),
}

impl<T> GateOutcome<T> {
    pub fn granted(self) -> Option<T> {
        match self {
            Self::Granted(value) => Some(value),
            Self::Denied(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerkReceipt {
    pub perk_id: String,
    pub cost: Credits,
    pub remaining_inventory: u32,
}

// ── Pure predicates ────────────────────────────────────────────────

pub fn opportunity_eligible(opportunity: &Opportunity, account: &Account) -> Eligibility {
    if account.tier_level < opportunity.min_tier {
        return Eligibility::blocked(IneligibleReason::TierTooLow {
            required: opportunity.min_tier,
            actual: account.tier_level,
        });
    }
    if account.balance < opportunity.min_balance {
        return Eligibility::blocked(IneligibleReason::BalanceTooLow {
            required: opportunity.min_balance,
            actual: account.balance,
        });
    }
    if opportunity.participants >= opportunity.capacity {
        return Eligibility::blocked(IneligibleReason::AtCapacity);
    }
    Eligibility::ok()
}

pub fn perk_affordable(perk: &Perk, account: &Account) -> Eligibility {
    if !perk.available {
        return Eligibility::blocked(IneligibleReason::Unavailable);
    }
    if perk.inventory == 0 {
        return Eligibility::blocked(IneligibleReason::OutOfStock);
    }
    if account.tier_level < perk.min_tier {
        return Eligibility::blocked(IneligibleReason::TierTooLow {
            required: perk.min_tier,
            actual: account.tier_level,
        });
    }
    if perk.cost > account.balance {
        return Eligibility::blocked(IneligibleReason::BalanceTooLow {
            required: perk.cost,
            actual: account.balance,
        });
    }
    Eligibility::ok()
}

/// `limit = None` (top tier) means unbounded creation.
pub fn community_limit_allows(limit: Option<u32>, existing_count: u32) -> Eligibility {
    match limit {
        Some(limit) if existing_count >= limit => {
            Eligibility::blocked(IneligibleReason::CommunityLimitReached { limit })
        }
        _ => Eligibility::ok(),
    }
}

pub fn can_join_community(community: &Community, account: &Account) -> Eligibility {
    if account.tier_level < community.min_tier {
        return Eligibility::blocked(IneligibleReason::TierTooLow {
            required: community.min_tier,
            actual: account.tier_level,
        });
    }
    if account.balance < community.min_balance {
        return Eligibility::blocked(IneligibleReason::BalanceTooLow {
            required: community.min_balance,
            actual: account.balance,
        });
    }
    Eligibility::ok()
}

// ── The gate ───────────────────────────────────────────────────────

pub struct Marketplace {
    ledger: Arc<Ledger>,
    /// Per-perk mutex: a purchase holds it across debit + decrement so
    /// inventory moves atomically with the payment.
    perks: RwLock<HashMap<String, Arc<Mutex<Perk>>>>,
    opportunities: RwLock<HashMap<String, Opportunity>>,
    communities: RwLock<HashMap<String, Community>>,
}

impl Marketplace {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            perks: RwLock::new(HashMap::new()),
            opportunities: RwLock::new(HashMap::new()),
            communities: RwLock::new(HashMap::new()),
        }
    }

    // ── Catalog management ─────────────────────────────────────────

    pub fn insert_perk(&self, perk: Perk) {
        self.perks
            .write()
            .insert(perk.id.clone(), Arc::new(Mutex::new(perk)));
    }

    pub fn insert_opportunity(&self, opportunity: Opportunity) {
        self.opportunities
            .write()
            .insert(opportunity.id.clone(), opportunity);
    }

    pub fn perk(&self, perk_id: &str) -> Option<Perk> {
        self.perks.read().get(perk_id).map(|p| p.lock().clone())
    }

    pub fn opportunity(&self, opportunity_id: &str) -> Option<Opportunity> {
        self.opportunities.read().get(opportunity_id).cloned()
    }

    pub fn community(&self, community_id: &str) -> Option<Community> {
        self.communities.read().get(community_id).cloned()
    }

    pub fn communities_created_by(&self, account_id: &str) -> u32 {
        self.communities
            .read()
            .values()
            .filter(|c| c.creator_id == account_id)
            .count() as u32
    }

    // ── Eligibility checks (snapshot reads) ────────────────────────

    pub fn check_opportunity(
        &self,
        opportunity_id: &str,
        account_id: &str,
    ) -> LedgerResult<Eligibility> {
        let opportunity = self
            .opportunity(opportunity_id)
            .ok_or_else(|| LedgerError::UnknownOpportunity(opportunity_id.to_string()))?;
        let account = self.ledger.get_account(account_id)?;
        Ok(opportunity_eligible(&opportunity, &account))
    }

    pub fn check_perk(&self, perk_id: &str, account_id: &str) -> LedgerResult<Eligibility> {
        let perk = self
            .perk(perk_id)
            .ok_or_else(|| LedgerError::UnknownPerk(perk_id.to_string()))?;
        let account = self.ledger.get_account(account_id)?;
        Ok(perk_affordable(&perk, &account))
    }

    pub fn check_create_community(&self, account_id: &str) -> LedgerResult<Eligibility> {
        let account = self.ledger.get_account(account_id)?;
        let tier = self.ledger.tiers().tier_for_balance(account.balance);
        let existing = self.communities_created_by(account_id);
        Ok(community_limit_allows(tier.community_create_limit, existing))
    }

    pub fn check_join_community(
        &self,
        community_id: &str,
        account_id: &str,
    ) -> LedgerResult<Eligibility> {
        let community = self
            .community(community_id)
            .ok_or_else(|| LedgerError::UnknownCommunity(community_id.to_string()))?;
        let account = self.ledger.get_account(account_id)?;
        Ok(can_join_community(&community, &account))
    }

    // ── Gated writes (re-validated at execution time) ──────────────

    /// Buy a perk: re-check affordability against a fresh account read
    /// under the perk's lock, debit the cost, decrement inventory.
    pub fn purchase_perk(&self, account_id: &str, perk_id: &str) -> LedgerResult<PerkReceipt> {
        let cell = self
            .perks
            .read()
            .get(perk_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownPerk(perk_id.to_string()))?;
        let mut perk = cell.lock();

        if !perk.available {
            return Err(LedgerError::Unaffordable {
                perk_id: perk_id.to_string(),
                reason: IneligibleReason::Unavailable.to_string(),
            });
        }
        if perk.inventory == 0 {
            return Err(LedgerError::OutOfStock {
                perk_id: perk_id.to_string(),
            });
        }
        let account = self.ledger.get_account(account_id)?;
        if account.tier_level < perk.min_tier {
            return Err(LedgerError::Unaffordable {
                perk_id: perk_id.to_string(),
                reason: IneligibleReason::TierTooLow {
                    required: perk.min_tier,
                    actual: account.tier_level,
                }
                .to_string(),
            });
        }
        match self.ledger.debit(account_id, perk.cost, DebitReason::Purchase) {
            Ok(_) => {}
            Err(LedgerError::InsufficientBalance { requested, available }) => {
                return Err(LedgerError::Unaffordable {
                    perk_id: perk_id.to_string(),
                    reason: IneligibleReason::BalanceTooLow {
                        required: requested,
                        actual: available,
                    }
                    .to_string(),
                });
            }
            Err(e) => return Err(e),
        }
        perk.inventory -= 1;
        log::info!(
            "account={account_id} marketplace: purchased perk '{perk_id}' for {:.2} ({} left)",
            perk.cost,
            perk.inventory
        );
        Ok(PerkReceipt {
            perk_id: perk_id.to_string(),
            cost: perk.cost,
            remaining_inventory: perk.inventory,
        })
    }

    /// Join an opportunity; the participant count moves only if the
    /// gate still passes at execution time.
    pub fn join_opportunity(
        &self,
        account_id: &str,
        opportunity_id: &str,
    ) -> LedgerResult<GateOutcome<Opportunity>> {
        let mut opportunities = self.opportunities.write();
        let opportunity = opportunities
            .get_mut(opportunity_id)
            .ok_or_else(|| LedgerError::UnknownOpportunity(opportunity_id.to_string()))?;
        let account = self.ledger.get_account(account_id)?;
        let eligibility = opportunity_eligible(opportunity, &account);
        match eligibility.reason {
            Some(reason) => Ok(GateOutcome::Denied(reason)),
            None => {
                opportunity.participants += 1;
                log::debug!(
                    "account={account_id} marketplace: joined opportunity '{opportunity_id}' ({}/{})",
                    opportunity.participants,
                    opportunity.capacity
                );
                Ok(GateOutcome::Granted(opportunity.clone()))
            }
        }
    }

    /// Create a community; the creator joins as the first member and
    /// the creation is recorded against the account's stats.
    pub fn create_community(
        &self,
        account_id: &str,
        spec: CommunitySpec,
    ) -> LedgerResult<GateOutcome<Community>> {
        let mut communities = self.communities.write();
        let account = self.ledger.get_account(account_id)?;
        let tier = self.ledger.tiers().tier_for_balance(account.balance);
        let existing = communities
            .values()
            .filter(|c| c.creator_id == account_id)
            .count() as u32;
        let eligibility = community_limit_allows(tier.community_create_limit, existing);
        if let Some(reason) = eligibility.reason {
            return Ok(GateOutcome::Denied(reason));
        }
        let community = Community {
            id: spec.id.clone(),
            label: spec.label,
            creator_id: account_id.to_string(),
            min_tier: spec.min_tier,
            min_balance: spec.min_balance,
            members: 1,
        };
        communities.insert(spec.id, community.clone());
        drop(communities);
        self.ledger.record_community_created(account_id)?;
        log::info!(
            "account={account_id} marketplace: created community '{}'",
            community.id
        );
        Ok(GateOutcome::Granted(community))
    }

    pub fn join_community(
        &self,
        account_id: &str,
        community_id: &str,
    ) -> LedgerResult<GateOutcome<Community>> {
        let mut communities = self.communities.write();
        let community = communities
            .get_mut(community_id)
            .ok_or_else(|| LedgerError::UnknownCommunity(community_id.to_string()))?;
        let account = self.ledger.get_account(account_id)?;
        let eligibility = can_join_community(community, &account);
        match eligibility.reason {
            Some(reason) => Ok(GateOutcome::Denied(reason)),
            None => {
                community.members += 1;
                Ok(GateOutcome::Granted(community.clone()))
            }
        }
    }
}

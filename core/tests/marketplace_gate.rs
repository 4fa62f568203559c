//! Marketplace gate: eligibility predicates and gated writes.

use chrono::{TimeZone, Utc};
use gridshare_core::{
    achievement::{Achievement, AchievementTrigger},
    clock::{Clock, ManualClock},
    config::EngineConfig,
    engine::MarketEngine,
    error::LedgerError,
    ledger::CreditReason,
    marketplace::{CommunitySpec, GateOutcome, IneligibleReason, Opportunity, Perk},
    store::MemoryStore,
};
use std::sync::Arc;

fn start() -> MarketEngine {
    start_with_achievements(vec![])
}

fn start_with_achievements(achievements: Vec<Achievement>) -> MarketEngine {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    ));
    let mut config = EngineConfig::default_config();
    config.achievements = achievements;
    MarketEngine::build(
        Arc::new(MemoryStore::new()),
        clock as Arc<dyn Clock>,
        config,
    )
    .unwrap()
}

fn perk(id: &str, cost: f64, min_tier: u8, inventory: u32) -> Perk {
    Perk {
        id: id.to_string(),
        label: id.to_string(),
        cost,
        min_tier,
        available: true,
        inventory,
    }
}

/// The full perk scenario: unaffordable at 100, affordable at 160,
/// purchase leaves 10 and decrements inventory.
#[test]
fn perk_purchase_scenario() {
    let engine = start();
    engine.marketplace().insert_perk(perk("booster", 150.0, 1, 3));
    engine
        .ledger()
        .credit("alice", 100.0, CreditReason::Earn)
        .unwrap();

    let check = engine.marketplace().check_perk("booster", "alice").unwrap();
    assert!(!check.eligible);
    assert!(matches!(
        check.reason,
        Some(IneligibleReason::BalanceTooLow { .. })
    ));

    engine
        .ledger()
        .credit("alice", 60.0, CreditReason::Earn)
        .unwrap();
    let check = engine.marketplace().check_perk("booster", "alice").unwrap();
    assert!(check.eligible, "160 covers a 150 perk: {:?}", check.reason);

    let receipt = engine.purchase_perk("alice", "booster").unwrap();

    assert_eq!(receipt.cost, 150.0);
    assert_eq!(receipt.remaining_inventory, 2);
    let account = engine.ledger().get_account("alice").unwrap();
    assert_eq!(account.balance, 10.0);
    assert!(account.invariant_holds());
}

/// Purchase re-checks at execution time: a stale eligible read does not
/// authorize an overdraft.
#[test]
fn purchase_revalidates_at_execution() {
    let engine = start();
    engine.marketplace().insert_perk(perk("booster", 150.0, 1, 3));
    engine
        .ledger()
        .credit("alice", 160.0, CreditReason::Earn)
        .unwrap();
    let stale = engine.marketplace().check_perk("booster", "alice").unwrap();
    assert!(stale.eligible);

    // Balance drains after the check.
    engine
        .ledger()
        .debit("alice", 100.0, gridshare_core::ledger::DebitReason::Purchase)
        .unwrap();

    assert!(matches!(
        engine.purchase_perk("alice", "booster"),
        Err(LedgerError::Unaffordable { .. })
    ));
}

/// Inventory runs out: the purchase fails OutOfStock and charges nothing.
#[test]
fn purchase_fails_when_out_of_stock() {
    let engine = start();
    engine.marketplace().insert_perk(perk("banner", 10.0, 0, 1));
    engine
        .ledger()
        .credit("alice", 100.0, CreditReason::Earn)
        .unwrap();

    engine.purchase_perk("alice", "banner").unwrap();
    let err = engine.purchase_perk("alice", "banner");

    assert!(matches!(err, Err(LedgerError::OutOfStock { .. })));
    assert_eq!(engine.ledger().get_account("alice").unwrap().balance, 90.0);
}

/// An unavailable perk is unaffordable regardless of balance.
#[test]
fn unavailable_perk_is_unaffordable() {
    let engine = start();
    let mut p = perk("retired", 10.0, 0, 5);
    p.available = false;
    engine.marketplace().insert_perk(p);
    engine
        .ledger()
        .credit("alice", 100.0, CreditReason::Earn)
        .unwrap();

    let check = engine.marketplace().check_perk("retired", "alice").unwrap();
    assert_eq!(check.reason, Some(IneligibleReason::Unavailable));
    assert!(matches!(
        engine.purchase_perk("alice", "retired"),
        Err(LedgerError::Unaffordable { .. })
    ));
}

/// Tier gating blocks a purchase even when the balance covers the cost.
#[test]
fn low_tier_blocks_purchase() {
    let engine = start();
    engine.marketplace().insert_perk(perk("elite", 10.0, 2, 5));
    engine
        .ledger()
        .credit("alice", 99.0, CreditReason::Earn)
        .unwrap();

    let check = engine.marketplace().check_perk("elite", "alice").unwrap();
    assert!(matches!(
        check.reason,
        Some(IneligibleReason::TierTooLow { required: 2, actual: 0 })
    ));
    assert!(matches!(
        engine.purchase_perk("alice", "elite"),
        Err(LedgerError::Unaffordable { .. })
    ));
}

/// Opportunity eligibility: tier, balance, and capacity all gate entry.
#[test]
fn opportunity_eligibility_and_capacity() {
    let engine = start();
    engine.marketplace().insert_opportunity(Opportunity {
        id: "relay".to_string(),
        label: "Relay trial".to_string(),
        min_tier: 1,
        min_balance: 100.0,
        reward: 50.0,
        capacity: 1,
        participants: 0,
    });

    engine
        .ledger()
        .credit("alice", 99.0, CreditReason::Earn)
        .unwrap();
    let check = engine.marketplace().check_opportunity("relay", "alice").unwrap();
    assert!(matches!(
        check.reason,
        Some(IneligibleReason::TierTooLow { .. })
    ));

    engine
        .ledger()
        .credit("alice", 1.0, CreditReason::Earn)
        .unwrap();
    assert!(engine
        .marketplace()
        .check_opportunity("relay", "alice")
        .unwrap()
        .eligible);

    let joined = engine.marketplace().join_opportunity("alice", "relay").unwrap();
    assert!(matches!(joined, GateOutcome::Granted(ref o) if o.participants == 1));

    // Capacity 1 is now full for everyone else.
    engine
        .ledger()
        .credit("bob", 200.0, CreditReason::Earn)
        .unwrap();
    let denied = engine.marketplace().join_opportunity("bob", "relay").unwrap();
    assert_eq!(denied, GateOutcome::Denied(IneligibleReason::AtCapacity));
}

/// Community creation is limited by tier; Newbies get none.
#[test]
fn community_creation_respects_tier_limit() {
    let engine = start();
    engine
        .ledger()
        .credit("alice", 50.0, CreditReason::Earn)
        .unwrap();

    let check = engine.marketplace().check_create_community("alice").unwrap();
    assert_eq!(
        check.reason,
        Some(IneligibleReason::CommunityLimitReached { limit: 0 })
    );

    // Friend tier allows one.
    engine
        .ledger()
        .credit("alice", 100.0, CreditReason::Earn)
        .unwrap();
    let created = engine
        .create_community(
            "alice",
            CommunitySpec {
                id: "relay-ops".to_string(),
                label: "Relay operators".to_string(),
                min_tier: 0,
                min_balance: 0.0,
            },
        )
        .unwrap();
    let community = match created {
        GateOutcome::Granted(c) => c,
        GateOutcome::Denied(reason) => panic!("creation denied: {reason}"),
    };
    assert_eq!(community.members, 1);
    assert_eq!(community.creator_id, "alice");

    // The Friend limit of one is now exhausted.
    let denied = engine
        .create_community(
            "alice",
            CommunitySpec {
                id: "second".to_string(),
                label: "Second".to_string(),
                min_tier: 0,
                min_balance: 0.0,
            },
        )
        .unwrap();
    assert!(matches!(
        denied,
        GateOutcome::Denied(IneligibleReason::CommunityLimitReached { limit: 1 })
    ));
}

/// Creating a community feeds the founder trigger.
#[test]
fn community_creation_unlocks_founder() {
    let engine = start_with_achievements(vec![Achievement {
        id: "founder".to_string(),
        label: "Founded a community".to_string(),
        reward: 25.0,
        trigger: AchievementTrigger::CommunityCreated,
    }]);
    engine
        .ledger()
        .credit("alice", 150.0, CreditReason::Earn)
        .unwrap();

    engine
        .create_community(
            "alice",
            CommunitySpec {
                id: "relay-ops".to_string(),
                label: "Relay operators".to_string(),
                min_tier: 0,
                min_balance: 0.0,
            },
        )
        .unwrap();

    let account = engine.ledger().get_account("alice").unwrap();
    assert!(account.achievements.contains("founder"));
    assert_eq!(account.balance, 175.0);
}

/// Joining a community gates on its tier and balance minimums.
#[test]
fn join_community_gates_and_counts() {
    let engine = start();
    engine
        .ledger()
        .credit("alice", 600.0, CreditReason::Earn)
        .unwrap();
    engine
        .create_community(
            "alice",
            CommunitySpec {
                id: "relay-ops".to_string(),
                label: "Relay operators".to_string(),
                min_tier: 1,
                min_balance: 100.0,
            },
        )
        .unwrap();

    engine
        .ledger()
        .credit("bob", 50.0, CreditReason::Earn)
        .unwrap();
    let denied = engine.marketplace().join_community("bob", "relay-ops").unwrap();
    assert!(matches!(
        denied,
        GateOutcome::Denied(IneligibleReason::TierTooLow { .. })
    ));

    engine
        .ledger()
        .credit("bob", 100.0, CreditReason::Earn)
        .unwrap();
    let joined = engine.marketplace().join_community("bob", "relay-ops").unwrap();
    assert!(matches!(joined, GateOutcome::Granted(ref c) if c.members == 2));
}

/// Unknown catalog ids are errors, not eligibility failures.
#[test]
fn unknown_catalog_ids_error() {
    let engine = start();
    engine
        .ledger()
        .credit("alice", 10.0, CreditReason::Earn)
        .unwrap();

    assert!(matches!(
        engine.marketplace().check_perk("nope", "alice"),
        Err(LedgerError::UnknownPerk(_))
    ));
    assert!(matches!(
        engine.marketplace().check_opportunity("nope", "alice"),
        Err(LedgerError::UnknownOpportunity(_))
    ));
    assert!(matches!(
        engine.marketplace().join_community("alice", "nope"),
        Err(LedgerError::UnknownCommunity(_))
    ));
}

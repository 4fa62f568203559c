//! Escrow session lifecycle: hold, confirm, cancel, TTL expiry.

use chrono::{Duration, TimeZone, Utc};
use gridshare_core::{
    clock::{Clock, ManualClock},
    config::EngineConfig,
    engine::MarketEngine,
    error::LedgerError,
    escrow::{EscrowOutcome, EscrowStatus},
    ledger::CreditReason,
    store::MemoryStore,
};
use std::sync::Arc;

fn start() -> (MarketEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    ));
    let mut config = EngineConfig::default_config();
    config.achievements.clear();
    let engine = MarketEngine::build(
        Arc::new(MemoryStore::new()),
        Arc::clone(&clock) as Arc<dyn Clock>,
        config,
    )
    .unwrap();
    (engine, clock)
}

/// Holding moves funds out of the spendable balance into escrow.
#[test]
fn hold_moves_balance_into_escrow() {
    let (engine, _clock) = start();
    engine
        .ledger()
        .credit("alice", 100.0, CreditReason::Earn)
        .unwrap();

    let session = engine
        .escrow()
        .create("alice", 50.0, Duration::minutes(15))
        .unwrap();

    assert_eq!(session.status, EscrowStatus::Pending);
    let account = engine.ledger().get_account("alice").unwrap();
    assert_eq!(account.balance, 50.0);
    assert_eq!(account.pending_escrow, 50.0);
    assert!(account.invariant_holds());
}

/// Holding more than the spendable balance fails.
#[test]
fn hold_cannot_exceed_balance() {
    let (engine, _clock) = start();
    engine
        .ledger()
        .credit("alice", 30.0, CreditReason::Earn)
        .unwrap();

    assert!(matches!(
        engine.escrow().create("alice", 31.0, Duration::minutes(15)),
        Err(LedgerError::InsufficientBalance { .. })
    ));
}

/// Confirm settles held funds as spent; the balance does not move again.
#[test]
fn confirm_settles_as_spent() {
    let (engine, _clock) = start();
    engine
        .ledger()
        .credit("alice", 100.0, CreditReason::Earn)
        .unwrap();
    let session = engine
        .escrow()
        .create("alice", 50.0, Duration::minutes(15))
        .unwrap();

    let settled = engine.escrow().confirm(&session.session_id).unwrap();

    assert_eq!(settled.status, EscrowStatus::Completed);
    assert!(settled.settled_at.is_some());
    let account = engine.ledger().get_account("alice").unwrap();
    assert_eq!(account.balance, 50.0);
    assert_eq!(account.pending_escrow, 0.0);
    assert_eq!(account.spent_total, 50.0);
    assert!(account.invariant_holds());
}

/// Cancel restores the balance to exactly its pre-hold value.
#[test]
fn cancel_refunds_exactly() {
    let (engine, _clock) = start();
    engine
        .ledger()
        .credit("alice", 100.0, CreditReason::Earn)
        .unwrap();
    let session = engine
        .escrow()
        .create("alice", 50.0, Duration::minutes(15))
        .unwrap();

    let settled = engine.escrow().cancel(&session.session_id).unwrap();

    assert_eq!(settled.status, EscrowStatus::Cancelled);
    let account = engine.ledger().get_account("alice").unwrap();
    assert_eq!(account.balance, 100.0);
    assert_eq!(account.pending_escrow, 0.0);
    assert_eq!(account.spent_total, 0.0);
}

/// Releasing an already-terminal session is an idempotent no-op that
/// returns the existing terminal state and moves no funds.
#[test]
fn release_is_idempotent_on_terminal_sessions() {
    let (engine, _clock) = start();
    let ledger = engine.ledger();
    ledger.credit("alice", 100.0, CreditReason::Earn).unwrap();
    let session = engine
        .escrow()
        .create("alice", 50.0, Duration::minutes(15))
        .unwrap();
    engine.escrow().confirm(&session.session_id).unwrap();

    // Retry with a different outcome: still a no-op.
    let retry = ledger
        .release_escrow(&session.session_id, EscrowOutcome::Cancelled)
        .unwrap();

    assert_eq!(retry.status, EscrowStatus::Completed);
    let account = ledger.get_account("alice").unwrap();
    assert_eq!(account.balance, 50.0);
    assert_eq!(account.spent_total, 50.0);
    assert_eq!(account.pending_escrow, 0.0);
}

/// The state machine rejects transitions on settled sessions.
#[test]
fn cancel_after_confirm_is_invalid_state() {
    let (engine, _clock) = start();
    engine
        .ledger()
        .credit("alice", 100.0, CreditReason::Earn)
        .unwrap();
    let session = engine
        .escrow()
        .create("alice", 50.0, Duration::minutes(15))
        .unwrap();
    engine.escrow().confirm(&session.session_id).unwrap();

    assert!(matches!(
        engine.escrow().cancel(&session.session_id),
        Err(LedgerError::InvalidState { .. })
    ));
}

/// Confirm past the TTL fails Expired and refunds on the spot, without
/// waiting for the sweep.
#[test]
fn confirm_past_ttl_expires_lazily() {
    let (engine, clock) = start();
    engine
        .ledger()
        .credit("alice", 100.0, CreditReason::Earn)
        .unwrap();
    let session = engine
        .escrow()
        .create("alice", 50.0, Duration::seconds(1))
        .unwrap();

    clock.advance(Duration::seconds(2));

    let err = engine.escrow().confirm(&session.session_id);
    assert!(
        matches!(err, Err(LedgerError::Expired { .. })),
        "expected Expired, got {err:?}"
    );
    let account = engine.ledger().get_account("alice").unwrap();
    assert_eq!(account.balance, 100.0, "expired hold must be refunded");
    assert_eq!(
        engine.escrow().get(&session.session_id).unwrap().status,
        EscrowStatus::Expired
    );
}

/// The sweep expires overdue sessions and refunds their holds.
#[test]
fn sweep_expires_overdue_sessions() {
    let (engine, clock) = start();
    engine
        .ledger()
        .credit("alice", 100.0, CreditReason::Earn)
        .unwrap();
    let session = engine
        .escrow()
        .create("alice", 50.0, Duration::seconds(1))
        .unwrap();
    assert_eq!(engine.ledger().get_account("alice").unwrap().balance, 50.0);

    clock.advance(Duration::seconds(2));
    let expired = engine.escrow().sweep();

    assert_eq!(expired, 1, "exactly one session was due");
    let account = engine.ledger().get_account("alice").unwrap();
    assert_eq!(account.balance, 100.0);
    assert_eq!(account.pending_escrow, 0.0);
    assert_eq!(
        engine.escrow().get(&session.session_id).unwrap().status,
        EscrowStatus::Expired
    );
}

/// The sweep leaves unexpired sessions alone.
#[test]
fn sweep_ignores_live_sessions() {
    let (engine, clock) = start();
    engine
        .ledger()
        .credit("alice", 100.0, CreditReason::Earn)
        .unwrap();
    let session = engine
        .escrow()
        .create("alice", 50.0, Duration::minutes(15))
        .unwrap();

    clock.advance(Duration::minutes(5));

    assert_eq!(engine.escrow().sweep(), 0);
    assert_eq!(
        engine.escrow().get(&session.session_id).unwrap().status,
        EscrowStatus::Pending
    );
}

/// The settlement side effect runs exactly once, before the release.
#[test]
fn confirm_with_runs_settlement_once() {
    let (engine, _clock) = start();
    engine
        .ledger()
        .credit("alice", 100.0, CreditReason::Earn)
        .unwrap();
    let session = engine
        .escrow()
        .create("alice", 50.0, Duration::minutes(15))
        .unwrap();

    let mut calls = 0;
    engine
        .escrow()
        .confirm_with(&session.session_id, |s| {
            calls += 1;
            assert_eq!(s.session_id, session.session_id);
            Ok(())
        })
        .unwrap();

    assert_eq!(calls, 1);
}

/// The background sweeper thread picks up overdue sessions on its own.
#[test]
fn background_sweeper_expires_sessions() {
    let (engine, _clock) = start();
    engine
        .ledger()
        .credit("alice", 100.0, CreditReason::Earn)
        .unwrap();
    let session = engine
        .escrow()
        .create("alice", 50.0, Duration::zero())
        .unwrap();

    let handle = engine
        .escrow()
        .spawn_sweeper(std::time::Duration::from_millis(10));
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while std::time::Instant::now() < deadline
        && engine.escrow().get(&session.session_id).unwrap().status != EscrowStatus::Expired
    {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    handle.stop();

    assert_eq!(
        engine.escrow().get(&session.session_id).unwrap().status,
        EscrowStatus::Expired
    );
    assert_eq!(engine.ledger().get_account("alice").unwrap().balance, 100.0);
}

/// A failing settlement side effect leaves the session pending and the
/// hold in place.
#[test]
fn failed_settlement_keeps_session_pending() {
    let (engine, _clock) = start();
    engine
        .ledger()
        .credit("alice", 100.0, CreditReason::Earn)
        .unwrap();
    let session = engine
        .escrow()
        .create("alice", 50.0, Duration::minutes(15))
        .unwrap();

    let result = engine.escrow().confirm_with(&session.session_id, |_| {
        Err(LedgerError::Other(anyhow::anyhow!("downstream unavailable")))
    });

    assert!(result.is_err());
    assert_eq!(
        engine.escrow().get(&session.session_id).unwrap().status,
        EscrowStatus::Pending
    );
    let account = engine.ledger().get_account("alice").unwrap();
    assert_eq!(account.pending_escrow, 50.0);
}

//! SQLite storage port: schema, round-trips, and the due-session index.

use chrono::{Duration, TimeZone, Utc};
use gridshare_core::{
    account::Account,
    clock::{Clock, ManualClock},
    config::EngineConfig,
    engine::MarketEngine,
    escrow::{EscrowSession, EscrowStatus},
    ledger::CreditReason,
    store::{LedgerStore, SqliteStore},
};
use std::sync::Arc;

fn open_store() -> SqliteStore {
    let store = SqliteStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
}

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Accounts round-trip with their achievement set and usage stats.
#[test]
fn account_round_trip() {
    let store = open_store();
    let mut account = Account::new("alice".to_string(), t0());
    account.balance = 55.5;
    account.earned_total = 80.5;
    account.spent_total = 25.0;
    account.tier_level = 1;
    account.achievements.insert("first_gb".to_string());
    account.stats.gb_shared = 12.25;
    account.stats.communities_created = 2;

    store.save_account(&account).unwrap();
    let loaded = store.load_account("alice").unwrap().unwrap();

    assert_eq!(loaded, account);
    assert!(store.load_account("ghost").unwrap().is_none());
}

/// Saving an existing account updates it in place.
#[test]
fn account_save_is_upsert() {
    let store = open_store();
    let mut account = Account::new("alice".to_string(), t0());
    store.save_account(&account).unwrap();

    account.balance = 99.0;
    account.earned_total = 99.0;
    store.save_account(&account).unwrap();

    assert_eq!(store.load_account("alice").unwrap().unwrap().balance, 99.0);
    assert_eq!(store.account_ids().unwrap(), vec!["alice".to_string()]);
}

/// The due query returns only pending sessions at or past expiry.
#[test]
fn due_query_filters_status_and_time() {
    let store = open_store();
    store
        .save_account(&Account::new("alice".to_string(), t0()))
        .unwrap();
    let session = |id: &str, status: EscrowStatus, expires_at| EscrowSession {
        session_id: id.to_string(),
        account_id: "alice".to_string(),
        amount: 10.0,
        status,
        created_at: t0(),
        expires_at,
        settled_at: None,
    };
    store
        .save_session(&session("due", EscrowStatus::Pending, t0() + Duration::seconds(30)))
        .unwrap();
    store
        .save_session(&session("later", EscrowStatus::Pending, t0() + Duration::hours(1)))
        .unwrap();
    store
        .save_session(&session("done", EscrowStatus::Completed, t0() - Duration::hours(1)))
        .unwrap();

    let due = store
        .pending_sessions_due(t0() + Duration::minutes(1))
        .unwrap();

    let ids: Vec<&str> = due.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, vec!["due"], "only pending-and-overdue sessions");
}

/// The whole engine runs against the SQLite port.
#[test]
fn engine_runs_on_sqlite() {
    let clock = Arc::new(ManualClock::new(t0()));
    let mut config = EngineConfig::default_config();
    config.achievements.clear();
    let engine = MarketEngine::build(
        Arc::new(open_store()),
        Arc::clone(&clock) as Arc<dyn Clock>,
        config,
    )
    .unwrap();

    engine
        .ledger()
        .credit("alice", 100.0, CreditReason::Earn)
        .unwrap();
    let session = engine
        .escrow()
        .create("alice", 40.0, Duration::seconds(1))
        .unwrap();
    clock.advance(Duration::seconds(2));
    assert_eq!(engine.escrow().sweep(), 1);

    let account = engine.ledger().get_account("alice").unwrap();
    assert_eq!(account.balance, 100.0);
    assert!(account.invariant_holds());
    assert_eq!(
        engine.escrow().get(&session.session_id).unwrap().status,
        EscrowStatus::Expired
    );

    let log = engine.ledger().events_for_account("alice").unwrap();
    assert_eq!(log.len(), 4); // credit, tier up, hold, expiry settlement
}

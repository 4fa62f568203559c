//! market-sim: headless demo driver for the gridshare credits engine.
//!
//! Usage:
//!   market-sim --seed 12345 --accounts 20 --rounds 200
//!   market-sim --seed 12345 --db run.db

use anyhow::Result;
use gridshare_core::{
    clock::SystemClock,
    config::EngineConfig,
    engine::MarketEngine,
    escrow::EscrowStatus,
    marketplace::{Opportunity, Perk},
    store::{LedgerStore, SqliteStore},
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::env;
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let accounts = parse_arg(&args, "--accounts", 20usize);
    let rounds = parse_arg(&args, "--rounds", 200u64);
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");

    println!("gridshare credits — market-sim");
    println!("  seed:     {seed}");
    println!("  accounts: {accounts}");
    println!("  rounds:   {rounds}");
    println!("  db:       {db}");
    println!();

    let store: Arc<SqliteStore> = if db == ":memory:" {
        Arc::new(SqliteStore::in_memory()?)
    } else {
        Arc::new(SqliteStore::open(db)?)
    };
    store.migrate()?;

    let mut config = EngineConfig::default_config();
    config.perks = demo_perks();
    config.opportunities = demo_opportunities();
    let engine = MarketEngine::build(
        Arc::clone(&store) as Arc<dyn LedgerStore>,
        Arc::new(SystemClock),
        config,
    )?;

    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let mut abandoned_sessions = 0u64;

    for round in 0..rounds {
        for n in 0..accounts {
            let account_id = format!("acct-{n:03}");
            match rng.gen_range(0..10u32) {
                // Most traffic is earning: a metered transfer.
                0..=5 => {
                    let gb = rng.gen_range(0.1..25.0);
                    let quality = if rng.gen_bool(0.3) { 0.2 } else { 0.0 };
                    engine.record_contribution(&account_id, gb, 1.0, quality)?;
                }
                // A purchase that settles right away.
                6..=7 => {
                    let amount = rng.gen_range(1.0..30.0);
                    if let Ok(session) = engine.begin_purchase(&account_id, amount) {
                        if rng.gen_bool(0.8) {
                            engine.confirm_purchase(&session.session_id)?;
                        } else {
                            engine.cancel_purchase(&session.session_id)?;
                        }
                    }
                }
                // A purchase abandoned to the sweeper (zero TTL).
                8 => {
                    let amount = rng.gen_range(1.0..10.0);
                    if engine
                        .escrow()
                        .create(&account_id, amount, chrono::Duration::zero())
                        .is_ok()
                    {
                        abandoned_sessions += 1;
                    }
                }
                // Window shopping, sometimes buying.
                _ => {
                    let perk_id = if rng.gen_bool(0.5) { "booster" } else { "banner" };
                    if let Ok(elig) = engine.marketplace().check_perk(perk_id, &account_id) {
                        if elig.eligible {
                            let _ = engine.purchase_perk(&account_id, perk_id);
                        }
                    }
                }
            }
        }
        // Sweep at a slower cadence than the traffic, like production.
        if round % 10 == 9 {
            engine.escrow().sweep();
        }
    }
    let swept = engine.escrow().sweep();
    log::info!("final sweep expired {swept} session(s)");

    print_summary(&engine, &store, abandoned_sessions)?;
    Ok(())
}

fn print_summary(
    engine: &MarketEngine,
    store: &Arc<SqliteStore>,
    abandoned_sessions: u64,
) -> Result<()> {
    let mut total_balance = 0.0;
    let mut total_earned = 0.0;
    let mut total_spent = 0.0;
    let mut violations = 0u64;
    let mut census: Vec<(String, u64)> = engine
        .ledger()
        .tiers()
        .all()
        .iter()
        .map(|t| (t.name.clone(), 0u64))
        .collect();

    let ids = store.account_ids()?;
    let mut expired = 0u64;
    for id in &ids {
        let account = engine.ledger().get_account(id)?;
        total_balance += account.balance;
        total_earned += account.earned_total;
        total_spent += account.spent_total;
        if !account.invariant_holds() {
            violations += 1;
        }
        census[account.tier_level as usize].1 += 1;
        expired += engine
            .ledger()
            .sessions_for_account(id)?
            .iter()
            .filter(|s| s.status == EscrowStatus::Expired)
            .count() as u64;
    }

    println!("── summary ─────────────────────────────────");
    println!("  accounts:            {}", ids.len());
    println!("  credits circulating: {total_balance:.2}");
    println!("  lifetime earned:     {total_earned:.2}");
    println!("  lifetime spent:      {total_spent:.2}");
    println!("  abandoned escrows:   {abandoned_sessions} ({expired} expired by sweep)");
    println!("  invariant audit:     {violations} violation(s)");
    println!("  tier census:");
    for (name, count) in census {
        println!("    {name:<12} {count}");
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn demo_perks() -> Vec<Perk> {
    vec![
        Perk {
            id: "booster".to_string(),
            label: "Earning booster".to_string(),
            cost: 150.0,
            min_tier: 1,
            available: true,
            inventory: 500,
        },
        Perk {
            id: "banner".to_string(),
            label: "Profile banner".to_string(),
            cost: 40.0,
            min_tier: 0,
            available: true,
            inventory: 1000,
        },
    ]
}

fn demo_opportunities() -> Vec<Opportunity> {
    vec![Opportunity {
        id: "relay-trial".to_string(),
        label: "Relay node trial".to_string(),
        min_tier: 1,
        min_balance: 100.0,
        reward: 50.0,
        capacity: 10,
        participants: 0,
    }]
}

//! gridshare-core — the credits ledger and marketplace-gating engine.
//!
//! One fungible token, many independent accounts: earning with a
//! platform fee and tier multipliers, spending, escrowed purchases
//! with TTL expiry, one-time achievement bonuses, and tier-gated
//! access to marketplace opportunities, perks, and communities.
//!
//! Entry point: `engine::MarketEngine::build` with a storage port
//! implementation and a clock.

pub mod account;
pub mod achievement;
pub mod clock;
pub mod config;
pub mod earnings;
pub mod engine;
pub mod error;
pub mod escrow;
pub mod event;
pub mod ledger;
pub mod marketplace;
pub mod pricing;
pub mod store;
pub mod tier;
pub mod types;

pub use account::Account;
pub use engine::MarketEngine;
pub use error::{LedgerError, LedgerResult};
pub use ledger::Ledger;

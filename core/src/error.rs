use crate::escrow::EscrowStatus;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("insufficient balance: requested {requested:.2}, available {available:.2}")]
    InsufficientBalance { requested: f64, available: f64 },

    #[error("negative amount {amount:.2} rejected at the ledger boundary")]
    NegativeAmount { amount: f64 },

    #[error("escrow session '{session_id}' is '{status}', expected 'pending'")]
    InvalidState {
        session_id: String,
        status: EscrowStatus,
    },

    #[error("escrow session '{session_id}' expired at {expired_at}")]
    Expired {
        session_id: String,
        expired_at: DateTime<Utc>,
    },

    #[error("perk '{perk_id}' unaffordable: {reason}")]
    Unaffordable { perk_id: String, reason: String },

    #[error("perk '{perk_id}' is out of stock")]
    OutOfStock { perk_id: String },

    #[error("malformed tier table: {reason}")]
    MalformedTierTable { reason: String },

    #[error("account '{0}' not found")]
    UnknownAccount(String),

    #[error("escrow session '{0}' not found")]
    UnknownSession(String),

    #[error("perk '{0}' not found")]
    UnknownPerk(String),

    #[error("opportunity '{0}' not found")]
    UnknownOpportunity(String),

    #[error("community '{0}' not found")]
    UnknownCommunity(String),

    #[error("achievement '{0}' not found")]
    UnknownAchievement(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

//! Shared primitive types used across the entire engine.

/// A stable, unique identifier for an account.
pub type AccountId = String;

/// A stable, unique identifier for an escrow session.
pub type SessionId = String;

/// An amount of the platform token.
pub type Credits = f64;

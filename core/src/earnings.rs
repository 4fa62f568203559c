//! Earnings calculator — pure math from transfer volume to net credits.
//!
//! Deliberately permissive: negative inputs pass through algebraically.
//! Non-negativity is enforced where credits actually enter the ledger,
//! not here.

use crate::{tier::TierDefinition, types::Credits};
use serde::Serialize;

/// Platform cut taken from gross earnings.
pub const PLATFORM_FEE_RATE: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EarningsBreakdown {
    pub base: Credits,
    pub bonus: Credits,
    pub gross: Credits,
    pub platform_fee: Credits,
    pub net: Credits,
}

/// Gross/net earnings for a metered transfer.
///
/// `base = amount_transferred * unit_price`
/// `bonus = base * quality_bonus_ratio`
/// `gross = base + bonus`
/// `net = gross - gross * PLATFORM_FEE_RATE`
pub fn compute_earnings(
    amount_transferred: f64,
    unit_price: Credits,
    quality_bonus_ratio: f64,
) -> EarningsBreakdown {
    let base = amount_transferred * unit_price;
    let bonus = base * quality_bonus_ratio;
    let gross = base + bonus;
    let platform_fee = gross * PLATFORM_FEE_RATE;
    EarningsBreakdown {
        base,
        bonus,
        gross,
        platform_fee,
        net: gross - platform_fee,
    }
}

/// Scale net earnings by the account tier's multiplier.
pub fn apply_tier_multiplier(net: Credits, tier: &TierDefinition) -> Credits {
    net * tier.earning_multiplier
}

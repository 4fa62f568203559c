//! Pricing collaborator — fiat-to-credits conversion.
//!
//! Consumed by checkout flows that quote a token cost for a
//! fiat-denominated item; not part of the ledger itself.

use crate::types::Credits;

/// Convert a fiat amount into credits at a fixed conversion rate,
/// with a fixed-percentage partner markup applied on top.
pub fn credits_for_fiat(fiat_amount: f64, conversion_rate: f64, markup_rate: f64) -> Credits {
    fiat_amount * conversion_rate * (1.0 + markup_rate)
}

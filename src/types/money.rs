//! Conversion between decimal major units and integer minor units
//!
//! Balances are stored as `i64` minor units. The CSV boundary speaks decimal
//! major units ("10.50"), so amounts are converted here, exactly, with
//! `rust_decimal`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::currency::Currency;
use super::error::{LedgerError, LedgerResult};

/// Convert a major-unit amount to minor units
///
/// Rejects amounts with more fractional digits than the currency has, and
/// amounts that do not fit in an `i64`.
pub fn to_minor_units(amount: Decimal, currency: Currency) -> LedgerResult<i64> {
    let digits = currency.minor_digits();
    let normalized = amount.normalize();
    if normalized.scale() > digits {
        return Err(LedgerError::invalid_argument(format!(
            "{} amount {} has more than {} decimal places",
            currency, amount, digits
        )));
    }

    let factor = Decimal::from(10_i64.pow(digits));
    normalized
        .checked_mul(factor)
        .and_then(|minor| minor.to_i64())
        .ok_or_else(|| {
            LedgerError::invalid_argument(format!("{} amount {} is out of range", currency, amount))
        })
}

/// Convert minor units to a major-unit amount, scaled to the currency's digits
pub fn to_major_units(minor: i64, currency: Currency) -> Decimal {
    Decimal::new(minor, currency.minor_digits())
}

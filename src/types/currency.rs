//! Supported currencies
//!
//! The ledger only accepts a fixed set of currencies. Every account is tagged with
//! one of them at creation time and the tag never changes afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::LedgerError;

/// Currency of an account balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// United States dollar
    Usd,
    /// Canadian dollar
    Cad,
    /// Turkish lira
    Try,
}

impl Currency {
    /// Every currency the ledger accepts
    pub const ALL: [Currency; 3] = [Currency::Usd, Currency::Cad, Currency::Try];

    /// ISO 4217 code
    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Cad => "CAD",
            Currency::Try => "TRY",
        }
    }

    /// Number of minor-unit digits (cents, kuruş)
    pub fn minor_digits(self) -> u32 {
        match self {
            Currency::Usd | Currency::Cad | Currency::Try => 2,
        }
    }

    /// Check whether a currency code is supported
    pub fn is_supported(code: &str) -> bool {
        code.parse::<Currency>().is_ok()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    /// Codes are matched exactly, so `"usd"` is rejected like any other unknown code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USD" => Ok(Currency::Usd),
            "CAD" => Ok(Currency::Cad),
            "TRY" => Ok(Currency::Try),
            other => Err(LedgerError::invalid_currency(other)),
        }
    }
}

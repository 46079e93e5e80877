//! Account-related types
//!
//! An account holds a balance in minor units of a single currency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::currency::Currency;

/// Account identifier
///
/// Assigned by the store, strictly increasing and never reused. The ordering of
/// identifiers is the global lock order used by transfers.
pub type AccountId = i64;

/// Account state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,

    /// Name of the owning user
    pub owner: String,

    /// Balance in minor units (cents)
    ///
    /// Only changed by a committed transfer or an administrative update.
    pub balance: i64,

    /// Currency of the balance, fixed at creation
    pub currency: Currency,

    pub created_at: DateTime<Utc>,
}

/// Input for creating an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAccountParams {
    pub owner: String,
    pub currency: Currency,
    pub balance: i64,
}

/// Offset pagination over id-ordered listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u64,
}

impl Page {
    /// Largest page a single listing may return
    pub const MAX_LIMIT: u32 = 100;

    /// Build a page, rejecting a zero or oversized limit
    pub fn new(limit: u32, offset: u64) -> super::LedgerResult<Self> {
        if limit == 0 || limit > Self::MAX_LIMIT {
            return Err(super::LedgerError::invalid_argument(format!(
                "page limit must be between 1 and {}, got {}",
                Self::MAX_LIMIT,
                limit
            )));
        }
        Ok(Self { limit, offset })
    }

    /// Page `number` (1-based) of `size` rows each
    pub fn numbered(number: u32, size: u32) -> super::LedgerResult<Self> {
        if number == 0 {
            return Err(super::LedgerError::invalid_argument(
                "page number starts at 1",
            ));
        }
        Self::new(size, u64::from(number - 1) * u64::from(size))
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
        }
    }
}

//! Entry types
//!
//! Entries are the append-only audit log: one row per signed balance change on
//! one account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::AccountId;

/// Entry identifier
pub type EntryId = i64;

/// Immutable record of a single balance change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,

    /// Account whose balance changed
    pub account_id: AccountId,

    /// Signed amount in minor units: positive is a credit, negative a debit
    pub amount: i64,

    pub created_at: DateTime<Utc>,
}

impl Entry {
    pub fn is_credit(&self) -> bool {
        self.amount > 0
    }

    pub fn is_debit(&self) -> bool {
        self.amount < 0
    }
}

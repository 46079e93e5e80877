//! Transfer-related types
//!
//! A transfer moves a positive amount between two accounts of the same currency.
//! Each committed transfer owns exactly two entries written in the same
//! transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::{Account, AccountId};
use super::entry::Entry;
use super::error::{LedgerError, LedgerResult};

/// Transfer identifier
pub type TransferId = i64;

/// Immutable record of a committed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,

    /// Amount moved, in minor units (always positive)
    pub amount: i64,

    pub created_at: DateTime<Utc>,
}

/// Input of a transfer transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

impl TransferParams {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// Check the preconditions that need no storage access
    pub fn validate(&self) -> LedgerResult<()> {
        if self.amount <= 0 {
            return Err(LedgerError::invalid_argument(format!(
                "transfer amount must be positive, got {}",
                self.amount
            )));
        }
        if self.from_account_id == self.to_account_id {
            return Err(LedgerError::invalid_argument(format!(
                "cannot transfer from account {} to itself",
                self.from_account_id
            )));
        }
        Ok(())
    }

    /// Both account ids, lower first
    ///
    /// This is the order in which rows are locked and balances updated,
    /// whatever the direction of the transfer.
    pub fn lock_order(&self) -> (AccountId, AccountId) {
        if self.from_account_id < self.to_account_id {
            (self.from_account_id, self.to_account_id)
        } else {
            (self.to_account_id, self.from_account_id)
        }
    }
}

/// Everything a committed transfer produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,

    /// Source account after the debit
    pub from_account: Account,

    /// Destination account after the credit
    pub to_account: Account,
}

/// Optional filters for listing transfers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferFilter {
    pub from_account_id: Option<AccountId>,
    pub to_account_id: Option<AccountId>,
}

impl TransferFilter {
    pub fn matches(&self, transfer: &Transfer) -> bool {
        self.from_account_id
            .is_none_or(|id| id == transfer.from_account_id)
            && self.to_account_id.is_none_or(|id| id == transfer.to_account_id)
    }
}

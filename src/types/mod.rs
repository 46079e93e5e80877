//! Types module
//!
//! Contains core data structures used throughout the ledger:
//! - `account`: accounts and pagination
//! - `entry`: audit log entries
//! - `transfer`: transfers and the transfer transaction result
//! - `currency`: the supported currency set
//! - `money`: major/minor unit conversion
//! - `error`: error types

pub mod account;
pub mod currency;
pub mod entry;
pub mod error;
pub mod money;
pub mod transfer;

pub use account::{Account, AccountId, CreateAccountParams, Page};
pub use currency::Currency;
pub use entry::{Entry, EntryId};
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use money::{to_major_units, to_minor_units};
pub use transfer::{Transfer, TransferFilter, TransferId, TransferParams, TransferTxResult};

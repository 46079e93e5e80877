//! Bank Ledger Library
//! # Overview
//!
//! This library provides a minimal banking ledger: accounts with
//! currency-tagged balances, and atomic funds transfers between them that stay
//! consistent under concurrent access.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (Account, Entry, Transfer, errors, money)
//! - [`store`] - Transactional Ledger Store abstraction and its backends
//! - [`core`] - Business logic components:
//!   - [`core::account_service`] - Account CRUD and in-transaction balance updates
//!   - [`core::entry_recorder`] - Append-only audit entries
//!   - [`core::transfer_executor`] - The funds-transfer transaction
//!   - [`core::batch_processor`] - Concurrent dispatch of transfer batches
//! - [`config`] - Runtime configuration
//! - [`cli`] - CLI arguments parsing
//! - [`io`] - CSV input and output
//! - [`app`] - The seed, transfer and report pipeline of the binary
//! - [`telemetry`] - Tracing initialization
//!
//! # Transfers
//!
//! A transfer runs in one store transaction. Both account rows are locked
//! lower id first, the source is checked against the balance policy, then the
//! transfer record, a debit entry, a credit entry and both balance updates are
//! written and committed together. Either all five writes become visible or
//! none does.
//!
//! ```no_run
//! use std::sync::Arc;
//! use bank_ledger::{LedgerConfig, MemoryStore, TransferExecutor, TransferParams};
//!
//! # async fn demo() -> bank_ledger::LedgerResult<()> {
//! let executor = TransferExecutor::new(Arc::new(MemoryStore::new()), LedgerConfig::default());
//! let alice = executor.accounts().create_account("alice", "USD", 10_000).await?;
//! let bob = executor.accounts().create_account("bob", "USD", 0).await?;
//!
//! let result = executor
//!     .transfer_tx(TransferParams::new(alice.id, bob.id, 2_500))
//!     .await?;
//! assert_eq!(result.from_account.balance, 7_500);
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod store;
pub mod telemetry;
pub mod types;

pub use config::{BalancePolicy, BatchConfig, LedgerConfig};
pub use core::{
    AccountService, BatchProcessor, EntryRecorder, ProcessingResult, RetryPolicy,
    TransferExecutor, TransferRequest,
};
pub use io::write_accounts_csv;
pub use store::{exec_tx, LedgerStore, LedgerTx, MemoryStore};
pub use types::{
    Account, AccountId, Currency, Entry, EntryId, ErrorKind, LedgerError, LedgerResult, Page,
    Transfer, TransferFilter, TransferId, TransferParams, TransferTxResult,
};

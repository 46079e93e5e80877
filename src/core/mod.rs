//! Core ledger logic
//!
//! This module contains the services built on top of a Ledger Store:
//! - `account_service` - Account CRUD and in-transaction balance mutation
//! - `entry_recorder` - Append-only audit entries
//! - `transfer_executor` - The atomic funds-transfer transaction
//! - `batch_processor` - Concurrent dispatch of many transfers
//! - `retry` - Bounded retry of serialization conflicts

pub mod account_service;
pub mod batch_processor;
pub mod entry_recorder;
pub mod retry;
pub mod transfer_executor;

pub use account_service::AccountService;
pub use batch_processor::{BatchProcessor, ProcessingResult, TransferRequest};
pub use entry_recorder::EntryRecorder;
pub use retry::{with_retry, RetryPolicy};
pub use transfer_executor::TransferExecutor;

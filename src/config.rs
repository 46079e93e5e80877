//! Runtime configuration
//!
//! `LedgerConfig` drives the Transfer Executor and Account Service,
//! `BatchConfig` drives the concurrent dispatch of transfer batches. Both are
//! usually built from [`crate::cli::CliArgs`]; zero values fall back to the
//! defaults with a warning.

use std::time::Duration;

use clap::ValueEnum;
use tracing::warn;

use crate::core::retry::RetryPolicy;
use crate::types::{Account, LedgerError, LedgerResult};

/// Whether a balance may go below zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum BalancePolicy {
    /// Debits that would leave a negative balance fail with `InsufficientFunds`
    #[default]
    #[value(name = "reject")]
    RejectOverdraft,

    /// Balances may go negative
    #[value(name = "allow")]
    AllowOverdraft,
}

impl BalancePolicy {
    /// Check that applying `delta` to `account` is allowed
    pub fn check(self, account: &Account, delta: i64) -> LedgerResult<()> {
        if self == BalancePolicy::AllowOverdraft || delta >= 0 {
            return Ok(());
        }

        match account.balance.checked_add(delta) {
            Some(after) if after >= 0 => Ok(()),
            _ => Err(LedgerError::insufficient_funds(
                account.id,
                account.balance,
                delta.saturating_neg(),
            )),
        }
    }
}

/// Configuration of the ledger services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    pub balance_policy: BalancePolicy,

    /// Longest wait for a single row lock
    ///
    /// This is a store setting: it is applied when the store is opened
    /// (`MemoryStore::with_lock_timeout`, `PgLedgerStore::new`), and
    /// `TransferExecutor::new` does not read it.
    pub lock_timeout: Duration,

    /// Longest time a whole transfer transaction may take
    pub tx_timeout: Duration,

    /// How serialization conflicts are retried
    pub retry: RetryPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            balance_policy: BalancePolicy::default(),
            lock_timeout: Duration::from_secs(2),
            tx_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

impl LedgerConfig {
    /// Create a LedgerConfig, replacing zero timeouts with the defaults
    pub fn new(
        balance_policy: BalancePolicy,
        lock_timeout: Duration,
        tx_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        let default = Self::default();

        let lock_timeout = if lock_timeout.is_zero() {
            warn!(
                default = ?default.lock_timeout,
                "invalid lock_timeout (0), using default"
            );
            default.lock_timeout
        } else {
            lock_timeout
        };

        let tx_timeout = if tx_timeout.is_zero() {
            warn!(default = ?default.tx_timeout, "invalid tx_timeout (0), using default");
            default.tx_timeout
        } else {
            tx_timeout
        };

        Self {
            balance_policy,
            lock_timeout,
            tx_timeout,
            retry,
        }
    }
}

/// Configuration for batch processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Maximum number of transfers in flight at once
    pub max_concurrent: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: num_cpus::get(),
        }
    }
}

impl BatchConfig {
    pub fn new(max_concurrent: usize) -> Self {
        let default = Self::default();

        let max_concurrent = if max_concurrent == 0 {
            warn!(
                default = default.max_concurrent,
                "invalid max_concurrent (0), using default"
            );
            default.max_concurrent
        } else {
            max_concurrent
        };

        Self { max_concurrent }
    }
}

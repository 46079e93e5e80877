use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{BalancePolicy, BatchConfig, LedgerConfig};
use crate::core::RetryPolicy;
use crate::telemetry::LogFormat;

/// Seed accounts and execute a batch of transfers
#[derive(Parser, Debug)]
#[command(name = "bank-ledger")]
#[command(about = "Seed accounts and execute a batch of transfers", long_about = None)]
pub struct CliArgs {
    /// Accounts CSV file (ref,owner,currency,balance)
    #[arg(long = "accounts", value_name = "CSV", env = "LEDGER_ACCOUNTS")]
    pub accounts_file: PathBuf,

    /// Transfers CSV file (from,to,amount,currency)
    #[arg(long = "transfers", value_name = "CSV", env = "LEDGER_TRANSFERS")]
    pub transfers_file: PathBuf,

    /// Maximum number of transfers in flight
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        env = "LEDGER_MAX_CONCURRENT",
        help = "Maximum number of transfers in flight (default: CPU cores)"
    )]
    pub max_concurrent: Option<usize>,

    /// Attempts per transfer, including the first one
    #[arg(
        long = "max-retries",
        value_name = "COUNT",
        env = "LEDGER_MAX_RETRIES",
        help = "Attempts per transfer on serialization conflicts (default: 5)"
    )]
    pub max_retries: Option<u32>,

    /// Longest wait for one row lock, in milliseconds
    #[arg(long = "lock-timeout-ms", value_name = "MS", env = "LEDGER_LOCK_TIMEOUT_MS")]
    pub lock_timeout_ms: Option<u64>,

    /// Longest duration of one transfer transaction, in milliseconds
    #[arg(long = "tx-timeout-ms", value_name = "MS", env = "LEDGER_TX_TIMEOUT_MS")]
    pub tx_timeout_ms: Option<u64>,

    /// Whether balances may go negative
    #[arg(
        long = "overdraft",
        value_name = "POLICY",
        default_value = "reject",
        env = "LEDGER_OVERDRAFT"
    )]
    pub overdraft: BalancePolicy,

    /// Log line format (logs go to stderr)
    #[arg(
        long = "log-format",
        value_name = "FORMAT",
        default_value = "text",
        env = "LEDGER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    /// PostgreSQL connection string; the in-process store is used when absent
    #[cfg(feature = "postgres")]
    #[arg(long = "database-url", value_name = "URL", env = "DATABASE_URL")]
    pub database_url: Option<String>,
}

impl CliArgs {
    /// Create a LedgerConfig from CLI arguments
    ///
    /// Missing values fall back to the defaults, zero timeouts are replaced by
    /// the defaults with a warning.
    pub fn to_ledger_config(&self) -> LedgerConfig {
        let default = LedgerConfig::default();
        let retry = match self.max_retries {
            Some(attempts) => RetryPolicy::new(
                attempts,
                default.retry.initial_backoff,
                default.retry.max_backoff,
            ),
            None => default.retry,
        };

        LedgerConfig::new(
            self.overdraft,
            self.lock_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(default.lock_timeout),
            self.tx_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(default.tx_timeout),
            retry,
        )
    }

    /// Create a BatchConfig from CLI arguments
    pub fn to_batch_config(&self) -> BatchConfig {
        match self.max_concurrent {
            Some(max_concurrent) => BatchConfig::new(max_concurrent),
            None => BatchConfig::default(),
        }
    }
}

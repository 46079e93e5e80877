//! Bank Ledger CLI
//!
//! Seeds accounts from one CSV file, executes the transfers of a second CSV file
//! concurrently, and writes the resulting balances as CSV to stdout.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- --accounts accounts.csv --transfers transfers.csv > balances.csv
//! cargo run -- --accounts accounts.csv --transfers transfers.csv --max-concurrent 8
//! cargo run -- --accounts accounts.csv --transfers transfers.csv --overdraft allow
//! RUST_LOG=debug cargo run -- --accounts a.csv --transfers t.csv --log-format json
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success (individual rows or transfers may have been skipped, see the logs)
//! - 1: Error (missing arguments, file not readable, store unavailable, etc.)

use bank_ledger::app::Pipeline;
use bank_ledger::{cli, telemetry};
use std::process;
use tracing::error;

fn main() {
    let args = cli::parse_args();
    telemetry::init(args.log_format);

    let pipeline = Pipeline::from_args(&args);

    let mut output = std::io::stdout();
    if let Err(e) = pipeline.run(&args.accounts_file, &args.transfers_file, &mut output) {
        error!("{}", e);
        process::exit(1);
    }
}

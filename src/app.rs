//! Batch pipeline behind the `bank-ledger` binary
//!
//! ```text
//! accounts.csv ──> AccountService::create_account ──┐
//!                                                   ├─> refs → ids
//! transfers.csv ─> TransferRequest (refs resolved) <┘
//!                      │
//!                      └─> BatchProcessor ─> TransferExecutor ─> Ledger Store
//!
//! stdout <── write_accounts_csv <── AccountService::get_account (per ref)
//! ```
//!
//! # Error Handling
//!
//! Fatal errors (unreadable input, store unavailable, output failure) are
//! returned as `Err(String)`. A bad account row, an unresolvable transfer row
//! or a failed transfer is logged with `tracing::warn!` and skipped.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cli::CliArgs;
use crate::config::{BatchConfig, LedgerConfig};
use crate::core::{AccountService, BatchProcessor, TransferExecutor, TransferRequest};
use crate::io::{
    write_accounts_csv, AccountCsvRecord, AccountRef, SyncReader, TransferCsvRecord, TransferRow,
};
use crate::store::{LedgerStore, MemoryStore};
use crate::types::{to_minor_units, AccountId, Currency, TransferParams};

/// Seeded account as seen by the transfers file
#[derive(Debug, Clone, Copy)]
struct SeededAccount {
    id: AccountId,
    currency: Currency,
}

/// The complete seed, transfer and report run
#[derive(Debug, Clone)]
pub struct Pipeline {
    ledger: LedgerConfig,
    batch: BatchConfig,
    #[cfg(feature = "postgres")]
    database_url: Option<String>,
}

impl Pipeline {
    /// Pipeline on the in-process store
    pub fn new(ledger: LedgerConfig, batch: BatchConfig) -> Self {
        Self {
            ledger,
            batch,
            #[cfg(feature = "postgres")]
            database_url: None,
        }
    }

    pub fn from_args(args: &CliArgs) -> Self {
        #[allow(unused_mut)]
        let mut pipeline = Self::new(args.to_ledger_config(), args.to_batch_config());
        #[cfg(feature = "postgres")]
        {
            pipeline.database_url = args.database_url.clone();
        }
        pipeline
    }

    /// Run the pipeline on a fresh tokio runtime
    pub fn run(
        &self,
        accounts_path: &Path,
        transfers_path: &Path,
        output: &mut dyn Write,
    ) -> Result<(), String> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.batch.max_concurrent)
            .enable_all()
            .build()
            .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;

        runtime.block_on(self.run_async(accounts_path, transfers_path, output))
    }

    /// Run the pipeline on the current runtime
    pub async fn run_async(
        &self,
        accounts_path: &Path,
        transfers_path: &Path,
        output: &mut dyn Write,
    ) -> Result<(), String> {
        let store = self.open_store().await?;
        let executor = TransferExecutor::new(store, self.ledger);

        let seeded = seed_accounts(executor.accounts(), accounts_path).await?;
        info!(accounts = seeded.len(), "accounts seeded");

        let requests = read_transfers(transfers_path, &seeded)?;
        let processor = BatchProcessor::new(executor.clone(), self.batch);
        for outcome in processor.process_batch(requests).await {
            if let Err(e) = outcome.result {
                warn!(line = outcome.request.line, error = %e, "transfer skipped");
            }
        }

        let mut accounts = Vec::with_capacity(seeded.len());
        for (reference, account) in &seeded {
            let account = executor
                .accounts()
                .get_account(account.id)
                .await
                .map_err(|e| format!("Failed to read account {}: {}", reference, e))?;
            accounts.push((*reference, account));
        }

        write_accounts_csv(&accounts, output)
    }

    #[cfg(not(feature = "postgres"))]
    async fn open_store(&self) -> Result<Arc<dyn LedgerStore>, String> {
        Ok(Arc::new(MemoryStore::with_lock_timeout(
            self.ledger.lock_timeout,
        )))
    }

    #[cfg(feature = "postgres")]
    async fn open_store(&self) -> Result<Arc<dyn LedgerStore>, String> {
        use crate::store::postgres::PgLedgerStore;

        let Some(url) = self.database_url.as_deref() else {
            return Ok(Arc::new(MemoryStore::with_lock_timeout(
                self.ledger.lock_timeout,
            )));
        };

        // one connection per in-flight transfer, plus one for reads
        let max_connections = u32::try_from(self.batch.max_concurrent)
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        let store = PgLedgerStore::connect(url, max_connections, self.ledger.lock_timeout)
            .await
            .map_err(|e| format!("Failed to connect to database: {}", e))?;
        store
            .migrate()
            .await
            .map_err(|e| format!("Failed to prepare database schema: {}", e))?;
        Ok(Arc::new(store))
    }
}

/// Create every valid account of the accounts file, keyed by ref
async fn seed_accounts(
    accounts: &AccountService,
    path: &Path,
) -> Result<BTreeMap<AccountRef, SeededAccount>, String> {
    let mut seeded = BTreeMap::new();

    for record in SyncReader::<AccountCsvRecord>::new(path)? {
        let (line, seed) = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(file = %path.display(), "{}", e);
                continue;
            }
        };
        if seeded.contains_key(&seed.reference) {
            warn!(line, reference = seed.reference, "duplicate account ref, row skipped");
            continue;
        }

        match accounts
            .create_account(&seed.owner, seed.currency.code(), seed.balance)
            .await
        {
            Ok(account) => {
                seeded.insert(
                    seed.reference,
                    SeededAccount {
                        id: account.id,
                        currency: account.currency,
                    },
                );
            }
            Err(e) => warn!(line, reference = seed.reference, error = %e, "account skipped"),
        }
    }

    Ok(seeded)
}

/// Read the transfers file and resolve refs to account ids
fn read_transfers(
    path: &Path,
    seeded: &BTreeMap<AccountRef, SeededAccount>,
) -> Result<Vec<TransferRequest>, String> {
    let mut requests = Vec::new();

    for record in SyncReader::<TransferCsvRecord>::new(path)? {
        match record.and_then(|(line, row)| resolve_transfer(line, row, seeded)) {
            Ok(request) => requests.push(request),
            Err(e) => warn!(file = %path.display(), "{}", e),
        }
    }

    Ok(requests)
}

fn resolve_transfer(
    line: usize,
    row: TransferRow,
    seeded: &BTreeMap<AccountRef, SeededAccount>,
) -> Result<TransferRequest, String> {
    let lookup = |reference: AccountRef| {
        seeded
            .get(&reference)
            .copied()
            .ok_or_else(|| format!("Line {}: unknown account ref {}", line, reference))
    };
    let from = lookup(row.from)?;
    let to = lookup(row.to)?;

    let amount = to_minor_units(row.amount, row.currency.unwrap_or(from.currency))
        .map_err(|e| format!("Line {}: {}", line, e))?;

    Ok(TransferRequest {
        line,
        params: TransferParams::new(from.id, to.id, amount),
        currency: row.currency,
    })
}

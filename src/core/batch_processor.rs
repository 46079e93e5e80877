//! Concurrent dispatch of transfer batches
//!
//! This module provides the `BatchProcessor` struct, which runs many transfer
//! requests through one [`TransferExecutor`] with a bounded number of
//! transfers in flight.
//!
//! # Design
//!
//! Every request is spawned on its own tokio task, the way a server would
//! handle each incoming request on an independent worker. No ordering is
//! imposed between requests: transfers touching the same accounts serialize on
//! the store's row locks, everything else runs in parallel.
//!
//! # Architecture
//!
//! ```text
//! BatchProcessor
//!     ├── TransferExecutor  (cloned into every task)
//!     └── BatchConfig       (max transfers in flight)
//! ```

use futures::stream::{self, StreamExt};
use tracing::{error, info};

use super::TransferExecutor;
use crate::config::BatchConfig;
use crate::types::{Currency, LedgerError, LedgerResult, TransferParams, TransferTxResult};

/// One transfer to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    /// Position of the request in its source (1-based line number for CSV input)
    pub line: usize,

    pub params: TransferParams,

    /// When set, both accounts must hold this currency
    pub currency: Option<Currency>,
}

/// Result of processing a single request
///
/// Contains the original request and the outcome of the transfer.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub request: TransferRequest,
    pub result: LedgerResult<TransferTxResult>,
}

/// Bounded-concurrency transfer dispatcher
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    executor: TransferExecutor,
    config: BatchConfig,
}

impl BatchProcessor {
    pub fn new(executor: TransferExecutor, config: BatchConfig) -> Self {
        Self { executor, config }
    }

    /// Process one request: currency pre-check, then the transfer with retries
    pub async fn process_request(&self, request: TransferRequest) -> ProcessingResult {
        let result = self.execute(request).await;
        ProcessingResult { request, result }
    }

    async fn execute(&self, request: TransferRequest) -> LedgerResult<TransferTxResult> {
        let params = request.params;
        if let Some(currency) = request.currency {
            params.validate()?;
            self.executor
                .accounts()
                .check_transfer_currency(params.from_account_id, params.to_account_id, currency)
                .await?;
        }
        self.executor.transfer_tx_with_retry(params).await
    }

    /// Process a batch of requests concurrently
    ///
    /// # Returns
    ///
    /// One `ProcessingResult` per request, in input order.
    ///
    /// # Guarantees
    ///
    /// - At most `max_concurrent` transfers are in flight at any time
    /// - All requests are processed, even if some fail
    /// - A panicking task yields an `Internal` error for its request only
    pub async fn process_batch(&self, batch: Vec<TransferRequest>) -> Vec<ProcessingResult> {
        let total = batch.len();
        let tasks = batch.into_iter().enumerate().map(|(index, request)| {
            let processor = self.clone();
            async move {
                let handle = tokio::spawn(async move { processor.process_request(request).await });
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(join_err) => {
                        error!(line = request.line, error = %join_err, "transfer task failed");
                        ProcessingResult {
                            request,
                            result: Err(LedgerError::internal(format!(
                                "transfer task failed: {}",
                                join_err
                            ))),
                        }
                    }
                };
                (index, outcome)
            }
        });

        let mut results: Vec<(usize, ProcessingResult)> = stream::iter(tasks)
            .buffer_unordered(self.config.max_concurrent)
            .collect()
            .await;
        results.sort_unstable_by_key(|(index, _)| *index);

        let failed = results
            .iter()
            .filter(|(_, outcome)| outcome.result.is_err())
            .count();
        info!(total, failed, "batch processed");

        results.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::store::MemoryStore;
    use crate::types::{Account, AccountId};
    use std::sync::Arc;

    async fn setup(balances: &[(i64, &str)], max_concurrent: usize) -> (BatchProcessor, Vec<Account>) {
        let executor = TransferExecutor::new(Arc::new(MemoryStore::new()), LedgerConfig::default());
        let mut accounts = Vec::new();
        for (balance, currency) in balances {
            accounts.push(
                executor
                    .accounts()
                    .create_account("owner", currency, *balance)
                    .await
                    .unwrap(),
            );
        }
        (
            BatchProcessor::new(executor, BatchConfig::new(max_concurrent)),
            accounts,
        )
    }

    fn request(line: usize, from: AccountId, to: AccountId, amount: i64) -> TransferRequest {
        TransferRequest {
            line,
            params: TransferParams::new(from, to, amount),
            currency: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_results_are_in_input_order() {
        let (processor, accounts) = setup(&[(10_000, "USD"), (10_000, "USD")], 4).await;
        let (a, b) = (accounts[0].id, accounts[1].id);

        let batch: Vec<_> = (1..=20)
            .map(|line| {
                if line % 2 == 0 {
                    request(line, a, b, 100)
                } else {
                    request(line, b, a, 50)
                }
            })
            .collect();
        let results = processor.process_batch(batch).await;

        assert_eq!(results.len(), 20);
        for (index, outcome) in results.iter().enumerate() {
            assert_eq!(outcome.request.line, index + 1);
            assert!(outcome.result.is_ok(), "line {} failed", index + 1);
        }

        let accounts_service = processor.executor.accounts();
        assert_eq!(accounts_service.get_account(a).await.unwrap().balance, 9_500);
        assert_eq!(accounts_service.get_account(b).await.unwrap().balance, 10_500);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_batch() {
        let (processor, accounts) = setup(&[(100, "USD"), (0, "USD")], 2).await;
        let (a, b) = (accounts[0].id, accounts[1].id);

        let results = processor
            .process_batch(vec![
                request(1, a, a, 10),
                request(2, a, 42, 10),
                request(3, a, b, 60),
                request(4, a, b, 0),
            ])
            .await;

        assert!(matches!(
            results[0].result,
            Err(LedgerError::InvalidArgument(_))
        ));
        assert_eq!(results[1].result, Err(LedgerError::account_not_found(42)));
        assert!(results[2].result.is_ok());
        assert!(matches!(
            results[3].result,
            Err(LedgerError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_currency_mismatch_is_rejected_before_transfer() {
        let (processor, accounts) = setup(&[(100, "USD"), (100, "CAD"), (100, "USD")], 1).await;
        let (usd, cad, usd2) = (accounts[0].id, accounts[1].id, accounts[2].id);

        let mut mismatched = request(1, usd, cad, 10);
        mismatched.currency = Some(Currency::Usd);
        let mut matched = request(2, usd, usd2, 10);
        matched.currency = Some(Currency::Usd);

        let results = processor.process_batch(vec![mismatched, matched]).await;
        assert!(matches!(
            results[0].result,
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(results[1].result.is_ok());

        let accounts_service = processor.executor.accounts();
        assert_eq!(accounts_service.get_account(cad).await.unwrap().balance, 100);
        assert_eq!(accounts_service.get_account(usd).await.unwrap().balance, 90);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (processor, _) = setup(&[], 3).await;
        assert!(processor.process_batch(Vec::new()).await.is_empty());
    }
}

//! Transfer Executor
//!
//! Moves funds between two accounts in one store transaction:
//!
//! 1. Lock both account rows, lower id first
//! 2. Check the balance policy on the source account
//! 3. Record the transfer
//! 4. Record the debit entry on the source and the credit entry on the target
//! 5. Update both balances, lower id first
//! 6. Commit
//!
//! Any failure before the commit rolls the whole transaction back. Locking in
//! ascending id order whatever the direction is what keeps concurrent A→B and
//! B→A transfers from deadlocking each other.

use std::sync::Arc;

use tracing::{debug, instrument};

use super::account_service::AccountService;
use super::entry_recorder::EntryRecorder;
use super::retry::with_retry;
use crate::config::{BalancePolicy, LedgerConfig};
use crate::store::{exec_tx, LedgerStore, LedgerTx};
use crate::types::{
    LedgerError, LedgerResult, Page, Transfer, TransferFilter, TransferId, TransferParams,
    TransferTxResult,
};

/// Stateless transfer engine
///
/// Clones share the store handle, so one executor can be cloned into every
/// worker task.
#[derive(Debug, Clone)]
pub struct TransferExecutor {
    store: Arc<dyn LedgerStore>,
    accounts: AccountService,
    entries: EntryRecorder,
    config: LedgerConfig,
}

impl TransferExecutor {
    pub fn new(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        Self {
            accounts: AccountService::new(Arc::clone(&store), config.balance_policy),
            entries: EntryRecorder::new(Arc::clone(&store)),
            store,
            config,
        }
    }

    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    pub fn entries(&self) -> &EntryRecorder {
        &self.entries
    }

    /// Execute one transfer
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` if the amount is not positive or both sides are the
    ///   same account (checked before any storage access)
    /// * `NotFound` if either account does not exist
    /// * `InsufficientFunds` if the balance policy rejects the debit
    /// * `SerializationConflict` if a lock wait or the whole transaction timed out
    #[instrument(
        skip(self),
        fields(from = params.from_account_id, to = params.to_account_id, amount = params.amount),
        err
    )]
    pub async fn transfer_tx(&self, params: TransferParams) -> LedgerResult<TransferTxResult> {
        params.validate()?;

        let accounts = self.accounts.clone();
        let entries = self.entries.clone();
        let policy = self.config.balance_policy;
        let work = exec_tx(self.store.as_ref(), move |tx| {
            Box::pin(async move { run_transfer(tx, &accounts, &entries, policy, params).await })
        });

        // dropping `work` on expiry drops the open transaction, which rolls back
        let result = tokio::time::timeout(self.config.tx_timeout, work)
            .await
            .map_err(|_| {
                LedgerError::conflict(format!(
                    "transfer transaction exceeded {:?}",
                    self.config.tx_timeout
                ))
            })??;

        debug!(transfer_id = result.transfer.id, "transfer committed");
        Ok(result)
    }

    /// Execute one transfer, retrying serialization conflicts
    pub async fn transfer_tx_with_retry(
        &self,
        params: TransferParams,
    ) -> LedgerResult<TransferTxResult> {
        with_retry(&self.config.retry, "transfer_tx", || self.transfer_tx(params)).await
    }

    pub async fn get_transfer(&self, id: TransferId) -> LedgerResult<Transfer> {
        exec_tx(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.get_transfer(id).await })
        })
        .await
    }

    /// Transfers in ascending id order
    pub async fn list_transfers(
        &self,
        filter: TransferFilter,
        page: Page,
    ) -> LedgerResult<Vec<Transfer>> {
        exec_tx(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.list_transfers(filter, page).await })
        })
        .await
    }
}

/// The body of the transfer transaction
async fn run_transfer(
    tx: &mut dyn LedgerTx,
    accounts: &AccountService,
    entries: &EntryRecorder,
    policy: BalancePolicy,
    params: TransferParams,
) -> LedgerResult<TransferTxResult> {
    let TransferParams {
        from_account_id,
        to_account_id,
        amount,
    } = params;
    let (first, second) = params.lock_order();

    let first_locked = accounts.lock_account(tx, first).await?;
    let second_locked = accounts.lock_account(tx, second).await?;
    let source = if first == from_account_id {
        &first_locked
    } else {
        &second_locked
    };
    policy.check(source, -amount)?;

    let transfer = tx
        .create_transfer(from_account_id, to_account_id, amount)
        .await?;
    let from_entry = entries.create_entry(tx, from_account_id, -amount).await?;
    let to_entry = entries.create_entry(tx, to_account_id, amount).await?;

    let delta = |id| if id == from_account_id { -amount } else { amount };
    let first_updated = accounts.add_account_balance(tx, first, delta(first)).await?;
    let second_updated = accounts
        .add_account_balance(tx, second, delta(second))
        .await?;

    let (from_account, to_account) = if first == from_account_id {
        (first_updated, second_updated)
    } else {
        (second_updated, first_updated)
    };

    Ok(TransferTxResult {
        transfer,
        from_entry,
        to_entry,
        from_account,
        to_account,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry::RetryPolicy;
    use crate::store::MemoryStore;
    use crate::types::{Account, AccountId};
    use rstest::rstest;
    use std::time::Duration;

    async fn setup(policy: BalancePolicy, balances: &[i64]) -> (TransferExecutor, Vec<Account>) {
        let config = LedgerConfig {
            balance_policy: policy,
            ..LedgerConfig::default()
        };
        let executor = TransferExecutor::new(Arc::new(MemoryStore::new()), config);
        let mut accounts = Vec::new();
        for (index, balance) in balances.iter().enumerate() {
            accounts.push(
                executor
                    .accounts()
                    .create_account(&format!("owner-{}", index), "USD", *balance)
                    .await
                    .unwrap(),
            );
        }
        (executor, accounts)
    }

    async fn balance(executor: &TransferExecutor, id: AccountId) -> i64 {
        executor.accounts().get_account(id).await.unwrap().balance
    }

    #[rstest]
    #[case::lower_to_higher(0, 1)]
    #[case::higher_to_lower(1, 0)]
    #[tokio::test]
    async fn test_transfer_moves_funds(#[case] from: usize, #[case] to: usize) {
        let (executor, accounts) = setup(BalancePolicy::default(), &[10_000, 10_000]).await;
        let (from, to) = (accounts[from].id, accounts[to].id);

        let result = executor
            .transfer_tx(TransferParams::new(from, to, 1_000))
            .await
            .unwrap();

        assert_eq!(result.transfer.from_account_id, from);
        assert_eq!(result.transfer.to_account_id, to);
        assert_eq!(result.transfer.amount, 1_000);
        assert_eq!(result.from_entry.account_id, from);
        assert_eq!(result.from_entry.amount, -1_000);
        assert_eq!(result.to_entry.account_id, to);
        assert_eq!(result.to_entry.amount, 1_000);
        assert_eq!(result.from_account.id, from);
        assert_eq!(result.from_account.balance, 9_000);
        assert_eq!(result.to_account.id, to);
        assert_eq!(result.to_account.balance, 11_000);

        assert_eq!(balance(&executor, from).await, 9_000);
        assert_eq!(balance(&executor, to).await, 11_000);
        assert_eq!(
            executor.get_transfer(result.transfer.id).await.unwrap(),
            result.transfer
        );
    }

    #[rstest]
    #[case::zero_amount(0, false)]
    #[case::negative_amount(-5, false)]
    #[case::same_account(10, true)]
    #[tokio::test]
    async fn test_invalid_params_are_rejected(#[case] amount: i64, #[case] same: bool) {
        let (executor, accounts) = setup(BalancePolicy::default(), &[100, 100]).await;
        let to = if same { accounts[0].id } else { accounts[1].id };

        let err = executor
            .transfer_tx(TransferParams::new(accounts[0].id, to, amount))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
        assert!(executor
            .list_transfers(TransferFilter::default(), Page::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_missing_account_leaves_no_trace() {
        let (executor, accounts) = setup(BalancePolicy::default(), &[100]).await;

        assert_eq!(
            executor
                .transfer_tx(TransferParams::new(accounts[0].id, 999, 10))
                .await,
            Err(LedgerError::account_not_found(999))
        );
        assert_eq!(balance(&executor, accounts[0].id).await, 100);
        assert!(executor
            .entries()
            .list_entries(None, Page::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_overdraft_rejected_by_default() {
        let (executor, accounts) = setup(BalancePolicy::RejectOverdraft, &[500, 0]).await;

        assert_eq!(
            executor
                .transfer_tx(TransferParams::new(accounts[0].id, accounts[1].id, 501))
                .await,
            Err(LedgerError::insufficient_funds(accounts[0].id, 500, 501))
        );
        assert_eq!(balance(&executor, accounts[0].id).await, 500);
        assert_eq!(balance(&executor, accounts[1].id).await, 0);

        executor
            .transfer_tx(TransferParams::new(accounts[0].id, accounts[1].id, 500))
            .await
            .unwrap();
        assert_eq!(balance(&executor, accounts[0].id).await, 0);
    }

    #[tokio::test]
    async fn test_overdraft_allowed_by_policy() {
        let (executor, accounts) = setup(BalancePolicy::AllowOverdraft, &[500, 0]).await;

        let result = executor
            .transfer_tx(TransferParams::new(accounts[0].id, accounts[1].id, 800))
            .await
            .unwrap();
        assert_eq!(result.from_account.balance, -300);
        assert_eq!(result.to_account.balance, 800);
    }

    #[tokio::test]
    async fn test_list_transfers_by_filter() {
        let (executor, accounts) = setup(BalancePolicy::default(), &[1_000, 1_000, 1_000]).await;
        let (a, b, c) = (accounts[0].id, accounts[1].id, accounts[2].id);
        for (from, to) in [(a, b), (b, c), (a, c), (c, a)] {
            executor
                .transfer_tx(TransferParams::new(from, to, 10))
                .await
                .unwrap();
        }

        let from_a = executor
            .list_transfers(
                TransferFilter {
                    from_account_id: Some(a),
                    to_account_id: None,
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(
            from_a.iter().map(|t| t.to_account_id).collect::<Vec<_>>(),
            vec![b, c]
        );

        let a_to_c = executor
            .list_transfers(
                TransferFilter {
                    from_account_id: Some(a),
                    to_account_id: Some(c),
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(a_to_c.len(), 1);

        let all = executor
            .list_transfers(TransferFilter::default(), Page::new(2, 2).unwrap())
            .await
            .unwrap();
        assert_eq!(
            all.iter().map(|t| (t.from_account_id, t.to_account_id)).collect::<Vec<_>>(),
            vec![(a, c), (c, a)]
        );
    }

    #[tokio::test]
    async fn test_transfer_times_out_behind_held_lock() {
        let store = Arc::new(MemoryStore::with_lock_timeout(Duration::from_secs(30)));
        let config = LedgerConfig {
            tx_timeout: Duration::from_millis(50),
            retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)),
            ..LedgerConfig::default()
        };
        let executor = TransferExecutor::new(store.clone(), config);
        let a = executor.accounts().create_account("a", "USD", 100).await.unwrap();
        let b = executor.accounts().create_account("b", "USD", 100).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.get_account_for_update(b.id).await.unwrap();

        let err = executor
            .transfer_tx_with_retry(TransferParams::new(a.id, b.id, 10))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "expected conflict, got {err:?}");

        holder.rollback().await.unwrap();
        assert_eq!(balance(&executor, a.id).await, 100);

        // the timed out attempt released its lock on `a`
        executor
            .transfer_tx(TransferParams::new(a.id, b.id, 10))
            .await
            .unwrap();
        assert_eq!(balance(&executor, a.id).await, 90);
        assert_eq!(balance(&executor, b.id).await, 110);
    }

    #[tokio::test]
    async fn test_retry_succeeds_once_lock_is_released() {
        let store = Arc::new(MemoryStore::with_lock_timeout(Duration::from_millis(20)));
        let config = LedgerConfig {
            retry: RetryPolicy::new(10, Duration::from_millis(20), Duration::from_millis(50)),
            ..LedgerConfig::default()
        };
        let executor = TransferExecutor::new(store.clone(), config);
        let a = executor.accounts().create_account("a", "USD", 100).await.unwrap();
        let b = executor.accounts().create_account("b", "USD", 100).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.get_account_for_update(a.id).await.unwrap();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            holder.rollback().await.unwrap();
        });

        let result = executor
            .transfer_tx_with_retry(TransferParams::new(a.id, b.id, 25))
            .await
            .unwrap();
        release.await.unwrap();

        assert_eq!(result.from_account.balance, 75);
        assert_eq!(result.to_account.balance, 125);
    }
}

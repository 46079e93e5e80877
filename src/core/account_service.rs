//! Account management
//!
//! `AccountService` is CRUD over account rows. Standalone operations run in
//! their own transaction; `lock_account` and `add_account_balance` run inside a
//! transaction owned by the caller and never commit on their own.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::BalancePolicy;
use crate::store::{exec_tx, LedgerStore, LedgerTx};
use crate::types::{
    Account, AccountId, CreateAccountParams, Currency, LedgerError, LedgerResult, Page,
};

/// Account CRUD on top of a Ledger Store
///
/// Cheap to clone; clones share the store handle.
#[derive(Debug, Clone)]
pub struct AccountService {
    store: Arc<dyn LedgerStore>,
    policy: BalancePolicy,
}

impl AccountService {
    pub fn new(store: Arc<dyn LedgerStore>, policy: BalancePolicy) -> Self {
        Self { store, policy }
    }

    /// Open an account
    ///
    /// # Errors
    ///
    /// * `InvalidCurrency` if `currency` is not a supported code
    /// * `InvalidArgument` if `owner` is blank or `initial_balance` is negative
    #[instrument(skip(self), err)]
    pub async fn create_account(
        &self,
        owner: &str,
        currency: &str,
        initial_balance: i64,
    ) -> LedgerResult<Account> {
        let currency: Currency = currency.parse()?;
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(LedgerError::invalid_argument("account owner must not be blank"));
        }
        if initial_balance < 0 {
            return Err(LedgerError::invalid_argument(format!(
                "initial balance must not be negative, got {}",
                initial_balance
            )));
        }

        let params = CreateAccountParams {
            owner: owner.to_string(),
            currency,
            balance: initial_balance,
        };
        let account = exec_tx(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.create_account(params).await })
        })
        .await?;

        debug!(account_id = account.id, "account created");
        Ok(account)
    }

    pub async fn get_account(&self, id: AccountId) -> LedgerResult<Account> {
        exec_tx(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.get_account(id).await })
        })
        .await
    }

    /// Accounts of `owner` in ascending id order
    ///
    /// `owner` is trimmed the same way `create_account` trims it.
    pub async fn list_accounts(&self, owner: &str, page: Page) -> LedgerResult<Vec<Account>> {
        let owner = owner.trim().to_string();
        exec_tx(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.list_accounts(&owner, page).await })
        })
        .await
    }

    /// Administrative balance adjustment
    ///
    /// The row is locked before the balance policy is checked, so the check
    /// sees the balance the update applies to.
    #[instrument(skip(self), err)]
    pub async fn update_account(&self, id: AccountId, balance_delta: i64) -> LedgerResult<Account> {
        let policy = self.policy;
        exec_tx(self.store.as_ref(), move |tx| {
            Box::pin(async move {
                let account = tx.get_account_for_update(id).await?;
                policy.check(&account, balance_delta)?;
                tx.add_account_balance(id, balance_delta).await
            })
        })
        .await
    }

    /// Delete an account without history
    ///
    /// # Errors
    ///
    /// * `NotFound` if the account does not exist
    /// * `ForeignKeyViolation` if any entry or transfer references it
    #[instrument(skip(self), err)]
    pub async fn delete_account(&self, id: AccountId) -> LedgerResult<()> {
        exec_tx(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.delete_account(id).await })
        })
        .await
    }

    /// Lock an account row inside the caller's transaction
    pub async fn lock_account(&self, tx: &mut dyn LedgerTx, id: AccountId) -> LedgerResult<Account> {
        tx.get_account_for_update(id).await
    }

    /// Add `amount` (possibly negative) to the balance inside the caller's transaction
    pub async fn add_account_balance(
        &self,
        tx: &mut dyn LedgerTx,
        id: AccountId,
        amount: i64,
    ) -> LedgerResult<Account> {
        let account = tx.add_account_balance(id, amount).await?;
        debug!(account_id = id, amount, balance = account.balance, "balance updated");
        Ok(account)
    }

    /// Check that both accounts exist and hold `currency`
    ///
    /// This is the pre-check a caller runs before submitting a transfer; the
    /// Transfer Executor itself does not compare currencies.
    pub async fn check_transfer_currency(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        currency: Currency,
    ) -> LedgerResult<(Account, Account)> {
        let (from, to) = exec_tx(self.store.as_ref(), move |tx| {
            Box::pin(async move {
                let from = tx.get_account(from_account_id).await?;
                let to = tx.get_account(to_account_id).await?;
                Ok((from, to))
            })
        })
        .await?;

        for account in [&from, &to] {
            if account.currency != currency {
                return Err(LedgerError::invalid_argument(format!(
                    "account {} currency mismatch: {} vs {}",
                    account.id, account.currency, currency
                )));
            }
        }
        Ok((from, to))
    }
}

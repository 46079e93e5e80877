//! Ledger Store abstraction
//!
//! The store owns the accounts, entries and transfers tables and is the only
//! place where concurrency is coordinated. Everything above it is stateless.
//!
//! # Contract
//!
//! - [`LedgerStore::begin`] opens a transaction and hands back a [`LedgerTx`].
//! - All reads and writes go through the transaction handle. Writes become
//!   visible to other transactions only when [`LedgerTx::commit`] succeeds, and
//!   then all at once.
//! - [`LedgerTx::get_account_for_update`] locks the account row until the
//!   transaction ends, like `SELECT … FOR UPDATE`. Balance updates lock the row
//!   implicitly if it is not held yet.
//! - A lock wait that exceeds the store's timeout fails with
//!   `SerializationConflict`.
//! - Dropping a transaction that was neither committed nor rolled back rolls it
//!   back. This covers panics and cancelled futures.
//!
//! # Backends
//!
//! - [`memory::MemoryStore`]: in-process store with per-row async locks
//! - `postgres::PgLedgerStore`: PostgreSQL via sqlx (feature `postgres`)

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::warn;

use crate::types::{
    Account, AccountId, CreateAccountParams, Entry, EntryId, LedgerResult, Page, Transfer,
    TransferFilter, TransferId,
};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;

/// Transactional storage for the ledger
#[async_trait]
pub trait LedgerStore: Send + Sync + std::fmt::Debug {
    /// Open a new transaction
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>>;
}

/// Row-level operations scoped to one open transaction
#[async_trait]
pub trait LedgerTx: Send {
    async fn create_account(&mut self, params: CreateAccountParams) -> LedgerResult<Account>;

    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account>;

    /// Read an account and hold its row lock until the transaction ends
    async fn get_account_for_update(&mut self, id: AccountId) -> LedgerResult<Account>;

    /// Accounts of `owner`, ordered by id
    async fn list_accounts(&mut self, owner: &str, page: Page) -> LedgerResult<Vec<Account>>;

    /// Add a signed amount to the balance and return the updated row
    async fn add_account_balance(&mut self, id: AccountId, amount: i64) -> LedgerResult<Account>;

    /// Delete an account with no entries or transfers
    async fn delete_account(&mut self, id: AccountId) -> LedgerResult<()>;

    async fn create_entry(&mut self, account_id: AccountId, amount: i64) -> LedgerResult<Entry>;

    async fn get_entry(&mut self, id: EntryId) -> LedgerResult<Entry>;

    /// Entries ordered by id, optionally restricted to one account
    async fn list_entries(
        &mut self,
        account_id: Option<AccountId>,
        page: Page,
    ) -> LedgerResult<Vec<Entry>>;

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> LedgerResult<Transfer>;

    async fn get_transfer(&mut self, id: TransferId) -> LedgerResult<Transfer>;

    /// Transfers ordered by id
    async fn list_transfers(
        &mut self,
        filter: TransferFilter,
        page: Page,
    ) -> LedgerResult<Vec<Transfer>>;

    /// Publish every write of this transaction atomically and release its locks
    async fn commit(self: Box<Self>) -> LedgerResult<()>;

    /// Discard every write of this transaction and release its locks
    async fn rollback(self: Box<Self>) -> LedgerResult<()>;
}

/// Run `work` inside one transaction
///
/// Commits when `work` returns `Ok`, rolls back when it returns `Err`. If the
/// returned future is dropped early or `work` panics, the transaction handle is
/// dropped with it and the store rolls back.
///
/// ```ignore
/// let account = exec_tx(store.as_ref(), move |tx| {
///     Box::pin(async move { tx.add_account_balance(id, 100).await })
/// })
/// .await?;
/// ```
pub async fn exec_tx<T, F>(store: &dyn LedgerStore, work: F) -> LedgerResult<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn LedgerTx) -> BoxFuture<'t, LedgerResult<T>> + Send,
{
    let mut tx = store.begin().await?;
    let outcome = work(tx.as_mut()).await;

    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, original = %err, "rollback failed");
            }
            Err(err)
        }
    }
}

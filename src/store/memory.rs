//! In-process transactional Ledger Store
//!
//! `MemoryStore` keeps the three tables in ordered maps behind one async
//! `RwLock` and gives every account row its own async mutex, registered lazily
//! in a `DashMap`.
//!
//! # Isolation
//!
//! Each transaction buffers its writes in a private write set and reads
//! committed rows overlaid with that write set (read committed). Commit
//! publishes the whole write set inside a single write section of the table
//! lock, so other transactions see all of it or none of it.
//!
//! # Row locks
//!
//! - `get_account_for_update`, `add_account_balance` and `delete_account` take
//!   the account's row lock.
//! - `create_entry` and `create_transfer` take the row locks of the accounts
//!   they reference, so an account cannot be deleted while new history for it
//!   is pending. Two references are locked lower id first.
//! - Locks are held until commit, rollback or drop.
//! - A lock wait longer than the configured timeout fails with
//!   `SerializationConflict`.
//!
//! Identifiers come from per-table counters and are never reused, even when a
//! transaction rolls back.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, instrument};

use super::{LedgerStore, LedgerTx};
use crate::types::{
    Account, AccountId, CreateAccountParams, Entry, EntryId, LedgerError, LedgerResult, Page,
    Transfer, TransferFilter, TransferId,
};

/// Committed state
#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

impl Tables {
    fn has_history(&self, account_id: AccountId) -> bool {
        self.entries
            .values()
            .any(|entry| entry.account_id == account_id)
            || self.transfers.values().any(|transfer| {
                transfer.from_account_id == account_id || transfer.to_account_id == account_id
            })
    }
}

#[derive(Debug)]
struct Shared {
    tables: RwLock<Tables>,

    /// One mutex per account row, created on first use and dropped once the
    /// row is gone and nobody holds or waits on it
    row_locks: DashMap<AccountId, Arc<Mutex<()>>>,

    next_account_id: AtomicI64,
    next_entry_id: AtomicI64,
    next_transfer_id: AtomicI64,

    lock_timeout: Duration,
}

/// In-process Ledger Store
///
/// Cloning is cheap and every clone shares the same tables.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn new() -> Self {
        Self::with_lock_timeout(Self::DEFAULT_LOCK_TIMEOUT)
    }

    /// Create a store whose row lock waits give up after `lock_timeout`
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: DashMap::new(),
                next_account_id: AtomicI64::new(1),
                next_entry_id: AtomicI64::new(1),
                next_transfer_id: AtomicI64::new(1),
                lock_timeout,
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        Ok(Box::new(MemoryTx::new(Arc::clone(&self.shared))))
    }
}

/// Open transaction on a [`MemoryStore`]
pub struct MemoryTx {
    shared: Arc<Shared>,

    /// Row locks held by this transaction
    locks: HashMap<AccountId, OwnedMutexGuard<()>>,

    /// Accounts created or modified by this transaction
    accounts: BTreeMap<AccountId, Account>,
    deleted: BTreeSet<AccountId>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,

    finished: bool,
}

impl MemoryTx {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            locks: HashMap::new(),
            accounts: BTreeMap::new(),
            deleted: BTreeSet::new(),
            entries: BTreeMap::new(),
            transfers: BTreeMap::new(),
            finished: false,
        }
    }

    /// Acquire the row lock of `id`, returning whether it was newly acquired
    async fn lock_row(&mut self, id: AccountId) -> LedgerResult<bool> {
        if self.locks.contains_key(&id) {
            return Ok(false);
        }

        let mutex = Arc::clone(self.shared.row_locks.entry(id).or_default().value());
        let guard = tokio::time::timeout(self.shared.lock_timeout, mutex.lock_owned())
            .await
            .map_err(|_| {
                LedgerError::conflict(format!(
                    "timed out after {:?} waiting for the lock on account {}",
                    self.shared.lock_timeout, id
                ))
            })?;

        self.locks.insert(id, guard);
        Ok(true)
    }

    /// Lock `id` and return the visible row, releasing a fresh lock if the row is missing
    async fn lock_existing(&mut self, id: AccountId) -> LedgerResult<Option<Account>> {
        let newly_locked = self.lock_row(id).await?;
        let account = self.visible_account(id).await;
        if account.is_none() && newly_locked {
            self.release_row(id);
        }
        Ok(account)
    }

    /// Release the lock on a row that no longer exists and forget its mutex
    ///
    /// The mutex stays registered while another transaction holds a clone of
    /// it, so every holder and waiter keeps sharing the same one.
    fn release_row(&mut self, id: AccountId) {
        self.locks.remove(&id);
        self.shared
            .row_locks
            .remove_if(&id, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// The account as this transaction sees it
    async fn visible_account(&self, id: AccountId) -> Option<Account> {
        if self.deleted.contains(&id) {
            return None;
        }
        if let Some(account) = self.accounts.get(&id) {
            return Some(account.clone());
        }
        self.shared.tables.read().await.accounts.get(&id).cloned()
    }

    fn has_pending_history(&self, account_id: AccountId) -> bool {
        self.entries
            .values()
            .any(|entry| entry.account_id == account_id)
            || self.transfers.values().any(|transfer| {
                transfer.from_account_id == account_id || transfer.to_account_id == account_id
            })
    }
}

fn paginate<T>(rows: impl Iterator<Item = T>, page: Page) -> Vec<T> {
    rows.skip(usize::try_from(page.offset).unwrap_or(usize::MAX))
        .take(page.limit as usize)
        .collect()
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn create_account(&mut self, params: CreateAccountParams) -> LedgerResult<Account> {
        let id = self.shared.next_account_id.fetch_add(1, Ordering::Relaxed);
        let account = Account {
            id,
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now(),
        };
        self.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account> {
        self.visible_account(id)
            .await
            .ok_or_else(|| LedgerError::account_not_found(id))
    }

    #[instrument(level = "trace", skip(self))]
    async fn get_account_for_update(&mut self, id: AccountId) -> LedgerResult<Account> {
        self.lock_existing(id)
            .await?
            .ok_or_else(|| LedgerError::account_not_found(id))
    }

    async fn list_accounts(&mut self, owner: &str, page: Page) -> LedgerResult<Vec<Account>> {
        let mut rows: BTreeMap<AccountId, Account> = {
            let tables = self.shared.tables.read().await;
            tables
                .accounts
                .values()
                .filter(|account| account.owner == owner)
                .map(|account| (account.id, account.clone()))
                .collect()
        };
        for account in self.accounts.values() {
            if account.owner == owner {
                rows.insert(account.id, account.clone());
            }
        }
        for id in &self.deleted {
            rows.remove(id);
        }
        Ok(paginate(rows.into_values(), page))
    }

    #[instrument(level = "trace", skip(self))]
    async fn add_account_balance(&mut self, id: AccountId, amount: i64) -> LedgerResult<Account> {
        let mut account = self
            .lock_existing(id)
            .await?
            .ok_or_else(|| LedgerError::account_not_found(id))?;

        account.balance = account.balance.checked_add(amount).ok_or_else(|| {
            LedgerError::invalid_argument(format!("balance of account {} would overflow", id))
        })?;
        self.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn delete_account(&mut self, id: AccountId) -> LedgerResult<()> {
        if self.lock_existing(id).await?.is_none() {
            return Err(LedgerError::account_not_found(id));
        }

        let committed_history = self.shared.tables.read().await.has_history(id);
        if committed_history || self.has_pending_history(id) {
            return Err(LedgerError::foreign_key(format!(
                "account {} is still referenced by entries or transfers",
                id
            )));
        }

        self.accounts.remove(&id);
        self.deleted.insert(id);
        Ok(())
    }

    async fn create_entry(&mut self, account_id: AccountId, amount: i64) -> LedgerResult<Entry> {
        if self.lock_existing(account_id).await?.is_none() {
            return Err(LedgerError::foreign_key(format!(
                "entry references missing account {}",
                account_id
            )));
        }

        let entry = Entry {
            id: self.shared.next_entry_id.fetch_add(1, Ordering::Relaxed),
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get_entry(&mut self, id: EntryId) -> LedgerResult<Entry> {
        if let Some(entry) = self.entries.get(&id) {
            return Ok(entry.clone());
        }
        self.shared
            .tables
            .read()
            .await
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::entry_not_found(id))
    }

    async fn list_entries(
        &mut self,
        account_id: Option<AccountId>,
        page: Page,
    ) -> LedgerResult<Vec<Entry>> {
        let wanted = |entry: &&Entry| account_id.is_none_or(|id| id == entry.account_id);

        let mut rows: BTreeMap<EntryId, Entry> = {
            let tables = self.shared.tables.read().await;
            tables
                .entries
                .values()
                .filter(wanted)
                .map(|entry| (entry.id, entry.clone()))
                .collect()
        };
        rows.extend(
            self.entries
                .values()
                .filter(wanted)
                .map(|entry| (entry.id, entry.clone())),
        );
        Ok(paginate(rows.into_values(), page))
    }

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> LedgerResult<Transfer> {
        let (first, second) = if from_account_id <= to_account_id {
            (from_account_id, to_account_id)
        } else {
            (to_account_id, from_account_id)
        };
        for id in [first, second] {
            if self.lock_existing(id).await?.is_none() {
                return Err(LedgerError::foreign_key(format!(
                    "transfer references missing account {}",
                    id
                )));
            }
        }

        let transfer = Transfer {
            id: self.shared.next_transfer_id.fetch_add(1, Ordering::Relaxed),
            from_account_id,
            to_account_id,
            amount,
            created_at: Utc::now(),
        };
        self.transfers.insert(transfer.id, transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: TransferId) -> LedgerResult<Transfer> {
        if let Some(transfer) = self.transfers.get(&id) {
            return Ok(transfer.clone());
        }
        self.shared
            .tables
            .read()
            .await
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::transfer_not_found(id))
    }

    async fn list_transfers(
        &mut self,
        filter: TransferFilter,
        page: Page,
    ) -> LedgerResult<Vec<Transfer>> {
        let mut rows: BTreeMap<TransferId, Transfer> = {
            let tables = self.shared.tables.read().await;
            tables
                .transfers
                .values()
                .filter(|transfer| filter.matches(transfer))
                .map(|transfer| (transfer.id, transfer.clone()))
                .collect()
        };
        rows.extend(
            self.transfers
                .values()
                .filter(|transfer| filter.matches(transfer))
                .map(|transfer| (transfer.id, transfer.clone())),
        );
        Ok(paginate(rows.into_values(), page))
    }

    #[instrument(level = "trace", skip(self))]
    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let mut this = self;
        let deleted = std::mem::take(&mut this.deleted);
        {
            let mut tables = this.shared.tables.write().await;
            for (id, account) in std::mem::take(&mut this.accounts) {
                tables.accounts.insert(id, account);
            }
            for id in &deleted {
                tables.accounts.remove(id);
            }
            tables.entries.append(&mut this.entries);
            tables.transfers.append(&mut this.transfers);
        }
        for id in deleted {
            this.release_row(id);
        }
        this.finished = true;
        debug!(locks = this.locks.len(), "memory transaction committed");
        // row locks are released when `this` drops, after the write section
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        let mut this = self;
        this.finished = true;
        debug!(locks = this.locks.len(), "memory transaction rolled back");
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                locks = self.locks.len(),
                pending_entries = self.entries.len(),
                "memory transaction dropped before commit, rolling back"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Currency;

    fn params(owner: &str, balance: i64) -> CreateAccountParams {
        CreateAccountParams {
            owner: owner.to_string(),
            currency: Currency::Usd,
            balance,
        }
    }

    async fn seed(store: &MemoryStore, owner: &str, balance: i64) -> Account {
        let mut tx = store.begin().await.unwrap();
        let account = tx.create_account(params(owner, balance)).await.unwrap();
        tx.commit().await.unwrap();
        account
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryStore::new();
        let account = seed(&store, "alice", 100).await;

        let mut writer = store.begin().await.unwrap();
        writer.add_account_balance(account.id, 50).await.unwrap();
        writer.create_entry(account.id, 50).await.unwrap();

        let mut reader = store.begin().await.unwrap();
        assert_eq!(reader.get_account(account.id).await.unwrap().balance, 100);
        assert!(reader
            .list_entries(Some(account.id), Page::default())
            .await
            .unwrap()
            .is_empty());

        writer.commit().await.unwrap();
        assert_eq!(reader.get_account(account.id).await.unwrap().balance, 150);
        assert_eq!(
            reader
                .list_entries(Some(account.id), Page::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_transaction_reads_its_own_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let account = tx.create_account(params("bob", 10)).await.unwrap();
        tx.add_account_balance(account.id, -4).await.unwrap();
        assert_eq!(tx.get_account(account.id).await.unwrap().balance, 6);
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.get_account(account.id).await.unwrap_err(),
            LedgerError::account_not_found(account.id)
        );
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back_and_releases_locks() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(100));
        let account = seed(&store, "carol", 100).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.get_account_for_update(account.id).await.unwrap();
            tx.add_account_balance(account.id, -100).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        let locked = tx.get_account_for_update(account.id).await.unwrap();
        assert_eq!(locked.balance, 100);
    }

    fn registered_locks(store: &MemoryStore) -> usize {
        store.shared.row_locks.len()
    }

    #[tokio::test]
    async fn test_row_locks_are_dropped_for_missing_and_deleted_accounts() {
        let store = MemoryStore::new();
        let kept = seed(&store, "erin", 10).await;
        let doomed = seed(&store, "frank", 0).await;

        let mut tx = store.begin().await.unwrap();
        for id in [404, 405, 406] {
            assert_eq!(
                tx.get_account_for_update(id).await.unwrap_err(),
                LedgerError::account_not_found(id)
            );
        }
        assert_eq!(registered_locks(&store), 0);

        tx.get_account_for_update(kept.id).await.unwrap();
        tx.delete_account(doomed.id).await.unwrap();
        assert_eq!(registered_locks(&store), 2);
        tx.commit().await.unwrap();

        assert_eq!(registered_locks(&store), 1);
        assert!(store.shared.row_locks.contains_key(&kept.id));
    }

    #[tokio::test]
    async fn test_waiter_on_deleted_row_shares_its_lock() {
        let store = MemoryStore::with_lock_timeout(Duration::from_secs(5));
        let account = seed(&store, "grace", 0).await;

        let mut deleter = store.begin().await.unwrap();
        deleter.delete_account(account.id).await.unwrap();

        let waiter = tokio::spawn({
            let store = store.clone();
            async move {
                let mut tx = store.begin().await.unwrap();
                tx.get_account_for_update(account.id).await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        deleter.commit().await.unwrap();

        assert_eq!(
            waiter.await.unwrap(),
            Err(LedgerError::account_not_found(account.id))
        );
        assert_eq!(registered_locks(&store), 0);
    }

    #[tokio::test]
    async fn test_lock_wait_times_out_as_conflict() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(50));
        let account = seed(&store, "dave", 1).await;

        let mut holder = store.begin().await.unwrap();
        holder.get_account_for_update(account.id).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.get_account_for_update(account.id).await.unwrap_err();
        assert!(err.is_retryable(), "expected conflict, got {err:?}");
    }

    #[tokio::test]
    async fn test_lock_is_granted_after_holder_commits() {
        let store = MemoryStore::new();
        let account = seed(&store, "erin", 0).await;

        let mut holder = store.begin().await.unwrap();
        holder.add_account_balance(account.id, 25).await.unwrap();

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut tx = waiter_store.begin().await.unwrap();
            let seen = tx.get_account_for_update(account.id).await.unwrap();
            tx.commit().await.unwrap();
            seen.balance
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        holder.commit().await.unwrap();
        assert_eq!(waiter.await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_missing_account_for_update() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.get_account_for_update(42).await.unwrap_err(),
            LedgerError::account_not_found(42)
        );
        assert_eq!(
            tx.add_account_balance(42, 1).await.unwrap_err(),
            LedgerError::account_not_found(42)
        );
    }

    #[tokio::test]
    async fn test_history_references_require_existing_accounts() {
        let store = MemoryStore::new();
        let account = seed(&store, "frank", 0).await;
        let mut tx = store.begin().await.unwrap();

        assert!(matches!(
            tx.create_entry(999, 5).await.unwrap_err(),
            LedgerError::ForeignKeyViolation(_)
        ));
        assert!(matches!(
            tx.create_transfer(account.id, 999, 5).await.unwrap_err(),
            LedgerError::ForeignKeyViolation(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_forbidden_with_history() {
        let store = MemoryStore::new();
        let with_history = seed(&store, "gina", 0).await;
        let without_history = seed(&store, "gina", 0).await;

        let mut tx = store.begin().await.unwrap();
        tx.create_entry(with_history.id, 10).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.delete_account(with_history.id).await.unwrap_err(),
            LedgerError::ForeignKeyViolation(_)
        ));
        tx.delete_account(without_history.id).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let remaining = tx.list_accounts("gina", Page::default()).await.unwrap();
        assert_eq!(remaining, vec![with_history]);
    }

    #[tokio::test]
    async fn test_listings_are_ordered_and_paged() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for _ in 0..7 {
            ids.push(seed(&store, "hank", 0).await.id);
        }
        seed(&store, "someone-else", 0).await;

        let mut tx = store.begin().await.unwrap();
        let first = tx.list_accounts("hank", Page::new(4, 0).unwrap()).await.unwrap();
        let second = tx.list_accounts("hank", Page::new(4, 4).unwrap()).await.unwrap();

        let listed: Vec<AccountId> = first.iter().chain(second.iter()).map(|a| a.id).collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn test_ids_are_not_reused_after_rollback() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let discarded = tx.create_account(params("ivy", 0)).await.unwrap();
        tx.rollback().await.unwrap();

        let kept = seed(&store, "ivy", 0).await;
        assert!(kept.id > discarded.id);
    }
}

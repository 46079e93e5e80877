//! Append-only audit entries
//!
//! Entries are only ever written inside a transaction that also moves the
//! balance they describe. There is no update or delete.

use std::sync::Arc;

use tracing::trace;

use crate::store::{exec_tx, LedgerStore, LedgerTx};
use crate::types::{AccountId, Entry, EntryId, LedgerError, LedgerResult, Page};

#[derive(Debug, Clone)]
pub struct EntryRecorder {
    store: Arc<dyn LedgerStore>,
}

impl EntryRecorder {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Record a signed balance change on `account_id` inside the caller's transaction
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` if `amount` is zero
    /// * `ForeignKeyViolation` if the account does not exist
    pub async fn create_entry(
        &self,
        tx: &mut dyn LedgerTx,
        account_id: AccountId,
        amount: i64,
    ) -> LedgerResult<Entry> {
        if amount == 0 {
            return Err(LedgerError::invalid_argument("entry amount must not be zero"));
        }
        let entry = tx.create_entry(account_id, amount).await?;
        trace!(entry_id = entry.id, account_id, amount, "entry recorded");
        Ok(entry)
    }

    pub async fn get_entry(&self, id: EntryId) -> LedgerResult<Entry> {
        exec_tx(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.get_entry(id).await })
        })
        .await
    }

    /// Entries in ascending id order, optionally for one account only
    pub async fn list_entries(
        &self,
        account_id: Option<AccountId>,
        page: Page,
    ) -> LedgerResult<Vec<Entry>> {
        exec_tx(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.list_entries(account_id, page).await })
        })
        .await
    }
}

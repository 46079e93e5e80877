//! PostgreSQL-backed Ledger Store
//!
//! Uses one sqlx transaction per [`LedgerTx`]. Row locks are real PostgreSQL
//! row locks: `get_account_for_update` issues `SELECT … FOR NO KEY UPDATE` and
//! `add_account_balance` is a plain `UPDATE`, which locks the row as well.
//! Every transaction sets `lock_timeout`, so a lock wait fails instead of
//! blocking forever.
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | LedgerError |
//! |------------|-----------------|-------------|
//! | Database | `40001` serialization_failure | `SerializationConflict` |
//! | Database | `40P01` deadlock_detected | `SerializationConflict` |
//! | Database | `55P03` lock_not_available | `SerializationConflict` |
//! | Database | `23503` foreign_key_violation | `ForeignKeyViolation` |
//! | Database | `22003`, `23514` | `InvalidArgument` |
//! | Database | any other | `Internal` |
//! | PoolTimedOut | n/a | `SerializationConflict` |
//! | Other | n/a | `Internal` |
//!
//! Dropping a [`PgLedgerTx`] drops the sqlx transaction, which rolls back.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{info, instrument};

use super::{LedgerStore, LedgerTx};
use crate::types::{
    Account, AccountId, CreateAccountParams, Entry, EntryId, LedgerError, LedgerResult, Page,
    Transfer, TransferFilter, TransferId,
};

const SCHEMA: &str = include_str!("../../migrations/0001_ledger.sql");

/// Ledger Store on a PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Connect a pool of at most `max_connections` connections
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, lock_timeout))
    }

    /// Create the ledger tables if they do not exist yet
    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        info!("ledger schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // SET LOCAL does not accept bind parameters
        let statement = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        );
        sqlx::query(statement.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        Ok(Box::new(PgLedgerTx { tx }))
    }
}

/// Open transaction on a [`PgLedgerStore`]
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    #[instrument(skip(self, params), fields(owner = %params.owner), err)]
    async fn create_account(&mut self, params: CreateAccountParams) -> LedgerResult<Account> {
        let row = sqlx::query(
            r#"
            INSERT INTO accounts (owner, balance, currency)
            VALUES ($1, $2, $3)
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(&params.owner)
        .bind(params.balance)
        .bind(params.currency.code())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("create_account", e))?;

        account_from_row(&row)
    }

    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_account", e))?;

        match row {
            Some(row) => account_from_row(&row),
            None => Err(LedgerError::account_not_found(id)),
        }
    }

    #[instrument(skip(self), err)]
    async fn get_account_for_update(&mut self, id: AccountId) -> LedgerResult<Account> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            WHERE id = $1
            FOR NO KEY UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_account_for_update", e))?;

        match row {
            Some(row) => account_from_row(&row),
            None => Err(LedgerError::account_not_found(id)),
        }
    }

    async fn list_accounts(&mut self, owner: &str, page: Page) -> LedgerResult<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            WHERE owner = $1
            ORDER BY id
            LIMIT $2
            OFFSET $3
            "#,
        )
        .bind(owner)
        .bind(i64::from(page.limit))
        .bind(offset(page)?)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_accounts", e))?;

        rows.iter().map(account_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn add_account_balance(&mut self, id: AccountId, amount: i64) -> LedgerResult<Account> {
        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance + $2
            WHERE id = $1
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(id)
        .bind(amount)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("add_account_balance", e))?;

        match row {
            Some(row) => account_from_row(&row),
            None => Err(LedgerError::account_not_found(id)),
        }
    }

    async fn delete_account(&mut self, id: AccountId) -> LedgerResult<()> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_account", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::account_not_found(id));
        }
        Ok(())
    }

    async fn create_entry(&mut self, account_id: AccountId, amount: i64) -> LedgerResult<Entry> {
        let row = sqlx::query(
            r#"
            INSERT INTO entries (account_id, amount)
            VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("create_entry", e))?;

        entry_from_row(&row)
    }

    async fn get_entry(&mut self, id: EntryId) -> LedgerResult<Entry> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_entry", e))?;

        match row {
            Some(row) => entry_from_row(&row),
            None => Err(LedgerError::entry_not_found(id)),
        }
    }

    async fn list_entries(
        &mut self,
        account_id: Option<AccountId>,
        page: Page,
    ) -> LedgerResult<Vec<Entry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE ($1::BIGINT IS NULL OR account_id = $1)
            ORDER BY id
            LIMIT $2
            OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(i64::from(page.limit))
        .bind(offset(page)?)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_entries", e))?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> LedgerResult<Transfer> {
        let row = sqlx::query(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(from_account_id)
        .bind(to_account_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("create_transfer", e))?;

        transfer_from_row(&row)
    }

    async fn get_transfer(&mut self, id: TransferId) -> LedgerResult<Transfer> {
        let row = sqlx::query(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_transfer", e))?;

        match row {
            Some(row) => transfer_from_row(&row),
            None => Err(LedgerError::transfer_not_found(id)),
        }
    }

    async fn list_transfers(
        &mut self,
        filter: TransferFilter,
        page: Page,
    ) -> LedgerResult<Vec<Transfer>> {
        let rows = sqlx::query(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE ($1::BIGINT IS NULL OR from_account_id = $1)
              AND ($2::BIGINT IS NULL OR to_account_id = $2)
            ORDER BY id
            LIMIT $3
            OFFSET $4
            "#,
        )
        .bind(filter.from_account_id)
        .bind(filter.to_account_id)
        .bind(i64::from(page.limit))
        .bind(offset(page)?)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_transfers", e))?;

        rows.iter().map(transfer_from_row).collect()
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let PgLedgerTx { tx } = *self;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        let PgLedgerTx { tx } = *self;
        tx.rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback_transaction", e))
    }
}

fn offset(page: Page) -> LedgerResult<i64> {
    i64::try_from(page.offset)
        .map_err(|_| LedgerError::invalid_argument(format!("page offset {} is too large", page.offset)))
}

fn account_from_row(row: &PgRow) -> LedgerResult<Account> {
    let decode = |e| map_sqlx_error("decode_account", e);
    let currency: String = row.try_get("currency").map_err(decode)?;
    Ok(Account {
        id: row.try_get("id").map_err(decode)?,
        owner: row.try_get("owner").map_err(decode)?,
        balance: row.try_get("balance").map_err(decode)?,
        currency: currency.parse().map_err(|_| {
            LedgerError::internal(format!("stored account has unsupported currency '{}'", currency))
        })?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

fn entry_from_row(row: &PgRow) -> LedgerResult<Entry> {
    let decode = |e| map_sqlx_error("decode_entry", e);
    Ok(Entry {
        id: row.try_get("id").map_err(decode)?,
        account_id: row.try_get("account_id").map_err(decode)?,
        amount: row.try_get("amount").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

fn transfer_from_row(row: &PgRow) -> LedgerResult<Transfer> {
    let decode = |e| map_sqlx_error("decode_transfer", e);
    Ok(Transfer {
        id: row.try_get("id").map_err(decode)?,
        from_account_id: row.try_get("from_account_id").map_err(decode)?,
        to_account_id: row.try_get("to_account_id").map_err(decode)?,
        amount: row.try_get("amount").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

/// Map SQLx errors to LedgerError
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") | Some("55P03") => LedgerError::conflict(msg),
                Some("23503") => LedgerError::foreign_key(msg),
                Some("22003") | Some("23514") => LedgerError::invalid_argument(msg),
                _ => LedgerError::internal(msg),
            }
        }
        sqlx::Error::PoolTimedOut => LedgerError::conflict(format!(
            "timed out waiting for a connection in {}",
            operation
        )),
        other => LedgerError::internal(format!("{} failed: {}", operation, other)),
    }
}

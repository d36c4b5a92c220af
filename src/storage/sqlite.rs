use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{Account, AccountId, Transaction, TransactionId, TransactionKind};

use super::{EmailTaken, LedgerOps, LedgerStore, MIGRATION_001_INITIAL, UnitOfWork};

/// SQLite-backed ledger store.
///
/// The pool holds a single connection, so SQLite sees exactly one writer.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database URL (e.g. `sqlite:tally.db?mode=rwc`).
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(database_url).context("Invalid database URL")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let store = Self::connect(database_url).await?;
        store.migrate().await?;
        Ok(store)
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    type Unit = SqliteUnit;
    type Direct = SqliteDirect;

    async fn begin(&self) -> Result<SqliteUnit> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin database transaction")?;
        Ok(SqliteUnit { tx })
    }

    fn direct(&self) -> SqliteDirect {
        SqliteDirect {
            pool: self.pool.clone(),
        }
    }
}

/// Unit of work over a SQLite transaction. Rolled back by sqlx when dropped uncommitted.
pub struct SqliteUnit {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl LedgerOps for SqliteUnit {
    async fn get_account(&mut self, id: AccountId) -> Result<Option<Account>> {
        fetch_account(&mut self.tx, id).await
    }

    async fn get_account_by_email(&mut self, email: &str) -> Result<Option<Account>> {
        fetch_account_by_email(&mut self.tx, email).await
    }

    async fn save_account(&mut self, account: &Account) -> Result<()> {
        upsert_account(&mut self.tx, account).await
    }

    async fn create_transaction(&mut self, transaction: &mut Transaction) -> Result<()> {
        insert_transaction(&mut self.tx, transaction).await
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        update_transaction_row(&mut self.tx, transaction).await
    }

    async fn delete_transaction(&mut self, id: TransactionId) -> Result<()> {
        delete_transaction_row(&mut self.tx, id).await
    }

    async fn find_transaction(
        &mut self,
        id: TransactionId,
        account_id: AccountId,
    ) -> Result<Option<Transaction>> {
        fetch_transaction(&mut self.tx, id, account_id).await
    }

    async fn list_transactions(&mut self, account_id: AccountId) -> Result<Vec<Transaction>> {
        fetch_transactions(&mut self.tx, account_id).await
    }
}

#[async_trait]
impl UnitOfWork for SqliteUnit {
    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("Failed to commit database transaction")
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back database transaction")
    }
}

/// Autocommit session: each call checks out a pooled connection and returns it.
pub struct SqliteDirect {
    pool: SqlitePool,
}

impl SqliteDirect {
    async fn conn(&self) -> Result<sqlx::pool::PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .context("Failed to acquire database connection")
    }
}

#[async_trait]
impl LedgerOps for SqliteDirect {
    async fn get_account(&mut self, id: AccountId) -> Result<Option<Account>> {
        let mut conn = self.conn().await?;
        fetch_account(&mut conn, id).await
    }

    async fn get_account_by_email(&mut self, email: &str) -> Result<Option<Account>> {
        let mut conn = self.conn().await?;
        fetch_account_by_email(&mut conn, email).await
    }

    async fn save_account(&mut self, account: &Account) -> Result<()> {
        let mut conn = self.conn().await?;
        upsert_account(&mut conn, account).await
    }

    async fn create_transaction(&mut self, transaction: &mut Transaction) -> Result<()> {
        let mut conn = self.conn().await?;
        insert_transaction(&mut conn, transaction).await
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        let mut conn = self.conn().await?;
        update_transaction_row(&mut conn, transaction).await
    }

    async fn delete_transaction(&mut self, id: TransactionId) -> Result<()> {
        let mut conn = self.conn().await?;
        delete_transaction_row(&mut conn, id).await
    }

    async fn find_transaction(
        &mut self,
        id: TransactionId,
        account_id: AccountId,
    ) -> Result<Option<Transaction>> {
        let mut conn = self.conn().await?;
        fetch_transaction(&mut conn, id, account_id).await
    }

    async fn list_transactions(&mut self, account_id: AccountId) -> Result<Vec<Transaction>> {
        let mut conn = self.conn().await?;
        fetch_transactions(&mut conn, account_id).await
    }
}

// ========================
// Account queries
// ========================

async fn fetch_account(conn: &mut SqliteConnection, id: AccountId) -> Result<Option<Account>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, email, balance, opening_balance, created_at, updated_at
        FROM accounts
        WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to fetch account")?;

    row.as_ref().map(row_to_account).transpose()
}

async fn fetch_account_by_email(
    conn: &mut SqliteConnection,
    email: &str,
) -> Result<Option<Account>> {
    let row = sqlx::query(
        r#"
        SELECT id, name, email, balance, opening_balance, created_at, updated_at
        FROM accounts
        WHERE email = ?
        "#,
    )
    .bind(email)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to fetch account by email")?;

    row.as_ref().map(row_to_account).transpose()
}

async fn upsert_account(conn: &mut SqliteConnection, account: &Account) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO accounts (id, name, email, balance, opening_balance, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            email = excluded.email,
            balance = excluded.balance,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(account.id.to_string())
    .bind(&account.name)
    .bind(&account.email)
    .bind(account.balance)
    .bind(account.opening_balance)
    .bind(timestamp(account.created_at))
    .bind(timestamp(account.updated_at))
    .execute(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            anyhow::Error::new(EmailTaken(account.email.clone()))
        }
        other => anyhow::Error::new(other).context("Failed to save account"),
    })?;
    Ok(())
}

fn row_to_account(row: &SqliteRow) -> Result<Account> {
    let id_str: String = row.get("id");
    let created_at_str: String = row.get("created_at");
    let updated_at_str: String = row.get("updated_at");

    Ok(Account {
        id: Uuid::parse_str(&id_str).context("Invalid account ID")?,
        name: row.get("name"),
        email: row.get("email"),
        balance: row.get("balance"),
        opening_balance: row.get("opening_balance"),
        created_at: parse_timestamp(&created_at_str).context("Invalid created_at timestamp")?,
        updated_at: parse_timestamp(&updated_at_str).context("Invalid updated_at timestamp")?,
    })
}

// ========================
// Transaction queries
// ========================

/// Get the next sequence number and increment the counter.
async fn next_sequence(conn: &mut SqliteConnection) -> Result<i64> {
    let row = sqlx::query(
        r#"
        UPDATE sequence_counter
        SET value = value + 1
        WHERE name = 'transaction_sequence'
        RETURNING value
        "#,
    )
    .fetch_one(&mut *conn)
    .await
    .context("Failed to get next sequence number")?;

    Ok(row.get("value"))
}

async fn insert_transaction(
    conn: &mut SqliteConnection,
    transaction: &mut Transaction,
) -> Result<()> {
    transaction.sequence = next_sequence(conn).await?;

    sqlx::query(
        r#"
        INSERT INTO transactions (id, sequence, account_id, amount, kind, description, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(transaction.id.to_string())
    .bind(transaction.sequence)
    .bind(transaction.account_id.to_string())
    .bind(transaction.amount)
    .bind(transaction.kind.as_str())
    .bind(&transaction.description)
    .bind(timestamp(transaction.created_at))
    .bind(timestamp(transaction.updated_at))
    .execute(&mut *conn)
    .await
    .context("Failed to save transaction")?;

    Ok(())
}

async fn update_transaction_row(
    conn: &mut SqliteConnection,
    transaction: &Transaction,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE transactions
        SET amount = ?, kind = ?, description = ?, updated_at = ?
        WHERE id = ? AND account_id = ?
        "#,
    )
    .bind(transaction.amount)
    .bind(transaction.kind.as_str())
    .bind(&transaction.description)
    .bind(timestamp(transaction.updated_at))
    .bind(transaction.id.to_string())
    .bind(transaction.account_id.to_string())
    .execute(&mut *conn)
    .await
    .context("Failed to update transaction")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("Transaction {} no longer exists", transaction.id);
    }
    Ok(())
}

async fn delete_transaction_row(conn: &mut SqliteConnection, id: TransactionId) -> Result<()> {
    let result = sqlx::query("DELETE FROM transactions WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await
        .context("Failed to delete transaction")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("Transaction {} no longer exists", id);
    }
    Ok(())
}

async fn fetch_transaction(
    conn: &mut SqliteConnection,
    id: TransactionId,
    account_id: AccountId,
) -> Result<Option<Transaction>> {
    let row = sqlx::query(
        r#"
        SELECT id, sequence, account_id, amount, kind, description, created_at, updated_at
        FROM transactions
        WHERE id = ? AND account_id = ?
        "#,
    )
    .bind(id.to_string())
    .bind(account_id.to_string())
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to fetch transaction")?;

    row.as_ref().map(row_to_transaction).transpose()
}

async fn fetch_transactions(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> Result<Vec<Transaction>> {
    let rows = sqlx::query(
        r#"
        SELECT id, sequence, account_id, amount, kind, description, created_at, updated_at
        FROM transactions
        WHERE account_id = ?
        ORDER BY created_at DESC, sequence DESC
        "#,
    )
    .bind(account_id.to_string())
    .fetch_all(&mut *conn)
    .await
    .context("Failed to list transactions")?;

    rows.iter().map(row_to_transaction).collect()
}

fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
    let id_str: String = row.get("id");
    let account_id_str: String = row.get("account_id");
    let kind_str: String = row.get("kind");
    let created_at_str: String = row.get("created_at");
    let updated_at_str: String = row.get("updated_at");

    Ok(Transaction {
        id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
        sequence: row.get("sequence"),
        account_id: Uuid::parse_str(&account_id_str).context("Invalid account ID")?,
        amount: row.get("amount"),
        kind: TransactionKind::from_str(&kind_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind_str))?,
        description: row.get("description"),
        created_at: parse_timestamp(&created_at_str).context("Invalid created_at timestamp")?,
        updated_at: parse_timestamp(&updated_at_str).context("Invalid updated_at timestamp")?,
    })
}

// Fixed-width so that lexical order in SQL matches chronological order.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

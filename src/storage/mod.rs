//! Persistence for accounts and their transaction logs.
//!
//! The engine talks to storage through three traits:
//! - [`LedgerOps`]: reads and writes within one session
//! - [`UnitOfWork`]: a session whose writes land together on `commit` or not at all
//! - [`LedgerStore`]: hands out units of work and autocommit sessions

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Account, AccountId, Transaction, TransactionId};

mod memory;
mod sqlite;

pub use memory::*;
pub use sqlite::*;

/// Another account already uses this email. Returned inside the `anyhow`
/// error of `save_account` or `commit` so callers can `downcast_ref` it.
#[derive(Debug, thiserror::Error)]
#[error("Email already registered: {0}")]
pub struct EmailTaken(pub String);

/// SQL migration for initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// Reads and writes available inside a storage session.
#[async_trait]
pub trait LedgerOps: Send {
    async fn get_account(&mut self, id: AccountId) -> Result<Option<Account>>;

    async fn get_account_by_email(&mut self, email: &str) -> Result<Option<Account>>;

    /// Insert or update an account row.
    async fn save_account(&mut self, account: &Account) -> Result<()>;

    /// Insert a new transaction row, assigning its sequence number.
    async fn create_transaction(&mut self, transaction: &mut Transaction) -> Result<()>;

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()>;

    /// Permanently remove a transaction row.
    async fn delete_transaction(&mut self, id: TransactionId) -> Result<()>;

    /// Find a transaction only if it belongs to `account_id`.
    async fn find_transaction(
        &mut self,
        id: TransactionId,
        account_id: AccountId,
    ) -> Result<Option<Transaction>>;

    /// All transactions of an account, newest first.
    async fn list_transactions(&mut self, account_id: AccountId) -> Result<Vec<Transaction>>;
}

/// A group of writes that all land on `commit` or are all discarded.
///
/// Dropping a unit without committing discards its writes.
#[async_trait]
pub trait UnitOfWork: LedgerOps {
    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Unit: UnitOfWork;
    type Direct: LedgerOps;

    /// Start an atomic unit of work.
    async fn begin(&self) -> Result<Self::Unit>;

    /// Autocommit session: every write is durable as soon as it returns.
    fn direct(&self) -> Self::Direct;
}

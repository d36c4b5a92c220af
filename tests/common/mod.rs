// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use tally::application::{
    Caller, LedgerService, NewTransaction, TransactionReceipt, TransactionUpdate, WriteMode,
};
use tally::domain::{Cents, TransactionKind};
use tally::storage::{LedgerStore, MemoryStore, SqliteStore};
use tempfile::TempDir;

/// Helper to create a service over a fresh in-memory store
pub fn memory_service() -> LedgerService<MemoryStore> {
    LedgerService::in_memory()
}

/// Helper to create a test service with a temporary database
pub async fn sqlite_service() -> Result<(LedgerService<SqliteStore>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Open an account and return the caller identity for it
pub async fn open<S: LedgerStore>(
    service: &LedgerService<S>,
    email: &str,
    opening_balance: Cents,
) -> Result<Caller> {
    let account = service.open_account("Test User", email, opening_balance).await?;
    Ok(Caller::authenticated(account.id))
}

pub async fn credit<S: LedgerStore>(
    service: &LedgerService<S>,
    caller: &Caller,
    amount: Cents,
) -> Result<TransactionReceipt> {
    record(service, caller, amount, TransactionKind::Credit, WriteMode::Consistent).await
}

pub async fn debit<S: LedgerStore>(
    service: &LedgerService<S>,
    caller: &Caller,
    amount: Cents,
) -> Result<TransactionReceipt> {
    record(service, caller, amount, TransactionKind::Debit, WriteMode::Consistent).await
}

pub async fn record<S: LedgerStore>(
    service: &LedgerService<S>,
    caller: &Caller,
    amount: Cents,
    kind: TransactionKind,
    mode: WriteMode,
) -> Result<TransactionReceipt> {
    let input = NewTransaction {
        amount,
        kind,
        description: format!("{} of {}", kind, amount),
    };
    Ok(service.create_transaction(caller, input, mode).await?)
}

pub fn update(amount: Cents, kind: TransactionKind) -> TransactionUpdate {
    TransactionUpdate {
        amount,
        kind,
        description: format!("amended to {} of {}", kind, amount),
    }
}

pub async fn balance<S: LedgerStore>(service: &LedgerService<S>, caller: &Caller) -> Result<Cents> {
    Ok(service.get_account(caller).await?.balance)
}

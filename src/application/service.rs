use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};

use crate::domain::{
    Account, AccountId, AccountView, BalanceError, Cents, Transaction, TransactionId,
    TransactionKind, TransactionView, apply, compute_balance, replace, revert,
};
use crate::storage::{EmailTaken, LedgerOps, LedgerStore, MemoryStore, SqliteStore, UnitOfWork};

use super::{AppError, Caller, FaultInjection, InconsistencyReport};

/// Ledger engine: keeps each account's stored balance in step with its
/// transaction log. This is the primary interface for any request layer.
pub struct LedgerService<S: LedgerStore = SqliteStore> {
    store: S,
    faults: FaultInjection,
    locks: AccountLocks,
    registration: tokio::sync::Mutex<()>,
}

/// How a new transaction and its balance change reach storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Transaction row and balance are written in one unit of work.
    #[default]
    Consistent,
    /// UNSAFE: the transaction row is written and committed on its own before
    /// the balance is saved. A failure in between leaves the ledger
    /// inconsistent. Exists to demonstrate that failure class.
    Inconsistent,
}

/// Input for a new transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub amount: Cents,
    pub kind: TransactionKind,
    pub description: String,
}

/// Replacement values for an existing transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionUpdate {
    pub amount: Cents,
    pub kind: TransactionKind,
    pub description: String,
}

/// Result of a create or update: the stored row and the account with its new balance.
#[derive(Debug, Clone)]
pub struct TransactionReceipt {
    pub transaction: Transaction,
    pub account: Account,
}

impl TransactionReceipt {
    pub fn balance(&self) -> Cents {
        self.account.balance
    }

    pub fn view(&self) -> TransactionView {
        self.transaction.view(&self.account)
    }
}

/// Result of a hard delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionReceipt {
    pub transaction_id: TransactionId,
    pub balance: Cents,
}

/// Stored balance compared with the fold of the transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub account_id: AccountId,
    pub recorded: Cents,
    pub expected: Cents,
    pub transaction_count: usize,
}

impl Reconciliation {
    /// Recorded minus expected; non-zero after an inconsistent-mode failure.
    pub fn drift(&self) -> Cents {
        self.recorded - self.expected
    }

    pub fn is_consistent(&self) -> bool {
        self.drift() == 0
    }
}

/// Parse a transaction kind coming from an untyped request field.
pub fn parse_kind(input: &str) -> Result<TransactionKind, AppError> {
    TransactionKind::from_str(input).ok_or_else(|| {
        AppError::Validation(format!(
            "Invalid transaction kind '{}': expected credit or debit",
            input
        ))
    })
}

impl LedgerService<SqliteStore> {
    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let store = SqliteStore::init(&db_url).await?;
        Ok(Self::new(store))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let store = SqliteStore::connect(&db_url).await?;
        Ok(Self::new(store))
    }
}

impl LedgerService<MemoryStore> {
    /// Service over a fresh in-process store.
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            faults: FaultInjection::disabled(),
            locks: AccountLocks::default(),
            registration: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_fault_injection(mut self, faults: FaultInjection) -> Self {
        self.faults = faults;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ========================
    // Account operations
    // ========================

    /// Open a new account with a starting balance.
    pub async fn open_account(
        &self,
        name: &str,
        email: &str,
        opening_balance: Cents,
    ) -> Result<Account, AppError> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Name is required".to_string()));
        }
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::Validation(format!("Invalid email '{}'", email)));
        }
        if opening_balance < 0 {
            return Err(AppError::Validation(
                "Opening balance cannot be negative".to_string(),
            ));
        }

        // Email uniqueness is check-then-insert; opens run one at a time
        let _registration = self.registration.lock().await;

        let mut unit = self.store.begin().await?;
        let result: Result<Account, AppError> = async {
            if unit.get_account_by_email(email).await?.is_some() {
                return Err(AppError::AccountAlreadyExists(email.to_string()));
            }
            let account = Account::new(name, email, opening_balance);
            unit.save_account(&account)
                .await
                .map_err(|e| account_write_error(e, email))?;
            Ok(account)
        }
        .await;
        let account = self.finish(unit, result).await.map_err(|err| match err {
            AppError::Persistence(e) => account_write_error(e, email),
            other => other,
        })?;

        info!(account_id = %account.id, opening_balance, "opened account");
        Ok(account)
    }

    /// Get the caller's account.
    pub async fn get_account(&self, caller: &Caller) -> Result<Account, AppError> {
        load_account(&mut self.store.direct(), caller).await
    }

    pub async fn account_view(&self, caller: &Caller) -> Result<AccountView, AppError> {
        Ok(self.get_account(caller).await?.view())
    }

    // ========================
    // Transaction operations
    // ========================

    /// Record a credit or debit and move the caller's balance accordingly.
    pub async fn create_transaction(
        &self,
        caller: &Caller,
        input: NewTransaction,
        mode: WriteMode,
    ) -> Result<TransactionReceipt, AppError> {
        validate_entry(input.amount, &input.description)?;
        let _guard = self.locks.acquire(caller.account_id()).await;

        let receipt = match mode {
            WriteMode::Consistent => {
                let mut unit = self.store.begin().await?;
                let result = self.create_in_unit(&mut unit, caller, input).await;
                self.finish(unit, result).await?
            }
            WriteMode::Inconsistent => self.create_without_unit(caller, input).await?,
        };

        info!(
            account_id = %receipt.account.id,
            transaction_id = %receipt.transaction.id,
            kind = %receipt.transaction.kind,
            amount = receipt.transaction.amount,
            balance = receipt.account.balance,
            ?mode,
            "recorded transaction"
        );
        Ok(receipt)
    }

    async fn create_in_unit(
        &self,
        unit: &mut S::Unit,
        caller: &Caller,
        input: NewTransaction,
    ) -> Result<TransactionReceipt, AppError> {
        let mut account = load_account(&mut *unit, caller).await?;
        let new_balance = apply(account.balance, input.kind, input.amount)
            .map_err(|e| balance_error(account.id, e))?;

        let mut transaction =
            Transaction::new(account.id, input.amount, input.kind, input.description);
        unit.create_transaction(&mut transaction).await?;
        self.faults.check(transaction.amount)?;

        account.set_balance(new_balance);
        unit.save_account(&account).await?;

        Ok(TransactionReceipt {
            transaction,
            account,
        })
    }

    async fn create_without_unit(
        &self,
        caller: &Caller,
        input: NewTransaction,
    ) -> Result<TransactionReceipt, AppError> {
        let mut direct = self.store.direct();
        let mut account = load_account(&mut direct, caller).await?;
        let original_balance = account.balance;
        let new_balance = apply(account.balance, input.kind, input.amount)
            .map_err(|e| balance_error(account.id, e))?;

        let mut transaction =
            Transaction::new(account.id, input.amount, input.kind, input.description);
        // Durable from here on, whatever happens to the balance
        direct.create_transaction(&mut transaction).await?;

        let balance_write = match self.faults.check(transaction.amount) {
            Ok(()) => {
                account.set_balance(new_balance);
                direct.save_account(&account).await
            }
            Err(e) => Err(e),
        };

        if let Err(cause) = balance_write {
            let report = InconsistencyReport {
                transaction_id: transaction.id,
                original_balance,
                attempted_balance: new_balance,
                cause: format!("{:#}", cause),
            };
            warn!(
                account_id = %account.id,
                transaction_id = %report.transaction_id,
                original_balance = report.original_balance,
                attempted_balance = report.attempted_balance,
                cause = %report.cause,
                "transaction recorded but balance update failed; ledger is inconsistent"
            );
            return Err(AppError::Inconsistent(report));
        }

        Ok(TransactionReceipt {
            transaction,
            account,
        })
    }

    /// Replace the amount, kind and description of one of the caller's transactions.
    pub async fn update_transaction(
        &self,
        caller: &Caller,
        id: TransactionId,
        update: TransactionUpdate,
    ) -> Result<TransactionReceipt, AppError> {
        validate_entry(update.amount, &update.description)?;
        let _guard = self.locks.acquire(caller.account_id()).await;

        let mut unit = self.store.begin().await?;
        let result: Result<TransactionReceipt, AppError> = async {
            let mut transaction = find_owned(&mut unit, caller, id).await?;
            let mut account = load_account(&mut unit, caller).await?;
            let new_balance = replace(account.balance, &transaction, update.kind, update.amount)
                .map_err(|e| balance_error(account.id, e))?;

            transaction.amend(update.amount, update.kind, update.description);
            unit.update_transaction(&transaction).await?;
            account.set_balance(new_balance);
            unit.save_account(&account).await?;

            Ok(TransactionReceipt {
                transaction,
                account,
            })
        }
        .await;
        let receipt = self.finish(unit, result).await?;

        info!(
            account_id = %receipt.account.id,
            transaction_id = %id,
            balance = receipt.account.balance,
            "updated transaction"
        );
        Ok(receipt)
    }

    /// Permanently remove one of the caller's transactions and undo its effect.
    pub async fn delete_transaction(
        &self,
        caller: &Caller,
        id: TransactionId,
    ) -> Result<DeletionReceipt, AppError> {
        let _guard = self.locks.acquire(caller.account_id()).await;

        let mut unit = self.store.begin().await?;
        let result: Result<DeletionReceipt, AppError> = async {
            let transaction = find_owned(&mut unit, caller, id).await?;
            let mut account = load_account(&mut unit, caller).await?;
            let reverted = revert(account.balance, transaction.kind, transaction.amount)
                .map_err(|e| balance_error(account.id, e))?;

            account.set_balance(reverted);
            unit.save_account(&account).await?;
            unit.delete_transaction(transaction.id).await?;

            Ok(DeletionReceipt {
                transaction_id: transaction.id,
                balance: account.balance,
            })
        }
        .await;
        let receipt = self.finish(unit, result).await?;

        info!(
            account_id = %caller.account_id(),
            transaction_id = %id,
            balance = receipt.balance,
            "deleted transaction"
        );
        Ok(receipt)
    }

    /// The caller's transactions, newest first.
    pub async fn list_transactions(
        &self,
        caller: &Caller,
    ) -> Result<Vec<TransactionView>, AppError> {
        let mut direct = self.store.direct();
        let account = load_account(&mut direct, caller).await?;
        let transactions = direct.list_transactions(account.id).await?;
        Ok(transactions.iter().map(|t| t.view(&account)).collect())
    }

    /// One of the caller's transactions.
    pub async fn get_transaction(
        &self,
        caller: &Caller,
        id: TransactionId,
    ) -> Result<TransactionView, AppError> {
        let mut direct = self.store.direct();
        let transaction = find_owned(&mut direct, caller, id).await?;
        let account = load_account(&mut direct, caller).await?;
        Ok(transaction.view(&account))
    }

    // ========================
    // Integrity operations
    // ========================

    /// Compare the caller's stored balance with the fold of its transactions.
    /// Reports drift; never repairs it.
    pub async fn reconcile(&self, caller: &Caller) -> Result<Reconciliation, AppError> {
        let _guard = self.locks.acquire(caller.account_id()).await;

        let mut direct = self.store.direct();
        let account = load_account(&mut direct, caller).await?;
        let transactions = direct.list_transactions(account.id).await?;
        let expected = compute_balance(account.opening_balance, &transactions).map_err(|_| {
            anyhow::anyhow!(
                "Transaction log of account {} sums outside the balance range",
                account.id
            )
        })?;

        let report = Reconciliation {
            account_id: account.id,
            recorded: account.balance,
            expected,
            transaction_count: transactions.len(),
        };
        if !report.is_consistent() {
            warn!(
                account_id = %account.id,
                recorded = report.recorded,
                expected = report.expected,
                "stored balance does not match transaction log"
            );
        }
        Ok(report)
    }

    /// Commit on success, roll back on any error. The unit is consumed either way.
    async fn finish<T>(&self, unit: S::Unit, result: Result<T, AppError>) -> Result<T, AppError> {
        match result {
            Ok(value) => {
                unit.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = unit.rollback().await {
                    error!(error = ?rollback_err, "rollback failed");
                }
                if err.is_rejection() {
                    warn!(error = %err, "operation rejected");
                } else {
                    error!(error = %err, "unit of work rolled back");
                }
                Err(err)
            }
        }
    }
}

fn validate_entry(amount: Cents, description: &str) -> Result<(), AppError> {
    if amount <= 0 {
        return Err(AppError::Validation("Amount must be positive".to_string()));
    }
    if description.trim().is_empty() {
        return Err(AppError::Validation("Description is required".to_string()));
    }
    Ok(())
}

fn account_write_error(err: anyhow::Error, email: &str) -> AppError {
    if err.is::<EmailTaken>() {
        AppError::AccountAlreadyExists(email.to_string())
    } else {
        AppError::Persistence(err)
    }
}

fn balance_error(account_id: AccountId, err: BalanceError) -> AppError {
    match err {
        BalanceError::Insufficient { balance, required } => AppError::InsufficientFunds {
            account_id,
            balance,
            required,
        },
        BalanceError::Overflow => {
            AppError::Validation("Amount would overflow the account balance".to_string())
        }
    }
}

async fn load_account<O: LedgerOps>(ops: &mut O, caller: &Caller) -> Result<Account, AppError> {
    ops.get_account(caller.account_id())
        .await?
        .ok_or(AppError::AccountNotFound(caller.account_id()))
}

async fn find_owned<O: LedgerOps>(
    ops: &mut O,
    caller: &Caller,
    id: TransactionId,
) -> Result<Transaction, AppError> {
    ops.find_transaction(id, caller.account_id())
        .await?
        .ok_or(AppError::TransactionNotFound(id))
}

/// One async mutex per account so that writes to the same account never interleave.
///
/// Entries nobody holds or waits on are pruned on the next acquire, so the
/// table only grows with the number of accounts in use at the same time.
#[derive(Default)]
struct AccountLocks {
    locks: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
}

impl AccountLocks {
    async fn acquire(&self, account_id: AccountId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Only the table holds an idle entry; holders and waiters own a clone
            locks.retain(|id, lock| *id == account_id || Arc::strong_count(lock) > 1);
            locks.entry(account_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn test_idle_account_locks_are_pruned() {
        let locks = AccountLocks::default();
        for _ in 0..50 {
            let guard = locks.acquire(Uuid::new_v4()).await;
            drop(guard);
        }
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_held_account_lock_survives_pruning() {
        let locks = AccountLocks::default();
        let held = Uuid::new_v4();
        let guard = locks.acquire(held).await;

        let _other = locks.acquire(Uuid::new_v4()).await;
        assert_eq!(locks.len(), 2);

        // Same account still maps to the held mutex
        let entry = locks
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&held)
            .cloned()
            .expect("held lock stays in the table");
        assert!(entry.try_lock().is_err());
        drop(guard);
    }
}

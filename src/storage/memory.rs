use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::domain::{Account, AccountId, Transaction, TransactionId};

use super::{EmailTaken, LedgerOps, LedgerStore, UnitOfWork};

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<AccountId, Account>,
    transactions: HashMap<TransactionId, Transaction>,
    last_sequence: i64,
}

/// In-process ledger store for tests and demos.
///
/// Cloning shares the underlying state. Units of work stage their writes and
/// apply them under the store lock on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_account_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent account write fail with a storage error.
    pub fn fail_account_writes(&self, fail: bool) {
        self.fail_account_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of transaction rows currently committed, across all accounts.
    pub fn transaction_count(&self) -> Result<usize> {
        Ok(self.lock()?.transactions.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("Memory store lock poisoned"))
    }

    fn check_account_write(&self) -> Result<()> {
        if self.fail_account_writes.load(Ordering::SeqCst) {
            anyhow::bail!("Failed to save account: storage unavailable");
        }
        Ok(())
    }

    fn next_sequence(&self) -> Result<i64> {
        let mut state = self.lock()?;
        state.last_sequence += 1;
        Ok(state.last_sequence)
    }

    fn committed_account(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.lock()?.accounts.get(&id).cloned())
    }

    fn committed_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(self
            .lock()?
            .accounts
            .values()
            .find(|a| a.email == email)
            .cloned())
    }

    fn committed_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.lock()?.transactions.get(&id).cloned())
    }

    fn committed_transactions(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        Ok(self
            .lock()?
            .transactions
            .values()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Unit = MemoryUnit;
    type Direct = MemoryDirect;

    async fn begin(&self) -> Result<MemoryUnit> {
        Ok(MemoryUnit {
            store: self.clone(),
            accounts: HashMap::new(),
            transactions: HashMap::new(),
        })
    }

    fn direct(&self) -> MemoryDirect {
        MemoryDirect {
            store: self.clone(),
        }
    }
}

fn ensure_email_free(state: &MemoryState, account: &Account) -> Result<()> {
    let taken = state
        .accounts
        .values()
        .any(|a| a.email == account.email && a.id != account.id);
    if taken {
        return Err(EmailTaken(account.email.clone()).into());
    }
    Ok(())
}

fn newest_first(mut transactions: Vec<Transaction>) -> Vec<Transaction> {
    transactions.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then(b.sequence.cmp(&a.sequence))
    });
    transactions
}

/// Staged writes. `None` in `transactions` marks a deletion.
#[derive(Debug)]
pub struct MemoryUnit {
    store: MemoryStore,
    accounts: HashMap<AccountId, Account>,
    transactions: HashMap<TransactionId, Option<Transaction>>,
}

impl MemoryUnit {
    fn visible_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        match self.transactions.get(&id) {
            Some(staged) => Ok(staged.clone()),
            None => self.store.committed_transaction(id),
        }
    }
}

#[async_trait]
impl LedgerOps for MemoryUnit {
    async fn get_account(&mut self, id: AccountId) -> Result<Option<Account>> {
        match self.accounts.get(&id) {
            Some(account) => Ok(Some(account.clone())),
            None => self.store.committed_account(id),
        }
    }

    async fn get_account_by_email(&mut self, email: &str) -> Result<Option<Account>> {
        if let Some(account) = self.accounts.values().find(|a| a.email == email) {
            return Ok(Some(account.clone()));
        }
        self.store.committed_account_by_email(email)
    }

    async fn save_account(&mut self, account: &Account) -> Result<()> {
        self.store.check_account_write()?;
        self.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn create_transaction(&mut self, transaction: &mut Transaction) -> Result<()> {
        transaction.sequence = self.store.next_sequence()?;
        self.transactions
            .insert(transaction.id, Some(transaction.clone()));
        Ok(())
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        match self.visible_transaction(transaction.id)? {
            Some(existing) if existing.account_id == transaction.account_id => {
                self.transactions
                    .insert(transaction.id, Some(transaction.clone()));
                Ok(())
            }
            _ => anyhow::bail!("Transaction {} no longer exists", transaction.id),
        }
    }

    async fn delete_transaction(&mut self, id: TransactionId) -> Result<()> {
        if self.visible_transaction(id)?.is_none() {
            anyhow::bail!("Transaction {} no longer exists", id);
        }
        self.transactions.insert(id, None);
        Ok(())
    }

    async fn find_transaction(
        &mut self,
        id: TransactionId,
        account_id: AccountId,
    ) -> Result<Option<Transaction>> {
        Ok(self
            .visible_transaction(id)?
            .filter(|t| t.account_id == account_id))
    }

    async fn list_transactions(&mut self, account_id: AccountId) -> Result<Vec<Transaction>> {
        let mut visible: Vec<Transaction> = self
            .store
            .committed_transactions(account_id)?
            .into_iter()
            .filter(|t| !self.transactions.contains_key(&t.id))
            .collect();
        visible.extend(
            self.transactions
                .values()
                .flatten()
                .filter(|t| t.account_id == account_id)
                .cloned(),
        );
        Ok(newest_first(visible))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn commit(self) -> Result<()> {
        let mut state = self.store.lock()?;
        for account in self.accounts.values() {
            ensure_email_free(&state, account)?;
        }
        state.accounts.extend(self.accounts);
        for (id, staged) in self.transactions {
            match staged {
                Some(transaction) => {
                    state.transactions.insert(id, transaction);
                }
                None => {
                    state.transactions.remove(&id);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

/// Autocommit session over the shared state.
#[derive(Debug)]
pub struct MemoryDirect {
    store: MemoryStore,
}

#[async_trait]
impl LedgerOps for MemoryDirect {
    async fn get_account(&mut self, id: AccountId) -> Result<Option<Account>> {
        self.store.committed_account(id)
    }

    async fn get_account_by_email(&mut self, email: &str) -> Result<Option<Account>> {
        self.store.committed_account_by_email(email)
    }

    async fn save_account(&mut self, account: &Account) -> Result<()> {
        self.store.check_account_write()?;
        let mut state = self.store.lock()?;
        ensure_email_free(&state, account)?;
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn create_transaction(&mut self, transaction: &mut Transaction) -> Result<()> {
        transaction.sequence = self.store.next_sequence()?;
        self.store
            .lock()?
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        let mut state = self.store.lock()?;
        match state.transactions.get_mut(&transaction.id) {
            Some(existing) if existing.account_id == transaction.account_id => {
                *existing = transaction.clone();
                Ok(())
            }
            _ => anyhow::bail!("Transaction {} no longer exists", transaction.id),
        }
    }

    async fn delete_transaction(&mut self, id: TransactionId) -> Result<()> {
        if self.store.lock()?.transactions.remove(&id).is_none() {
            anyhow::bail!("Transaction {} no longer exists", id);
        }
        Ok(())
    }

    async fn find_transaction(
        &mut self,
        id: TransactionId,
        account_id: AccountId,
    ) -> Result<Option<Transaction>> {
        Ok(self
            .store
            .committed_transaction(id)?
            .filter(|t| t.account_id == account_id))
    }

    async fn list_transactions(&mut self, account_id: AccountId) -> Result<Vec<Transaction>> {
        Ok(newest_first(self.store.committed_transactions(account_id)?))
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::domain::TransactionKind;

    #[tokio::test]
    async fn test_uncommitted_unit_is_invisible() -> Result<()> {
        let store = MemoryStore::new();
        let account = Account::new("Alice", "alice@example.com", 100);

        let mut unit = store.begin().await?;
        unit.save_account(&account).await?;
        assert!(unit.get_account(account.id).await?.is_some());
        assert!(store.direct().get_account(account.id).await?.is_none());

        drop(unit);
        assert!(store.direct().get_account(account.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_applies_staged_writes() -> Result<()> {
        let store = MemoryStore::new();
        let account = Account::new("Alice", "alice@example.com", 100);
        let mut tx = Transaction::new(account.id, 50, TransactionKind::Credit, "tip");

        let mut unit = store.begin().await?;
        unit.save_account(&account).await?;
        unit.create_transaction(&mut tx).await?;
        unit.commit().await?;

        let mut direct = store.direct();
        assert_eq!(direct.get_account(account.id).await?, Some(account.clone()));
        assert_eq!(direct.find_transaction(tx.id, account.id).await?, Some(tx));
        Ok(())
    }

    #[tokio::test]
    async fn test_staged_delete_hides_row_until_commit() -> Result<()> {
        let store = MemoryStore::new();
        let account = Account::new("Alice", "alice@example.com", 100);
        let mut tx = Transaction::new(account.id, 50, TransactionKind::Credit, "tip");
        let mut direct = store.direct();
        direct.save_account(&account).await?;
        direct.create_transaction(&mut tx).await?;

        let mut unit = store.begin().await?;
        unit.delete_transaction(tx.id).await?;
        assert!(unit.find_transaction(tx.id, account.id).await?.is_none());
        assert!(unit.list_transactions(account.id).await?.is_empty());
        assert_eq!(direct.list_transactions(account.id).await?.len(), 1);

        unit.commit().await?;
        assert!(direct.list_transactions(account.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_find_transaction_is_scoped_to_owner() -> Result<()> {
        let store = MemoryStore::new();
        let mut tx = Transaction::new(Uuid::new_v4(), 50, TransactionKind::Credit, "tip");
        store.direct().create_transaction(&mut tx).await?;

        let stranger = Uuid::new_v4();
        assert!(store.direct().find_transaction(tx.id, stranger).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_is_newest_first() -> Result<()> {
        let store = MemoryStore::new();
        let account_id = Uuid::new_v4();
        let mut direct = store.direct();

        let mut ids = Vec::new();
        for amount in [100, 200, 300] {
            let mut tx = Transaction::new(account_id, amount, TransactionKind::Credit, "x");
            direct.create_transaction(&mut tx).await?;
            ids.push(tx.id);
        }

        let listed: Vec<_> = direct
            .list_transactions(account_id)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();
        ids.reverse();
        assert_eq!(listed, ids);
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_rejects_email_taken_meanwhile() -> Result<()> {
        let store = MemoryStore::new();
        let first = Account::new("Alice", "same@example.com", 0);
        let second = Account::new("Alice Again", "same@example.com", 0);

        let mut a = store.begin().await?;
        let mut b = store.begin().await?;
        a.save_account(&first).await?;
        b.save_account(&second).await?;
        a.commit().await?;

        let err = b.commit().await.unwrap_err();
        assert!(err.is::<EmailTaken>());
        assert!(store.direct().get_account(second.id).await?.is_none());
        assert_eq!(
            store.direct().get_account_by_email("same@example.com").await?,
            Some(first)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_account_writes() {
        let store = MemoryStore::new();
        store.fail_account_writes(true);
        let account = Account::new("Alice", "alice@example.com", 100);

        assert!(store.direct().save_account(&account).await.is_err());
        let mut unit = store.begin().await.unwrap();
        assert!(unit.save_account(&account).await.is_err());
    }
}

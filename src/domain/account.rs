use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type AccountId = Uuid;

/// An account holding a stored balance.
///
/// The balance is a cached value: in consistent mode it always equals
/// `opening_balance` plus the net effect of every committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub email: String,
    /// Current stored balance in cents (may go negative after a reverted credit)
    pub balance: Cents,
    /// Balance the account was opened with, before any transaction
    pub opening_balance: Cents,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(name: impl Into<String>, email: impl Into<String>, opening_balance: Cents) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            balance: opening_balance,
            opening_balance,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set a new balance and bump `updated_at`.
    pub fn set_balance(&mut self, balance: Cents) {
        self.balance = balance;
        self.updated_at = Utc::now();
    }

    pub fn view(&self) -> AccountView {
        AccountView {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            balance: self.balance,
            created_at: self.created_at,
        }
    }
}

/// Minimal account shape returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub id: AccountId,
    pub name: String,
    pub email: String,
    pub balance: Cents,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_starts_at_opening_balance() {
        let account = Account::new("Alice", "alice@example.com", 10_000);
        assert_eq!(account.balance, 10_000);
        assert_eq!(account.opening_balance, 10_000);
        assert_eq!(account.created_at, account.updated_at);
    }

    #[test]
    fn test_set_balance_keeps_opening_balance() {
        let mut account = Account::new("Alice", "alice@example.com", 10_000);
        account.set_balance(7_000);
        assert_eq!(account.balance, 7_000);
        assert_eq!(account.opening_balance, 10_000);
        assert!(account.updated_at >= account.created_at);
    }

    #[test]
    fn test_view_omits_internal_fields() {
        let account = Account::new("Alice", "alice@example.com", 500);
        let json = serde_json::to_value(account.view()).unwrap();
        let obj = json.as_object().unwrap();

        assert_eq!(obj.len(), 5);
        assert!(obj.contains_key("balance"));
        assert!(!obj.contains_key("opening_balance"));
        assert!(!obj.contains_key("updated_at"));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Account, AccountId, AccountView, Cents};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Money coming into the account (balance increases)
    Credit,
    /// Money leaving the account (balance decreases)
    Debit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Credit => "credit",
            TransactionKind::Debit => "debit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "credit" => Some(TransactionKind::Credit),
            "debit" => Some(TransactionKind::Debit),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single balance-affecting entry in an account's transaction log.
///
/// Unlike an append-only journal, rows here can be amended or hard-deleted;
/// the engine keeps the account balance in step with every such change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Monotonically increasing insertion order, assigned by the store
    pub sequence: i64,
    pub account_id: AccountId,
    /// Amount in cents (always positive; direction comes from `kind`)
    pub amount: Cents,
    pub kind: TransactionKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a new transaction. Sequence number must be assigned by the store.
    pub fn new(
        account_id: AccountId,
        amount: Cents,
        kind: TransactionKind,
        description: impl Into<String>,
    ) -> Self {
        assert!(amount > 0, "Transaction amount must be positive");
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sequence: 0, // Will be set by the store
            account_id,
            amount,
            kind,
            description: description.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Signed effect of this transaction on its account's balance.
    pub fn signed_amount(&self) -> Cents {
        match self.kind {
            TransactionKind::Credit => self.amount,
            TransactionKind::Debit => -self.amount,
        }
    }

    /// Overwrite amount, kind and description in place, bumping `updated_at`.
    pub fn amend(&mut self, amount: Cents, kind: TransactionKind, description: impl Into<String>) {
        assert!(amount > 0, "Transaction amount must be positive");
        self.amount = amount;
        self.kind = kind;
        self.description = description.into();
        self.updated_at = Utc::now();
    }

    /// Response shape with the owning account nested.
    pub fn view(&self, account: &Account) -> TransactionView {
        TransactionView {
            id: self.id,
            amount: self.amount,
            description: self.description.clone(),
            kind: self.kind,
            created_at: self.created_at,
            updated_at: self.updated_at,
            account: account.view(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionView {
    pub id: TransactionId,
    pub amount: Cents,
    pub description: String,
    pub kind: TransactionKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub account: AccountView,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!(TransactionKind::from_str("credit"), Some(TransactionKind::Credit));
        assert_eq!(TransactionKind::from_str(" DEBIT "), Some(TransactionKind::Debit));
        assert_eq!(TransactionKind::from_str("refund"), None);
        assert_eq!(TransactionKind::Debit.to_string(), "debit");
    }

    #[test]
    fn test_signed_amount() {
        let account_id = Uuid::new_v4();
        let credit = Transaction::new(account_id, 1000, TransactionKind::Credit, "salary");
        let debit = Transaction::new(account_id, 250, TransactionKind::Debit, "coffee");

        assert_eq!(credit.signed_amount(), 1000);
        assert_eq!(debit.signed_amount(), -250);
    }

    #[test]
    fn test_amend_keeps_identity() {
        let account_id = Uuid::new_v4();
        let mut tx = Transaction::new(account_id, 3000, TransactionKind::Debit, "groceries");
        let id = tx.id;

        tx.amend(1000, TransactionKind::Credit, "refund");

        assert_eq!(tx.id, id);
        assert_eq!(tx.amount, 1000);
        assert_eq!(tx.kind, TransactionKind::Credit);
        assert_eq!(tx.description, "refund");
        assert!(tx.updated_at >= tx.created_at);
    }

    #[test]
    fn test_view_serializes_kind_lowercase() {
        let account = Account::new("Alice", "alice@example.com", 0);
        let tx = Transaction::new(account.id, 500, TransactionKind::Credit, "gift");

        let json = serde_json::to_value(tx.view(&account)).unwrap();
        assert_eq!(json["kind"], "credit");
        assert_eq!(json["account"]["email"], "alice@example.com");
        assert!(json["account"].get("opening_balance").is_none());
    }

    #[test]
    #[should_panic(expected = "Transaction amount must be positive")]
    fn test_transaction_requires_positive_amount() {
        Transaction::new(Uuid::new_v4(), 0, TransactionKind::Credit, "nothing");
    }
}

use super::{Cents, Transaction, TransactionKind};

/// Apply a transaction's effect to a balance.
/// Credits add; debits require the balance to cover the amount.
pub fn apply(balance: Cents, kind: TransactionKind, amount: Cents) -> Result<Cents, BalanceError> {
    match kind {
        TransactionKind::Credit => balance.checked_add(amount).ok_or(BalanceError::Overflow),
        TransactionKind::Debit => {
            if balance < amount {
                return Err(BalanceError::Insufficient {
                    balance,
                    required: amount,
                });
            }
            balance.checked_sub(amount).ok_or(BalanceError::Overflow)
        }
    }
}

/// Undo a transaction's effect on a balance.
/// Reverting a credit may leave the balance negative; that is not refused.
pub fn revert(balance: Cents, kind: TransactionKind, amount: Cents) -> Result<Cents, BalanceError> {
    match kind {
        TransactionKind::Credit => balance.checked_sub(amount).ok_or(BalanceError::Overflow),
        TransactionKind::Debit => balance.checked_add(amount).ok_or(BalanceError::Overflow),
    }
}

/// Balance after replacing `old` with a transaction of `new_kind`/`new_amount`.
/// The replacement is checked against the balance as if `old` had never been applied.
pub fn replace(
    balance: Cents,
    old: &Transaction,
    new_kind: TransactionKind,
    new_amount: Cents,
) -> Result<Cents, BalanceError> {
    let reverted = revert(balance, old.kind, old.amount)?;
    apply(reverted, new_kind, new_amount)
}

/// Fold an opening balance over a set of transactions, in any order.
/// Intermediate sums are widened so only the final total has to fit in `Cents`.
pub fn compute_balance(
    opening_balance: Cents,
    transactions: &[Transaction],
) -> Result<Cents, BalanceError> {
    let total = transactions
        .iter()
        .fold(i128::from(opening_balance), |balance, tx| {
            balance + i128::from(tx.signed_amount())
        });
    Cents::try_from(total).map_err(|_| BalanceError::Overflow)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    Insufficient { balance: Cents, required: Cents },
    Overflow,
}

impl std::fmt::Display for BalanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceError::Insufficient { balance, required } => write!(
                f,
                "Debit of {} cents exceeds available balance of {} cents",
                required, balance
            ),
            BalanceError::Overflow => write!(f, "Balance arithmetic overflowed"),
        }
    }
}

impl std::error::Error for BalanceError {}

use std::fmt;

use crate::domain::AccountId;

/// The authenticated account on whose behalf an operation runs.
///
/// Built by the authentication layer once credentials have been checked;
/// every engine call takes one explicitly and scopes all reads and writes to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Caller {
    account_id: AccountId,
}

impl Caller {
    pub fn authenticated(account_id: AccountId) -> Self {
        Self { account_id }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account:{}", self.account_id)
    }
}

use crate::domain::{AccountId, Money, TransactionId, UserId};

/// Failures of the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The stored balance moved between read and commit.
    #[error("Balance of account {account_id} changed concurrently")]
    StaleBalance { account_id: AccountId },

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Failures of ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Amount must be greater than zero, got {0}")]
    InvalidAmount(Money),

    #[error("Description is {len} characters long, at most {max} are allowed")]
    InvalidDescription { len: usize, max: usize },

    #[error("Account not found for user {0}")]
    AccountNotFound(UserId),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Money, available: Money },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Balance of account {0} would overflow")]
    BalanceOverflow(AccountId),

    #[error("Storage failed with: {0}")]
    Storage(#[from] StoreError),
}

impl Error {
    /// Rejections decided before any write was attempted.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Error::Storage(_))
    }
}

use async_trait::async_trait;

use crate::domain::{
    Account, AccountId, Money, Page, StoreError, Transaction, TransactionId, UserId,
};

/// Keyed storage of one account per owner.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_by_owner(&self, owner: &UserId) -> Result<Option<Account>, StoreError>;

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Opens an empty account. Fails with [`StoreError::Conflict`] if the
    /// owner already has one.
    async fn create(&self, owner: &UserId) -> Result<Account, StoreError>;

    /// Unconditional overwrite of the balance, bumping `updated_at`.
    async fn update_balance(&self, account_id: AccountId, new_balance: Money)
    -> Result<(), StoreError>;

    async fn get_all(&self) -> Result<Vec<Account>, StoreError>;

    /// Fetches the owner's account, opening it if it does not exist yet.
    ///
    /// Losing a creation race to another caller is not an error: the winner's
    /// account is fetched and returned.
    async fn get_or_create(&self, owner: &UserId) -> Result<Account, StoreError> {
        if let Some(account) = self.get_by_owner(owner).await? {
            return Ok(account);
        }

        match self.create(owner).await {
            Ok(account) => Ok(account),
            Err(StoreError::Conflict(_)) => self
                .get_by_owner(owner)
                .await?
                .ok_or_else(|| StoreError::not_found("Account", owner)),
            Err(e) => Err(e),
        }
    }
}

/// Append-only storage of transaction records.
///
/// Every listing is ordered by `created_at` descending, ties broken by
/// append order (latest first).
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Persists a fully populated record and makes it visible to reads.
    async fn append(&self, transaction: &Transaction) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    async fn list_by_user(&self, owner: &UserId, page: Page)
    -> Result<Vec<Transaction>, StoreError>;

    async fn list_by_account(
        &self,
        account_id: AccountId,
        page: Page,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn count_by_user(&self, owner: &UserId) -> Result<u64, StoreError>;

    async fn list_all(&self, page: Page) -> Result<Vec<Transaction>, StoreError>;
}

/// Storage able to apply a transaction to its account as one unit of work.
#[async_trait]
pub trait LedgerStore: AccountStore + TransactionLog {
    /// Appends `transaction` and moves the balance of its account from
    /// `balance_before` to `balance_after`, all or nothing.
    ///
    /// The balance update is a compare-and-swap: if the stored balance is no
    /// longer `balance_before` nothing is written and
    /// [`StoreError::StaleBalance`] is returned. On success the updated
    /// account is returned.
    async fn commit(&self, transaction: &Transaction) -> Result<Account, StoreError>;
}

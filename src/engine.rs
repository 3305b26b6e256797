use tracing::{debug, error, instrument, warn};

use crate::config::LedgerConfig;
use crate::domain::{
    self, Account, Error, LedgerStore, Money, Page, StoreError, Transaction, TransactionId,
    TransactionKind, UserId,
};
use crate::locks::OwnerLocks;

/// One page of a transaction history, most recent first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    pub transactions: Vec<Transaction>,
    pub page: Page,
}

/// Orchestrates the account store and transaction log.
///
/// Every balance change runs under the owner's lock and is committed through
/// [`LedgerStore::commit`], which writes the transaction record and the new
/// balance as one unit and refuses to overwrite a balance it did not start
/// from. Rejected operations write nothing.
#[derive(Debug)]
pub struct Engine<S>
where
    S: LedgerStore,
{
    store: S,
    locks: OwnerLocks,
    config: LedgerConfig,
}

impl<S> Engine<S>
where
    S: LedgerStore,
{
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self {
            store,
            locks: OwnerLocks::new(),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Credits `amount` to the owner's account, opening it on first use.
    #[instrument(
        level = "debug",
        skip(self, owner, amount, description),
        fields(user = %owner, amount = %amount)
    )]
    pub async fn deposit(
        &self,
        owner: &UserId,
        amount: Money,
        description: &str,
    ) -> Result<Transaction, Error> {
        self.apply(owner, TransactionKind::Deposit, amount, description)
            .await
    }

    /// Debits `amount` from the owner's existing account.
    #[instrument(
        level = "debug",
        skip(self, owner, amount, description),
        fields(user = %owner, amount = %amount)
    )]
    pub async fn withdraw(
        &self,
        owner: &UserId,
        amount: Money,
        description: &str,
    ) -> Result<Transaction, Error> {
        self.apply(owner, TransactionKind::Withdrawal, amount, description)
            .await
    }

    pub async fn get_balance(&self, owner: &UserId) -> Result<Money, Error> {
        Ok(self.get_account(owner).await?.balance)
    }

    pub async fn get_account(&self, owner: &UserId) -> Result<Account, Error> {
        self.store
            .get_by_owner(owner)
            .await?
            .ok_or_else(|| Error::AccountNotFound(owner.clone()))
    }

    /// The owner's transactions, most recent first.
    pub async fn list_transactions(
        &self,
        owner: &UserId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<History, Error> {
        let page = self.user_page(limit, offset);
        let transactions = self.store.list_by_user(owner, page).await?;

        Ok(History { transactions, page })
    }

    pub async fn account_history(
        &self,
        owner: &UserId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<History, Error> {
        let account = self.get_account(owner).await?;
        let page = self.user_page(limit, offset);
        let transactions = self.store.list_by_account(account.id, page).await?;

        Ok(History { transactions, page })
    }

    pub async fn count_transactions(&self, owner: &UserId) -> Result<u64, Error> {
        Ok(self.store.count_by_user(owner).await?)
    }

    /// Looks a transaction up by id.
    ///
    /// This read is not self-authorizing: callers must check that the
    /// requesting user owns the returned record.
    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, Error> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or(Error::TransactionNotFound(id))
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, Error> {
        Ok(self.store.get_all().await?)
    }

    pub async fn list_all_transactions(
        &self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<History, Error> {
        let page = Page::normalize(
            limit,
            offset,
            self.config.admin_page_size,
            self.config.max_page_size,
        );
        let transactions = self.store.list_all(page).await?;

        Ok(History { transactions, page })
    }

    fn user_page(&self, limit: Option<i64>, offset: Option<i64>) -> Page {
        Page::normalize(
            limit,
            offset,
            self.config.default_page_size,
            self.config.max_page_size,
        )
    }

    fn validate(&self, amount: Money, description: &str) -> Result<(), Error> {
        if !amount.is_positive() {
            return Err(Error::InvalidAmount(amount));
        }

        let len = description.chars().count();
        if len > self.config.max_description_len {
            return Err(Error::InvalidDescription {
                len,
                max: self.config.max_description_len,
            });
        }

        Ok(())
    }

    async fn apply(
        &self,
        owner: &UserId,
        kind: TransactionKind,
        amount: Money,
        description: &str,
    ) -> Result<Transaction, Error> {
        if let Err(e) = self.validate(amount, description) {
            warn!("Rejected {} for {}: {}", kind.as_str(), owner, e);
            return Err(e);
        }

        let _guard = self.locks.acquire(owner).await;

        let mut attempt = 1;
        loop {
            let account = self.load(owner, kind).await?;

            if kind == TransactionKind::Withdrawal && account.balance < amount {
                warn!(
                    "Rejected withdrawal of {} for {}: balance is {}",
                    amount, owner, account.balance
                );
                return Err(Error::InsufficientFunds {
                    requested: amount,
                    available: account.balance,
                });
            }

            // Never earlier than the last change, so per-account order by
            // created_at is commit order.
            let created_at = domain::now().max(account.updated_at);
            let transaction = Transaction::record(
                &account,
                kind,
                amount,
                description.to_owned(),
                created_at,
            )
            .ok_or(Error::BalanceOverflow(account.id))?;

            match self.store.commit(&transaction).await {
                Ok(updated) => {
                    debug!("Committed {} (account balance {})", transaction, updated.balance);
                    return Ok(transaction);
                }
                Err(StoreError::StaleBalance { account_id })
                    if attempt < self.config.commit_attempts =>
                {
                    warn!(
                        "Balance of account {} moved during {} (attempt {}), retrying",
                        account_id,
                        kind.as_str(),
                        attempt
                    );
                    attempt += 1;
                }
                Err(e) => {
                    error!("Failed to commit {}: {}", transaction, e);
                    return Err(Error::Storage(e));
                }
            }
        }
    }

    async fn load(&self, owner: &UserId, kind: TransactionKind) -> Result<Account, Error> {
        match kind {
            TransactionKind::Deposit => Ok(self.store.get_or_create(owner).await?),
            TransactionKind::Withdrawal => self.get_account(owner).await.inspect_err(|e| {
                warn!("Rejected withdrawal for {}: {}", owner, e);
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    fn engine() -> Engine<MemoryStore> {
        Engine::new(MemoryStore::new(), LedgerConfig::default())
    }

    #[tokio::test]
    async fn test_deposit_opens_account() {
        let engine = engine();
        let alice = UserId::new("alice");

        let tx = engine
            .deposit(&alice, money("100.00"), "salary")
            .await
            .unwrap();

        assert_eq!(tx.balance_before, Money::zero());
        assert_eq!(tx.balance_after, money("100.00"));
        assert_eq!(engine.get_balance(&alice).await.unwrap(), money("100.00"));
    }

    #[tokio::test]
    async fn test_withdrawal_without_account() {
        let engine = engine();
        let err = engine
            .withdraw(&UserId::new("nobody"), money("1.00"), "")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AccountNotFound(_)));
        assert!(engine.list_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_and_negative_amounts_rejected() {
        let engine = engine();
        let alice = UserId::new("alice");

        for amount in [Money::zero(), money("-5.00")] {
            assert!(matches!(
                engine.deposit(&alice, amount, "").await,
                Err(Error::InvalidAmount(_))
            ));
            assert!(matches!(
                engine.withdraw(&alice, amount, "").await,
                Err(Error::InvalidAmount(_))
            ));
        }

        assert!(matches!(
            engine.get_balance(&alice).await,
            Err(Error::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_long_description_rejected() {
        let engine = engine();
        let alice = UserId::new("alice");
        let description = "x".repeat(256);

        let err = engine
            .deposit(&alice, money("1.00"), &description)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidDescription { len: 256, max: 255 }
        ));

        // multi-byte characters count once
        let description = "é".repeat(255);
        assert!(engine.deposit(&alice, money("1.00"), &description).await.is_ok());
    }

    #[tokio::test]
    async fn test_overflow_is_rejected_without_writes() {
        let engine = engine();
        let alice = UserId::new("alice");

        engine
            .deposit(&alice, Money::from_minor(i64::MAX), "")
            .await
            .unwrap();
        let err = engine
            .deposit(&alice, Money::from_minor(1), "")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::BalanceOverflow(_)));
        assert_eq!(engine.count_transactions(&alice).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_admin_listing_uses_its_own_default() {
        let engine = engine();
        let history = engine.list_all_transactions(None, None).await.unwrap();
        assert_eq!(history.page, Page::new(100, 0));

        let history = engine.list_transactions(&UserId::new("a"), None, None).await.unwrap();
        assert_eq!(history.page, Page::new(50, 0));
    }
}

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{
    self, Account, AccountId, AccountStore, LedgerStore, Money, Page, StoreError, Transaction,
    TransactionId, TransactionLog, UserId,
};

/// In-process store. Clones share the same state.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    owners: HashMap<UserId, AccountId>,
    /// Append order.
    journal: Vec<Transaction>,
    index: HashMap<TransactionId, usize>,
}

impl State {
    /// Matching records, newest first; equal timestamps keep the latest
    /// append first.
    fn newest_first<F>(&self, page: Page, keep: F) -> Vec<Transaction>
    where
        F: Fn(&Transaction) -> bool,
    {
        let mut matches: Vec<&Transaction> =
            self.journal.iter().rev().filter(|tx| keep(*tx)).collect();
        // stable: ties stay in reverse append order
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        page.slice(matches.into_iter().cloned())
    }

    fn push(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        if self.index.contains_key(&transaction.id) {
            return Err(StoreError::Conflict(format!(
                "Transaction ID {} already exists",
                transaction.id
            )));
        }

        self.index.insert(transaction.id, self.journal.len());
        self.journal.push(transaction.clone());
        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_by_owner(&self, owner: &UserId) -> Result<Option<Account>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .owners
            .get(owner)
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.state.read().await.accounts.get(&account_id).cloned())
    }

    async fn create(&self, owner: &UserId) -> Result<Account, StoreError> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        match state.owners.entry(owner.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "User {} already has an account",
                owner
            ))),
            Entry::Vacant(e) => {
                let account = Account::open(owner.clone(), domain::now());
                e.insert(account.id);
                state.accounts.insert(account.id, account.clone());
                Ok(account)
            }
        }
    }

    async fn update_balance(
        &self,
        account_id: AccountId,
        new_balance: Money,
    ) -> Result<(), StoreError> {
        if new_balance < Money::zero() {
            return Err(StoreError::Conflict(format!(
                "Balance of account {} cannot become {}",
                account_id, new_balance
            )));
        }

        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| StoreError::not_found("Account", account_id))?;

        account.balance = new_balance;
        account.updated_at = domain::now();
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Account>, StoreError> {
        let state = self.state.read().await;
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(accounts)
    }
}

#[async_trait]
impl TransactionLog for MemoryStore {
    async fn append(&self, transaction: &Transaction) -> Result<(), StoreError> {
        self.state.write().await.push(transaction)
    }

    async fn get_by_id(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let state = self.state.read().await;
        Ok(state.index.get(&id).map(|&i| state.journal[i].clone()))
    }

    async fn list_by_user(
        &self,
        owner: &UserId,
        page: Page,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.read().await;
        Ok(state.newest_first(page, |tx| &tx.user_id == owner))
    }

    async fn list_by_account(
        &self,
        account_id: AccountId,
        page: Page,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.read().await;
        Ok(state.newest_first(page, |tx| tx.account_id == account_id))
    }

    async fn count_by_user(&self, owner: &UserId) -> Result<u64, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .journal
            .iter()
            .filter(|tx| &tx.user_id == owner)
            .count() as u64)
    }

    async fn list_all(&self, page: Page) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.read().await;
        Ok(state.newest_first(page, |_| true))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn commit(&self, transaction: &Transaction) -> Result<Account, StoreError> {
        let mut state = self.state.write().await;

        // Every check happens before the first mutation.
        let account = state
            .accounts
            .get(&transaction.account_id)
            .ok_or_else(|| StoreError::not_found("Account", transaction.account_id))?;
        if account.balance != transaction.balance_before {
            return Err(StoreError::StaleBalance {
                account_id: account.id,
            });
        }
        if transaction.balance_after < Money::zero() {
            return Err(StoreError::Conflict(format!(
                "Balance of account {} cannot become {}",
                account.id, transaction.balance_after
            )));
        }
        state.push(transaction)?;

        let account = state
            .accounts
            .get_mut(&transaction.account_id)
            .ok_or_else(|| StoreError::not_found("Account", transaction.account_id))?;
        account.balance = transaction.balance_after;
        account.updated_at = transaction.created_at;

        Ok(account.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionKind;

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn create_is_unique_per_owner() {
        let store = MemoryStore::new();
        let alice = UserId::new("alice");

        let first = store.create(&alice).await.unwrap();
        assert!(matches!(
            store.create(&alice).await,
            Err(StoreError::Conflict(_))
        ));

        let again = store.get_or_create(&alice).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commit_rejects_stale_balance_without_writing() {
        let store = MemoryStore::new();
        let account = store.create(&UserId::new("alice")).await.unwrap();
        let tx = Transaction::record(
            &account,
            TransactionKind::Deposit,
            money("5.00"),
            String::new(),
            domain::now(),
        )
        .unwrap();

        store
            .update_balance(account.id, money("1.00"))
            .await
            .unwrap();

        assert!(matches!(
            store.commit(&tx).await,
            Err(StoreError::StaleBalance { .. })
        ));
        assert_eq!(store.get_by_id(tx.id).await.unwrap(), None);
        assert_eq!(
            store.get_account(account.id).await.unwrap().unwrap().balance,
            money("1.00")
        );
    }

    #[tokio::test]
    async fn duplicate_append_is_a_conflict() {
        let store = MemoryStore::new();
        let account = store.create(&UserId::new("alice")).await.unwrap();
        let tx = Transaction::record(
            &account,
            TransactionKind::Deposit,
            money("5.00"),
            String::new(),
            domain::now(),
        )
        .unwrap();

        store.commit(&tx).await.unwrap();
        assert!(matches!(
            store.append(&tx).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.list_all(Page::new(10, 0)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn equal_timestamps_list_latest_append_first() {
        let store = MemoryStore::new();
        let mut account = store.create(&UserId::new("alice")).await.unwrap();
        let at = domain::now();

        let mut ids = Vec::new();
        for _ in 0..3 {
            let tx = Transaction::record(
                &account,
                TransactionKind::Deposit,
                money("1.00"),
                String::new(),
                at,
            )
            .unwrap();
            account = store.commit(&tx).await.unwrap();
            ids.push(tx.id);
        }

        let listed: Vec<_> = store
            .list_by_account(account.id, Page::new(10, 0))
            .await
            .unwrap()
            .into_iter()
            .map(|tx| tx.id)
            .collect();
        ids.reverse();
        assert_eq!(listed, ids);
    }
}

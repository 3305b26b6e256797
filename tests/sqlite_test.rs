use banking_ledger::domain::{self, AccountStore, LedgerStore, TransactionLog};
use banking_ledger::{
    Engine, LedgerConfig, Money, Page, SqliteStore, StoreConfig, StoreError, Transaction,
    TransactionKind, UserId,
};
use tempfile::TempDir;

fn money(s: &str) -> Money {
    s.parse().unwrap()
}

fn file_config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        database_url: format!("sqlite://{}", dir.path().join("ledger.db").display()),
        max_connections: 4,
    }
}

async fn memory_store() -> SqliteStore {
    SqliteStore::connect(&StoreConfig::in_memory()).await.unwrap()
}

#[tokio::test]
async fn ledger_survives_reconnect() {
    let dir = TempDir::new().unwrap();
    let alice = UserId::new("alice");

    let deposit = {
        let store = SqliteStore::connect(&file_config(&dir)).await.unwrap();
        let engine = Engine::new(store.clone(), LedgerConfig::default());
        let deposit = engine
            .deposit(&alice, money("100.00"), "paycheck")
            .await
            .unwrap();
        engine.withdraw(&alice, money("30.00"), "").await.unwrap();
        store.close().await;
        deposit
    };

    let store = SqliteStore::connect(&file_config(&dir)).await.unwrap();
    let engine = Engine::new(store, LedgerConfig::default());

    assert_eq!(engine.get_balance(&alice).await.unwrap(), money("70.00"));
    assert_eq!(engine.get_transaction(deposit.id).await.unwrap(), deposit);

    let history = engine.list_transactions(&alice, None, None).await.unwrap();
    assert_eq!(history.transactions.len(), 2);
    assert_eq!(history.transactions[1], deposit);
}

#[tokio::test]
async fn failed_insert_rolls_back_balance() {
    let store = memory_store().await;
    let account = store.create(&UserId::new("alice")).await.unwrap();

    let first = Transaction::record(
        &account,
        TransactionKind::Deposit,
        money("10.00"),
        String::new(),
        domain::now(),
    )
    .unwrap();
    let account = store.commit(&first).await.unwrap();
    assert_eq!(account.balance, money("10.00"));

    // Same id on a record that would otherwise apply cleanly.
    let mut duplicate = Transaction::record(
        &account,
        TransactionKind::Deposit,
        money("5.00"),
        String::new(),
        domain::now(),
    )
    .unwrap();
    duplicate.id = first.id;

    assert!(matches!(
        store.commit(&duplicate).await,
        Err(StoreError::Conflict(_))
    ));
    let account = store.get_account(account.id).await.unwrap().unwrap();
    assert_eq!(account.balance, money("10.00"));
    assert_eq!(store.list_all(Page::new(10, 0)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn stale_balance_is_detected() {
    let store = memory_store().await;
    let account = store.create(&UserId::new("alice")).await.unwrap();

    let tx = Transaction::record(
        &account,
        TransactionKind::Deposit,
        money("1.00"),
        String::new(),
        domain::now(),
    )
    .unwrap();
    store
        .update_balance(account.id, money("3.00"))
        .await
        .unwrap();

    assert!(matches!(
        store.commit(&tx).await,
        Err(StoreError::StaleBalance { account_id }) if account_id == account.id
    ));
    assert_eq!(store.get_by_id(tx.id).await.unwrap(), None);
}

#[tokio::test]
async fn transactions_are_append_only() {
    let store = memory_store().await;
    let engine = Engine::new(store.clone(), LedgerConfig::default());
    let tx = engine
        .deposit(&UserId::new("alice"), money("1.00"), "")
        .await
        .unwrap();

    let update = sqlx::query("UPDATE transactions SET amount = 999 WHERE id = ?")
        .bind(tx.id.to_string())
        .execute(store.pool())
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM transactions")
        .execute(store.pool())
        .await;
    assert!(delete.is_err());

    assert_eq!(engine.get_transaction(tx.id).await.unwrap(), tx);
}

#[tokio::test]
async fn listings_match_memory_ordering() {
    let store = memory_store().await;
    let engine = Engine::new(store, LedgerConfig::default());
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");

    let mut expected = Vec::new();
    for i in 1..=5 {
        let owner = if i % 2 == 0 { &bob } else { &alice };
        let tx = engine
            .deposit(owner, Money::from_minor(i * 10), "")
            .await
            .unwrap();
        expected.push(tx.id);
    }
    expected.reverse();

    let all = engine.list_all_transactions(None, None).await.unwrap();
    let ids: Vec<_> = all.transactions.iter().map(|tx| tx.id).collect();
    assert_eq!(ids, expected);

    let alice_page = engine
        .list_transactions(&alice, Some(2), Some(1))
        .await
        .unwrap();
    assert_eq!(alice_page.transactions.len(), 2);
    assert!(alice_page.transactions.iter().all(|tx| tx.user_id == alice));

    assert_eq!(engine.count_transactions(&alice).await.unwrap(), 3);
    assert_eq!(engine.list_accounts().await.unwrap().len(), 2);
}

#[tokio::test]
async fn description_and_amounts_round_trip_exactly() {
    let store = memory_store().await;
    let engine = Engine::new(store, LedgerConfig::default());
    let alice = UserId::new("alice");

    let description = "Café rent, März";
    let tx = engine
        .deposit(&alice, money("0.10"), description)
        .await
        .unwrap();
    engine.deposit(&alice, money("0.20"), "").await.unwrap();

    let stored = engine.get_transaction(tx.id).await.unwrap();
    assert_eq!(stored.description, description);
    assert_eq!(
        engine.get_balance(&alice).await.unwrap(),
        money("0.30")
    );
}

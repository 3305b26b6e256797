use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt, future};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::domain::{
    self, Account, AccountId, AccountStore, LedgerStore, Money, Page, StoreError, Transaction,
    TransactionId, TransactionKind, TransactionLog, UserId,
};

// Amounts in cents, timestamps in microseconds since the epoch.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY NOT NULL,
        user_id TEXT NOT NULL UNIQUE,
        balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        account_id TEXT NOT NULL REFERENCES accounts(id),
        user_id TEXT NOT NULL,
        kind TEXT NOT NULL CHECK (kind IN ('deposit', 'withdrawal')),
        amount INTEGER NOT NULL CHECK (amount > 0),
        balance_before INTEGER NOT NULL CHECK (balance_before >= 0),
        balance_after INTEGER NOT NULL CHECK (balance_after >= 0),
        description TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_transactions_user_id ON transactions(user_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_account_id ON transactions(account_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_created_at ON transactions(created_at)",
    "CREATE TRIGGER IF NOT EXISTS transactions_no_update BEFORE UPDATE ON transactions
     BEGIN SELECT RAISE(ABORT, 'transactions are append-only'); END",
    "CREATE TRIGGER IF NOT EXISTS transactions_no_delete BEFORE DELETE ON transactions
     BEGIN SELECT RAISE(ABORT, 'transactions are append-only'); END",
];

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: String,
    user_id: String,
    balance: i64,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: String,
    account_id: String,
    user_id: String,
    kind: String,
    amount: i64,
    balance_before: i64,
    balance_after: i64,
    description: String,
    created_at: i64,
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value)
        .map_err(|e| StoreError::Corrupt(format!("{} '{}' is not a UUID: {}", field, value, e)))
}

fn from_micros(field: &str, value: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(value)
        .ok_or_else(|| StoreError::Corrupt(format!("{} {} is out of range", field, value)))
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: AccountId(parse_uuid("account id", &row.id)?),
            user_id: UserId::new(row.user_id),
            balance: Money::from_minor(row.balance),
            created_at: from_micros("created_at", row.created_at)?,
            updated_at: from_micros("updated_at", row.updated_at)?,
        })
    }
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let kind = TransactionKind::parse(&row.kind).ok_or_else(|| {
            StoreError::Corrupt(format!("Invalid transaction type: {}", row.kind))
        })?;

        Ok(Transaction {
            id: TransactionId(parse_uuid("transaction id", &row.id)?),
            account_id: AccountId(parse_uuid("account id", &row.account_id)?),
            user_id: UserId::new(row.user_id),
            kind,
            amount: Money::from_minor(row.amount),
            balance_before: Money::from_minor(row.balance_before),
            balance_after: Money::from_minor(row.balance_after),
            description: row.description,
            created_at: from_micros("created_at", row.created_at)?,
        })
    }
}

/// Drains a row stream into domain values.
async fn collect<R, T, S>(rows: S) -> Result<Vec<T>, StoreError>
where
    S: Stream<Item = Result<R, sqlx::Error>>,
    T: TryFrom<R, Error = StoreError>,
{
    rows.map_err(StoreError::from)
        .and_then(|row| future::ready(T::try_from(row)))
        .try_collect()
        .await
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database and its schema.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let mut pool_options = SqlitePoolOptions::new();
        if config.is_in_memory() {
            // Each connection to :memory: is its own database; keep exactly one alive.
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            options = options.journal_mode(SqliteJournalMode::Wal);
            pool_options = pool_options.max_connections(config.max_connections.max(1));
        }

        let pool = pool_options.connect_with(options).await?;
        info!("Connected to {}", config.database_url);

        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, creating the schema if it is missing.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&pool).await?;
        }
        debug!("Ledger schema ready");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn get_by_owner(&self, owner: &UserId) -> Result<Option<Account>, StoreError> {
        sqlx::query_as::<_, AccountRow>(
            "SELECT id, user_id, balance, created_at, updated_at FROM accounts WHERE user_id = ?",
        )
        .bind(owner.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(Account::try_from)
        .transpose()
    }

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        sqlx::query_as::<_, AccountRow>(
            "SELECT id, user_id, balance, created_at, updated_at FROM accounts WHERE id = ?",
        )
        .bind(account_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .map(Account::try_from)
        .transpose()
    }

    async fn create(&self, owner: &UserId) -> Result<Account, StoreError> {
        let account = Account::open(owner.clone(), domain::now());

        let result = sqlx::query(
            "INSERT INTO accounts (id, user_id, balance, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(account.id.to_string())
        .bind(owner.as_str())
        .bind(account.balance.as_minor())
        .bind(account.created_at.timestamp_micros())
        .bind(account.updated_at.timestamp_micros())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("Opened account {} for {}", account.id, owner);
                Ok(account)
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(format!(
                "User {} already has an account",
                owner
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_balance(
        &self,
        account_id: AccountId,
        new_balance: Money,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE accounts SET balance = ?, updated_at = ? WHERE id = ?")
            .bind(new_balance.as_minor())
            .bind(domain::now().timestamp_micros())
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Account", account_id));
        }
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Account>, StoreError> {
        collect(
            sqlx::query_as::<_, AccountRow>(
                "SELECT id, user_id, balance, created_at, updated_at FROM accounts
                 ORDER BY created_at DESC, id",
            )
            .fetch(&self.pool),
        )
        .await
    }
}

#[async_trait]
impl TransactionLog for SqliteStore {
    async fn append(&self, transaction: &Transaction) -> Result<(), StoreError> {
        insert_transaction(&self.pool, transaction).await
    }

    async fn get_by_id(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        sqlx::query_as::<_, TransactionRow>(
            "SELECT id, account_id, user_id, kind, amount, balance_before, balance_after,
                    description, created_at
             FROM transactions WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .map(Transaction::try_from)
        .transpose()
    }

    async fn list_by_user(
        &self,
        owner: &UserId,
        page: Page,
    ) -> Result<Vec<Transaction>, StoreError> {
        collect(
            sqlx::query_as::<_, TransactionRow>(
                "SELECT id, account_id, user_id, kind, amount, balance_before, balance_after,
                        description, created_at
                 FROM transactions WHERE user_id = ?
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ? OFFSET ?",
            )
            .bind(owner.as_str())
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch(&self.pool),
        )
        .await
    }

    async fn list_by_account(
        &self,
        account_id: AccountId,
        page: Page,
    ) -> Result<Vec<Transaction>, StoreError> {
        collect(
            sqlx::query_as::<_, TransactionRow>(
                "SELECT id, account_id, user_id, kind, amount, balance_before, balance_after,
                        description, created_at
                 FROM transactions WHERE account_id = ?
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ? OFFSET ?",
            )
            .bind(account_id.to_string())
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch(&self.pool),
        )
        .await
    }

    async fn count_by_user(&self, owner: &UserId) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE user_id = ?")
            .bind(owner.as_str())
            .fetch_one(&self.pool)
            .await?;

        u64::try_from(count).map_err(|_| StoreError::Corrupt(format!("Negative count {}", count)))
    }

    async fn list_all(&self, page: Page) -> Result<Vec<Transaction>, StoreError> {
        collect(
            sqlx::query_as::<_, TransactionRow>(
                "SELECT id, account_id, user_id, kind, amount, balance_before, balance_after,
                        description, created_at
                 FROM transactions
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ? OFFSET ?",
            )
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch(&self.pool),
        )
        .await
    }
}

async fn insert_transaction<'e, E>(executor: E, transaction: &Transaction) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO transactions (id, account_id, user_id, kind, amount, balance_before,
                                   balance_after, description, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(transaction.id.to_string())
    .bind(transaction.account_id.to_string())
    .bind(transaction.user_id.as_str())
    .bind(transaction.kind.as_str())
    .bind(transaction.amount.as_minor())
    .bind(transaction.balance_before.as_minor())
    .bind(transaction.balance_after.as_minor())
    .bind(transaction.description.as_str())
    .bind(transaction.created_at.timestamp_micros())
    .execute(executor)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(format!(
            "Transaction ID {} already exists",
            transaction.id
        ))),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn commit(&self, transaction: &Transaction) -> Result<Account, StoreError> {
        // Dropping `db` without commit rolls everything back.
        let mut db = self.pool.begin().await?;
        let account_id = transaction.account_id.to_string();

        let updated = sqlx::query(
            "UPDATE accounts SET balance = ?, updated_at = ? WHERE id = ? AND balance = ?",
        )
        .bind(transaction.balance_after.as_minor())
        .bind(transaction.created_at.timestamp_micros())
        .bind(account_id.as_str())
        .bind(transaction.balance_before.as_minor())
        .execute(&mut *db)
        .await?;

        if updated.rows_affected() == 0 {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM accounts WHERE id = ?")
                .bind(account_id.as_str())
                .fetch_optional(&mut *db)
                .await?;

            return Err(match exists {
                Some(_) => StoreError::StaleBalance {
                    account_id: transaction.account_id,
                },
                None => StoreError::not_found("Account", account_id),
            });
        }

        insert_transaction(&mut *db, transaction).await?;

        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, user_id, balance, created_at, updated_at FROM accounts WHERE id = ?",
        )
        .bind(account_id.as_str())
        .fetch_one(&mut *db)
        .await?;

        db.commit().await?;

        Account::try_from(row)
    }
}

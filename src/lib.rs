//! # Banking Ledger
//!
//! Single-currency account ledger: each user owns at most one account, and
//! every accepted deposit or withdrawal leaves an immutable record carrying
//! the balance before and after it.
//!
//! ## Design Principles
//!
//! - **Exact amounts**: money is held as integer cents, parsed through `rust_decimal`
//! - **Atomic commits**: a record and its balance change are stored together or not at all
//! - **No negative balances**: withdrawals never take an account below zero
//!
//! ## Example
//!
//! ```no_run
//! use banking_ledger::{Engine, LedgerConfig, MemoryStore, UserId};
//!
//! # async fn run() -> Result<(), banking_ledger::Error> {
//! let engine = Engine::new(MemoryStore::new(), LedgerConfig::default());
//! let alice = UserId::new("alice");
//!
//! engine.deposit(&alice, "100.00".parse().unwrap(), "salary").await?;
//! engine.withdraw(&alice, "30.00".parse().unwrap(), "rent").await?;
//! assert_eq!(engine.get_balance(&alice).await?.to_string(), "70.00");
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod locks;
pub mod store;

pub use api::{ApiResponse, LedgerApi, Principal};
pub use config::{ApiConfig, LedgerConfig, StoreConfig};
pub use domain::{
    Account, AccountId, Error, Money, Page, StoreError, Transaction, TransactionId,
    TransactionKind, UserId,
};
pub use engine::{Engine, History};
pub use store::{MemoryStore, SqliteStore};

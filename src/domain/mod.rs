pub mod account;
pub mod error;
pub mod money;
pub mod page;
pub mod traits;
pub mod transaction;

pub use account::{Account, AccountId, UserId};
pub use error::{Error, StoreError};
pub use money::Money;
pub use page::Page;
pub use traits::{AccountStore, LedgerStore, TransactionLog};
pub use transaction::{Transaction, TransactionId, TransactionKind};

use chrono::{DateTime, SubsecRound, Utc};

/// Current time at the precision records are stored with (microseconds).
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Account, AccountId, Money, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionKind::Deposit),
            "withdrawal" => Some(TransactionKind::Withdrawal),
            _ => None,
        }
    }

    /// Balance after applying `amount` of this kind to `before`.
    pub fn apply(&self, before: Money, amount: Money) -> Option<Money> {
        match self {
            TransactionKind::Deposit => before.checked_add(amount),
            TransactionKind::Withdrawal => before.checked_sub(amount),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl core::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

/// Immutable record of one accepted deposit or withdrawal.
///
/// `balance_before` and `balance_after` bracket the effect of `amount` on
/// the owning account, so consecutive records of one account chain:
/// the `balance_after` of one is the `balance_before` of the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Prepares the record for applying `amount` to the account as it is
    /// now. Returns `None` if the resulting balance is not representable.
    pub fn record(
        account: &Account,
        kind: TransactionKind,
        amount: Money,
        description: String,
        created_at: DateTime<Utc>,
    ) -> Option<Self> {
        let balance_after = kind.apply(account.balance, amount)?;

        Some(Self {
            id: TransactionId::generate(),
            account_id: account.id,
            user_id: account.user_id.clone(),
            kind,
            amount,
            balance_before: account.balance,
            balance_after,
            description,
            created_at,
        })
    }
}

impl core::fmt::Display for Transaction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:?},user={},tx={},amount={},balance={}->{}",
            self.kind, self.user_id, self.id, self.amount, self.balance_before, self.balance_after
        )
    }
}

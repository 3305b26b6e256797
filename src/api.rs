use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::domain::{Error, LedgerStore, Money, Transaction, TransactionId, TransactionKind, UserId};
use crate::engine::Engine;

pub const CURRENCY: &str = "USD";

pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_FORBIDDEN: u16 = 403;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// Caller identity as established upstream (token validation, blacklist
/// lookup). Trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub is_blacklisted: bool,
}

impl Principal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            is_blacklisted: false,
        }
    }

    pub fn blacklisted(mut self) -> Self {
        self.is_blacklisted = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn error_code(&self) -> Option<&str> {
        self.body.get("error")?.get("code")?.as_str()
    }
}

#[derive(Debug, Deserialize)]
pub struct TransactionRequest {
    pub amount: Money,
    #[serde(default)]
    pub description: String,
}

/// History entry; the owner is implied by the request.
#[derive(Debug, Serialize)]
pub struct TransactionSummary {
    pub id: TransactionId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<Transaction> for TransactionSummary {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id,
            kind: tx.kind,
            amount: tx.amount,
            balance_before: tx.balance_before,
            balance_after: tx.balance_after,
            description: tx.description,
            created_at: tx.created_at,
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: u16,
    code: &'static str,
    message: &'static str,
    details: Option<Value>,
}

impl ApiError {
    fn new(status: u16, code: &'static str, message: &'static str) -> Self {
        Self {
            status,
            code,
            message,
            details: None,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn validation(details: impl ToString) -> Self {
        Self::new(STATUS_BAD_REQUEST, "VALIDATION_ERROR", "Invalid request data")
            .with_details(Value::String(details.to_string()))
    }

    fn into_response(self) -> ApiResponse {
        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(details) = self.details {
            error["details"] = details;
        }
        ApiResponse::new(self.status, json!({ "error": error }))
    }
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    code: &'static str,
    message: &'static str,
}

const DEPOSIT_FAILED: Failure = Failure {
    code: "DEPOSIT_FAILED",
    message: "Failed to process deposit",
};
const WITHDRAWAL_FAILED: Failure = Failure {
    code: "WITHDRAWAL_FAILED",
    message: "Failed to process withdrawal",
};
const BALANCE_FAILED: Failure = Failure {
    code: "FETCH_BALANCE_FAILED",
    message: "Failed to fetch balance",
};
const FETCH_TRANSACTIONS_FAILED: Failure = Failure {
    code: "FETCH_TRANSACTIONS_FAILED",
    message: "Failed to fetch transactions",
};
const FETCH_TRANSACTION_FAILED: Failure = Failure {
    code: "FETCH_TRANSACTION_FAILED",
    message: "Failed to fetch transaction",
};
const FETCH_ACCOUNTS_FAILED: Failure = Failure {
    code: "FETCH_ACCOUNTS_FAILED",
    message: "Failed to fetch accounts",
};

pub struct LedgerApi<S>
where
    S: LedgerStore,
{
    engine: Arc<Engine<S>>,
    config: ApiConfig,
}

impl<S> LedgerApi<S>
where
    S: LedgerStore,
{
    pub fn new(engine: Arc<Engine<S>>, config: ApiConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &Arc<Engine<S>> {
        &self.engine
    }

    /// `GET /health`
    pub fn health(&self) -> ApiResponse {
        ApiResponse::new(
            STATUS_OK,
            json!({ "status": "healthy", "service": "banking-service" }),
        )
    }

    /// `POST /transactions/deposit`
    pub async fn deposit(&self, principal: &Principal, body: &[u8]) -> ApiResponse {
        respond(async {
            authorize(principal)?;
            let request = parse_request(body)?;
            let transaction = self
                .engine
                .deposit(&principal.user_id, request.amount, &request.description)
                .await
                .map_err(|e| self.ledger_error(e, DEPOSIT_FAILED))?;

            Ok::<_, ApiError>(ApiResponse::new(
                STATUS_CREATED,
                json!({
                    "message": "Deposit processed successfully",
                    "transaction": transaction,
                }),
            ))
        })
        .await
    }

    /// `POST /transactions/withdraw`
    pub async fn withdraw(&self, principal: &Principal, body: &[u8]) -> ApiResponse {
        respond(async {
            authorize(principal)?;
            let request = parse_request(body)?;
            let transaction = self
                .engine
                .withdraw(&principal.user_id, request.amount, &request.description)
                .await
                .map_err(|e| self.ledger_error(e, WITHDRAWAL_FAILED))?;

            Ok::<_, ApiError>(ApiResponse::new(
                STATUS_CREATED,
                json!({
                    "message": "Withdrawal processed successfully",
                    "transaction": transaction,
                }),
            ))
        })
        .await
    }

    /// `GET /account/balance`
    pub async fn balance(&self, principal: &Principal) -> ApiResponse {
        respond(async {
            authorize(principal)?;
            let balance = self
                .engine
                .get_balance(&principal.user_id)
                .await
                .map_err(|e| self.ledger_error(e, BALANCE_FAILED))?;

            Ok::<_, ApiError>(ApiResponse::new(
                STATUS_OK,
                json!({
                    "message": "Balance retrieved successfully",
                    "balance": balance,
                    "currency": CURRENCY,
                }),
            ))
        })
        .await
    }

    /// `GET /account/transactions?limit&offset`
    ///
    /// Unparseable paging values count as absent.
    pub async fn transactions(
        &self,
        principal: &Principal,
        limit: Option<&str>,
        offset: Option<&str>,
    ) -> ApiResponse {
        respond(async {
            authorize(principal)?;
            let history = self
                .engine
                .list_transactions(&principal.user_id, parse_int(limit), parse_int(offset))
                .await
                .map_err(|e| self.ledger_error(e, FETCH_TRANSACTIONS_FAILED))?;

            let count = history.transactions.len();
            let transactions: Vec<TransactionSummary> = history
                .transactions
                .into_iter()
                .map(TransactionSummary::from)
                .collect();

            Ok::<_, ApiError>(ApiResponse::new(
                STATUS_OK,
                json!({
                    "message": "Transactions retrieved successfully",
                    "transactions": transactions,
                    "pagination": {
                        "limit": history.page.limit,
                        "offset": history.page.offset,
                        "count": count,
                    },
                }),
            ))
        })
        .await
    }

    /// `GET /transactions/{id}`; only the owner may read a transaction.
    pub async fn transaction(&self, principal: &Principal, id: &str) -> ApiResponse {
        respond(async {
            authorize(principal)?;
            let id = Uuid::parse_str(id.trim()).map(TransactionId).map_err(|_| {
                ApiError::new(
                    STATUS_BAD_REQUEST,
                    "INVALID_TRANSACTION_ID",
                    "Invalid transaction ID format",
                )
            })?;

            let transaction = self
                .engine
                .get_transaction(id)
                .await
                .map_err(|e| self.ledger_error(e, FETCH_TRANSACTION_FAILED))?;

            if transaction.user_id != principal.user_id {
                warn!(
                    "User {} denied access to transaction {} of {}",
                    principal.user_id, transaction.id, transaction.user_id
                );
                return Err(ApiError::new(
                    STATUS_FORBIDDEN,
                    "ACCESS_DENIED",
                    "Access denied to this transaction",
                ));
            }

            Ok::<_, ApiError>(ApiResponse::new(
                STATUS_OK,
                json!({
                    "message": "Transaction retrieved successfully",
                    "transaction": transaction,
                }),
            ))
        })
        .await
    }

    /// Administrative listings; no principal is involved.
    pub async fn accounts(&self) -> ApiResponse {
        respond(async {
            let accounts = self
                .engine
                .list_accounts()
                .await
                .map_err(|e| self.ledger_error(e, FETCH_ACCOUNTS_FAILED))?;

            Ok::<_, ApiError>(ApiResponse::new(
                STATUS_OK,
                json!({
                    "message": "Accounts retrieved successfully",
                    "accounts": accounts,
                }),
            ))
        })
        .await
    }

    pub async fn all_transactions(
        &self,
        limit: Option<&str>,
        offset: Option<&str>,
    ) -> ApiResponse {
        respond(async {
            let history = self
                .engine
                .list_all_transactions(parse_int(limit), parse_int(offset))
                .await
                .map_err(|e| self.ledger_error(e, FETCH_TRANSACTIONS_FAILED))?;

            let count = history.transactions.len();
            Ok::<_, ApiError>(ApiResponse::new(
                STATUS_OK,
                json!({
                    "message": "Transactions retrieved successfully",
                    "transactions": history.transactions,
                    "pagination": {
                        "limit": history.page.limit,
                        "offset": history.page.offset,
                        "count": count,
                    },
                }),
            ))
        })
        .await
    }

    fn ledger_error(&self, err: Error, failure: Failure) -> ApiError {
        match err {
            Error::InvalidAmount(_) | Error::InvalidDescription { .. } => {
                ApiError::validation(&err)
            }
            Error::BalanceOverflow(_) => ApiError::validation(&err),
            Error::InsufficientFunds {
                requested,
                available,
            } => ApiError::new(
                STATUS_BAD_REQUEST,
                "INSUFFICIENT_FUNDS",
                "Insufficient funds for withdrawal",
            )
            .with_details(json!({
                "requested_amount": requested,
                "current_balance": available,
            })),
            Error::AccountNotFound(_) => {
                ApiError::new(STATUS_NOT_FOUND, "ACCOUNT_NOT_FOUND", "Account not found")
            }
            Error::TransactionNotFound(_) => ApiError::new(
                STATUS_NOT_FOUND,
                "TRANSACTION_NOT_FOUND",
                "Transaction not found",
            ),
            Error::Storage(ref cause) => {
                error!("{}: {}", failure.message, cause);
                let api_error = ApiError::new(STATUS_INTERNAL_ERROR, failure.code, failure.message);
                if self.config.expose_error_details {
                    api_error.with_details(Value::String(cause.to_string()))
                } else {
                    api_error
                }
            }
        }
    }
}

async fn respond<F>(handler: F) -> ApiResponse
where
    F: Future<Output = Result<ApiResponse, ApiError>>,
{
    match handler.await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

fn authorize(principal: &Principal) -> Result<(), ApiError> {
    if principal.is_blacklisted {
        warn!("Blacklisted user {} rejected", principal.user_id);
        return Err(ApiError::new(
            STATUS_FORBIDDEN,
            "USER_BLACKLISTED",
            "User account has been suspended",
        ));
    }
    Ok(())
}

fn parse_request(body: &[u8]) -> Result<TransactionRequest, ApiError> {
    serde_json::from_slice(body).map_err(ApiError::validation)
}

fn parse_int(value: Option<&str>) -> Option<i64> {
    value.and_then(|v| v.trim().parse().ok())
}

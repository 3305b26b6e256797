//! Ledger CLI: runs ledger operations against a SQLite database.
//!
//! Usage:
//! ```bash
//! ledger deposit --user alice --amount 100.00 --description salary
//! ledger withdraw --user alice --amount 30
//! ledger balance --user alice
//! ledger history --user alice --limit 10
//! ```
//!
//! Every command prints the JSON response body on stdout and exits non-zero
//! when the operation was not successful.
//!
//! # Environment Variables
//!
//! - `LEDGER_DATABASE_URL`: database to open, `sqlite:ledger.db` by default
//! - `LEDGER_LOG`: log level written to stderr, `warn` by default

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use banking_ledger::{
    ApiConfig, ApiResponse, Engine, LedgerApi, LedgerConfig, Principal, SqliteStore, StoreConfig,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{Level, info};

/// Banking ledger: deposits, withdrawals and history per user
#[derive(Parser)]
#[command(name = "ledger")]
#[command(version, about, long_about = None)]
struct Cli {
    /// sqlx SQLite URL of the ledger database
    #[arg(long, env = "LEDGER_DATABASE_URL", default_value = "sqlite:ledger.db", global = true)]
    database_url: String,

    #[arg(long, default_value_t = 5, global = true)]
    max_connections: u32,

    /// Log level written to stderr
    #[arg(long, env = "LEDGER_LOG", default_value = "warn", global = true)]
    log_level: Level,

    /// Hard cap on history page sizes
    #[arg(long, default_value_t = 200, global = true)]
    max_page_size: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Credit an amount, opening the account on first use
    Deposit {
        #[arg(long)]
        user: String,
        /// Amount with at most two decimal places
        #[arg(long, allow_hyphen_values = true)]
        amount: String,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Debit an amount from an existing account
    Withdraw {
        #[arg(long)]
        user: String,
        #[arg(long, allow_hyphen_values = true)]
        amount: String,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Show the current balance
    Balance {
        #[arg(long)]
        user: String,
    },

    /// List a user's transactions, most recent first
    History {
        #[arg(long)]
        user: String,
        #[arg(long)]
        limit: Option<String>,
        #[arg(long)]
        offset: Option<String>,
    },

    /// Show one transaction owned by the user
    Show {
        #[arg(long)]
        user: String,
        /// Transaction ID
        #[arg(long)]
        id: String,
    },

    /// List all accounts
    Accounts,

    /// List transactions of all users
    Transactions {
        #[arg(long)]
        limit: Option<String>,
        #[arg(long)]
        offset: Option<String>,
    },

    /// Report service health
    Health,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .init();

    let store_config = StoreConfig {
        database_url: cli.database_url.clone(),
        max_connections: cli.max_connections,
    };
    let store = SqliteStore::connect(&store_config)
        .await
        .with_context(|| format!("Failed to open ledger database {}", cli.database_url))?;
    info!("Opened ledger database {}", cli.database_url);

    let ledger_config = LedgerConfig {
        max_page_size: cli.max_page_size,
        ..LedgerConfig::default()
    };
    let engine = Arc::new(Engine::new(store.clone(), ledger_config));
    let api = LedgerApi::new(engine, ApiConfig::default());

    let response = run(&api, cli.command).await;
    store.close().await;
    let response = response?;

    println!("{}", serde_json::to_string_pretty(&response.body)?);

    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run(api: &LedgerApi<SqliteStore>, command: Command) -> Result<ApiResponse> {
    let response = match command {
        Command::Deposit {
            user,
            amount,
            description,
        } => {
            let body = transaction_body(&amount, &description)?;
            api.deposit(&Principal::new(user), &body).await
        }
        Command::Withdraw {
            user,
            amount,
            description,
        } => {
            let body = transaction_body(&amount, &description)?;
            api.withdraw(&Principal::new(user), &body).await
        }
        Command::Balance { user } => api.balance(&Principal::new(user)).await,
        Command::History {
            user,
            limit,
            offset,
        } => {
            api.transactions(&Principal::new(user), limit.as_deref(), offset.as_deref())
                .await
        }
        Command::Show { user, id } => api.transaction(&Principal::new(user), &id).await,
        Command::Accounts => api.accounts().await,
        Command::Transactions { limit, offset } => {
            api.all_transactions(limit.as_deref(), offset.as_deref())
                .await
        }
        Command::Health => api.health(),
    };

    Ok(response)
}

fn transaction_body(amount: &str, description: &str) -> Result<Vec<u8>> {
    let body = json!({ "amount": amount, "description": description });
    Ok(serde_json::to_vec(&body)?)
}

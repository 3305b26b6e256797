/// Limits applied by the ledger engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub default_page_size: u32,
    pub admin_page_size: u32,
    /// Hard cap on any page size.
    pub max_page_size: u32,
    /// Maximum description length, in characters.
    pub max_description_len: usize,
    /// How many times a commit that lost a balance race is attempted.
    pub commit_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            admin_page_size: 100,
            max_page_size: 200,
            max_description_len: 255,
            commit_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// sqlx SQLite URL, e.g. `sqlite:ledger.db` or `sqlite::memory:`.
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:ledger.db".to_string(),
            max_connections: 5,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Put the underlying storage error text in the `details` field of
    /// 5xx responses.
    pub expose_error_details: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            expose_error_details: true,
        }
    }
}

//! Runtime configuration for the ledger.
//!
//! Nothing here is global: a [`LedgerConfig`] is built once (by the CLI, from
//! flags or environment) and passed into the store and repository
//! constructors.

use std::time::Duration;

use anyhow::{Result, ensure};
use serde::Deserialize;

use crate::domain::DEFAULT_CURRENCY;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// sqlx connection URL, e.g. `sqlite:kassa.db`
    pub database_url: String,
    /// Currency assigned to newly created wallets
    pub default_currency: String,
    pub max_connections: u32,
    /// How long a transaction waits for the store's write lock
    pub busy_timeout: Duration,
    /// Upper bound on a whole balance-mutating operation; on expiry the open
    /// transaction is rolled back
    pub tx_timeout: Duration,
    /// Create a wallet on first deposit instead of failing with not-found
    pub auto_provision_on_deposit: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:kassa.db".to_string(),
            default_currency: DEFAULT_CURRENCY.to_string(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            tx_timeout: Duration::from_secs(10),
            auto_provision_on_deposit: true,
        }
    }
}

impl LedgerConfig {
    /// Default configuration pointing at a SQLite file.
    pub fn for_path(database_path: &str) -> Self {
        Self {
            database_url: format!("sqlite:{}", database_path),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.database_url.is_empty(), "database URL must not be empty");
        ensure!(
            !self.default_currency.trim().is_empty(),
            "default currency must not be empty"
        );
        ensure!(self.max_connections > 0, "max connections must be at least 1");
        ensure!(!self.tx_timeout.is_zero(), "transaction timeout must be non-zero");
        Ok(())
    }
}

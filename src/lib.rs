pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod storage;

pub use config::LedgerConfig;
pub use domain::*;
pub use error::LedgerError;
pub use storage::{LedgerStore, MemoryStore, SqliteStore, WalletRepository};

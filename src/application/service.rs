use std::sync::Arc;

use tracing::{debug, error};

use crate::config::LedgerConfig;
use crate::domain::{
    Cents, Clock, EntryDetails, IntegrityReport, SystemClock, Transaction, UserId, Wallet,
    WalletId,
};
use crate::storage::{LedgerStore, MemoryStore, SqliteStore, TransferReceipt, WalletRepository};

use super::LedgerError;

/// Application service exposing the wallet operations.
/// This is the primary interface for any client (CLI, HTTP handlers, etc.);
/// the caller is expected to have authenticated the user id already.
///
/// Request-shape rules are checked here before storage is touched. Failures
/// are reported as-is and never retried.
pub struct LedgerService {
    repo: WalletRepository,
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: WalletRepository) -> Self {
        Self { repo }
    }

    pub fn with_store(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Self {
        Self::new(WalletRepository::new(store, clock, config))
    }

    /// Initialize the database described by `config` (create + migrate).
    pub async fn init(config: LedgerConfig) -> Result<Self, LedgerError> {
        config.validate()?;
        let store = SqliteStore::init(&config).await?;
        Ok(Self::with_store(Arc::new(store), config))
    }

    /// Connect to an existing database.
    pub async fn connect(config: LedgerConfig) -> Result<Self, LedgerError> {
        config.validate()?;
        let store = SqliteStore::connect(&config).await?;
        Ok(Self::with_store(Arc::new(store), config))
    }

    /// A service over a fresh in-memory store.
    pub fn in_memory(config: LedgerConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    pub fn repository(&self) -> &WalletRepository {
        &self.repo
    }

    // ========================
    // Wallet operations
    // ========================

    pub async fn create_wallet(&self, user_id: UserId) -> Result<Wallet, LedgerError> {
        ensure_user(user_id)?;
        log_failure("create_wallet", self.repo.create_wallet(user_id).await)
    }

    /// Create a wallet funded with an opening deposit.
    pub async fn open_wallet(
        &self,
        user_id: UserId,
        initial_balance: Cents,
        details: EntryDetails,
    ) -> Result<Wallet, LedgerError> {
        ensure_user(user_id)?;
        log_failure(
            "open_wallet",
            self.repo.open_wallet(user_id, initial_balance, &details).await,
        )
    }

    /// The user's wallet with its current balance.
    pub async fn get_balance(&self, user_id: UserId) -> Result<Wallet, LedgerError> {
        ensure_user(user_id)?;
        log_failure("get_balance", self.repo.wallet_by_user(user_id).await)
    }

    pub async fn get_wallet(&self, wallet_id: WalletId) -> Result<Wallet, LedgerError> {
        ensure_wallet(wallet_id)?;
        log_failure("get_wallet", self.repo.wallet_by_id(wallet_id).await)
    }

    // ========================
    // Balance mutations
    // ========================

    pub async fn deposit(&self, user_id: UserId, amount: Cents) -> Result<Wallet, LedgerError> {
        self.deposit_with(user_id, amount, EntryDetails::default())
            .await
    }

    pub async fn deposit_with(
        &self,
        user_id: UserId,
        amount: Cents,
        details: EntryDetails,
    ) -> Result<Wallet, LedgerError> {
        ensure_user(user_id)?;
        ensure_amount(amount)?;
        log_failure(
            "deposit",
            self.repo.deposit(user_id, amount, &details).await,
        )
    }

    pub async fn withdraw(&self, user_id: UserId, amount: Cents) -> Result<Wallet, LedgerError> {
        self.withdraw_with(user_id, amount, EntryDetails::default())
            .await
    }

    pub async fn withdraw_with(
        &self,
        user_id: UserId,
        amount: Cents,
        details: EntryDetails,
    ) -> Result<Wallet, LedgerError> {
        ensure_user(user_id)?;
        ensure_amount(amount)?;
        log_failure(
            "withdraw",
            self.repo.withdraw(user_id, amount, &details).await,
        )
    }

    pub async fn transfer(
        &self,
        from: WalletId,
        to: WalletId,
        amount: Cents,
    ) -> Result<TransferReceipt, LedgerError> {
        self.transfer_with(from, to, amount, EntryDetails::default())
            .await
    }

    pub async fn transfer_with(
        &self,
        from: WalletId,
        to: WalletId,
        amount: Cents,
        details: EntryDetails,
    ) -> Result<TransferReceipt, LedgerError> {
        ensure_wallet(from)?;
        ensure_wallet(to)?;
        ensure_amount(amount)?;
        if from == to {
            return Err(LedgerError::InvalidOperation(
                "Cannot transfer to the same wallet".to_string(),
            ));
        }
        log_failure(
            "transfer",
            self.repo.transfer_funds(from, to, amount, &details).await,
        )
    }

    // ========================
    // History and integrity
    // ========================

    pub async fn list_transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        ensure_wallet(wallet_id)?;
        log_failure(
            "list_transactions",
            self.repo.list_transactions(wallet_id).await,
        )
    }

    /// Check ledger integrity and return a report.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        log_failure("check_integrity", self.repo.integrity_report().await)
    }
}

fn ensure_user(user_id: UserId) -> Result<(), LedgerError> {
    if user_id <= 0 {
        return Err(LedgerError::InvalidOperation(
            "A valid user id is required".to_string(),
        ));
    }
    Ok(())
}

fn ensure_wallet(wallet_id: WalletId) -> Result<(), LedgerError> {
    if wallet_id <= 0 {
        return Err(LedgerError::InvalidOperation(
            "A valid wallet id is required".to_string(),
        ));
    }
    Ok(())
}

fn ensure_amount(amount: Cents) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(
            "Amount must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Storage faults are logged as errors; business outcomes only at debug.
fn log_failure<T>(operation: &str, result: Result<T, LedgerError>) -> Result<T, LedgerError> {
    if let Err(err) = &result {
        match err {
            LedgerError::Storage(cause) => error!(operation, error = ?cause, "storage failure"),
            other => debug!(operation, error = %other, "request rejected"),
        }
    }
    result
}

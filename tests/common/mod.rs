// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use kassa::application::LedgerService;
use kassa::domain::{
    Cents, Clock, IntegrityStats, NewTransaction, Transaction, UserId, Wallet, WalletId,
};
use kassa::storage::{LedgerStore, LedgerTx, MemoryStore, SqliteStore};
use kassa::LedgerConfig;
use tempfile::TempDir;

/// Helper to create a test service with a temporary SQLite database
pub async fn sqlite_service() -> Result<(LedgerService, TempDir)> {
    sqlite_service_with(|_| {}).await
}

pub async fn sqlite_service_with(
    tweak: impl FnOnce(&mut LedgerConfig),
) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let mut config = LedgerConfig::for_path(db_path.to_str().unwrap());
    tweak(&mut config);
    let service = LedgerService::init(config).await?;
    Ok((service, temp_dir))
}

/// SQLite-backed service whose timestamps come from `clock`
pub async fn sqlite_service_with_clock(clock: Arc<ManualClock>) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let config = LedgerConfig::for_path(db_path.to_str().unwrap());
    let store = SqliteStore::init(&config).await?;
    let service = LedgerService::with_clock(Arc::new(store), clock, config);
    Ok((service, temp_dir))
}

pub fn memory_service() -> LedgerService {
    LedgerService::in_memory(LedgerConfig::default())
}

/// Fund a user's wallet, creating it on the way.
pub async fn funded_wallet(service: &LedgerService, user_id: UserId, amount: Cents) -> Result<Wallet> {
    let wallet = service.create_wallet(user_id).await?;
    if amount > 0 {
        return Ok(service.deposit(user_id, amount).await?);
    }
    Ok(wallet)
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(rfc3339: &str) -> Self {
        let now = DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc);
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn epoch() -> Self {
        Self {
            now: Mutex::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// What a [`FaultyStore`] does wrong.
#[derive(Clone, Copy)]
pub enum Fault {
    /// Sleep before every lock call
    StallOnLock(Duration),
    /// Fail the nth append (1-based) of each transaction
    FailAppend(usize),
    /// Fail the integrity scan
    FailIntegrityScan,
}

/// Wraps a [`MemoryStore`] and injects a fault into its transactions.
#[derive(Clone)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    fault: Fault,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore, fault: Fault) -> Self {
        Self { inner, fault }
    }
}

#[async_trait]
impl LedgerStore for FaultyStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        Ok(Box::new(FaultyTx {
            inner: self.inner.begin().await?,
            fault: self.fault,
            appends: 0,
        }))
    }

    async fn wallet_by_id(&self, id: WalletId) -> Result<Option<Wallet>> {
        self.inner.wallet_by_id(id).await
    }

    async fn wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>> {
        self.inner.wallet_by_user(user_id).await
    }

    async fn transactions_from_wallet(&self, wallet_id: WalletId) -> Result<Vec<Transaction>> {
        self.inner.transactions_from_wallet(wallet_id).await
    }

    async fn integrity_stats(&self) -> Result<IntegrityStats> {
        if let Fault::FailIntegrityScan = self.fault {
            bail!("injected failure on integrity scan");
        }
        self.inner.integrity_stats().await
    }
}

struct FaultyTx {
    inner: Box<dyn LedgerTx>,
    fault: Fault,
    appends: usize,
}

impl FaultyTx {
    async fn stall(fault: Fault) {
        if let Fault::StallOnLock(delay) = fault {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl LedgerTx for FaultyTx {
    async fn lock_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>> {
        FaultyTx::stall(self.fault).await;
        self.inner.lock_wallet(id).await
    }

    async fn lock_wallet_by_user(&mut self, user_id: UserId) -> Result<Option<Wallet>> {
        FaultyTx::stall(self.fault).await;
        self.inner.lock_wallet_by_user(user_id).await
    }

    async fn insert_wallet(
        &mut self,
        user_id: UserId,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Result<Wallet> {
        self.inner.insert_wallet(user_id, currency, now).await
    }

    async fn set_balance(
        &mut self,
        id: WalletId,
        balance: Cents,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.set_balance(id, balance, now).await
    }

    async fn append(&mut self, entry: NewTransaction, now: DateTime<Utc>) -> Result<Transaction> {
        self.appends += 1;
        let nth = self.appends;
        if let Fault::FailAppend(target) = self.fault {
            if nth == target {
                bail!("injected failure on append #{nth}");
            }
        }
        self.inner.append(entry, now).await
    }

    async fn commit(&mut self) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.inner.rollback().await
    }
}

/// Service over a faulty wrapper of `inner`, sharing its state.
pub fn faulty_service(inner: &MemoryStore, fault: Fault, config: LedgerConfig) -> LedgerService {
    LedgerService::with_store(Arc::new(FaultyStore::new(inner.clone(), fault)), config)
}

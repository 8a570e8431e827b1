use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Cents, IntegrityStats, NewTransaction, Transaction, UserId, Wallet, WalletId,
};

/// Durable home of wallets and the transaction log.
///
/// Reads issued directly on the store are unlocked point-in-time snapshots.
/// Anything that feeds a balance write must be re-read through [`LedgerTx`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a store transaction. Nothing it does is visible to others until
    /// [`LedgerTx::commit`]; dropping it uncommitted discards its writes.
    async fn begin(&self) -> Result<Box<dyn LedgerTx>>;

    async fn wallet_by_id(&self, id: WalletId) -> Result<Option<Wallet>>;

    async fn wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>>;

    /// Entries whose `from_wallet` is `wallet_id`, newest first
    /// (`created_at DESC, id DESC`).
    async fn transactions_from_wallet(&self, wallet_id: WalletId) -> Result<Vec<Transaction>>;

    async fn integrity_stats(&self) -> Result<IntegrityStats>;
}

/// One open store transaction.
///
/// The `lock_*` calls take an exclusive lock on the wallet row that is held
/// until commit or rollback. Callers locking more than one wallet must do so
/// in ascending id order.
#[async_trait]
pub trait LedgerTx: Send {
    async fn lock_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>>;

    async fn lock_wallet_by_user(&mut self, user_id: UserId) -> Result<Option<Wallet>>;

    /// Insert a zero-balance wallet. The new row is locked by this transaction.
    async fn insert_wallet(
        &mut self,
        user_id: UserId,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Result<Wallet>;

    async fn set_balance(&mut self, id: WalletId, balance: Cents, now: DateTime<Utc>)
    -> Result<()>;

    async fn append(&mut self, entry: NewTransaction, now: DateTime<Utc>) -> Result<Transaction>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

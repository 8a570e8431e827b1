use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::domain::{
    Cents, IntegrityStats, NewTransaction, Transaction, TransactionId, UserId, Wallet, WalletId,
    count_unpaired_legs,
};

use super::{LedgerStore, LedgerTx};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    wallets: BTreeMap<WalletId, Wallet>,
    transactions: Vec<Transaction>,
    next_wallet_id: WalletId,
    next_transaction_id: TransactionId,
}

impl MemoryState {
    fn wallet_by_user(&self, user_id: UserId) -> Option<&Wallet> {
        self.wallets.values().find(|w| w.user_id == user_id)
    }
}

/// In-process ledger store for tests and ephemeral use.
///
/// A transaction holds the single writer lock for its whole life, so every
/// transaction is serialized. It works on a staged copy that replaces the
/// shared state on commit; rollback or drop discards it. The schema
/// constraints of the SQLite store are enforced here as well.
///
/// Snapshot reads never take the writer lock: they see the last committed
/// state, so they do not wait behind an open transaction.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    committed: Arc<RwLock<Arc<MemoryState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn snapshot(&self) -> Arc<MemoryState> {
        Arc::clone(&*self.committed.read().await)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx {
            guard: Some(guard),
            committed: Arc::clone(&self.committed),
            staged,
        }))
    }

    async fn wallet_by_id(&self, id: WalletId) -> Result<Option<Wallet>> {
        Ok(self.snapshot().await.wallets.get(&id).cloned())
    }

    async fn wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>> {
        Ok(self.snapshot().await.wallet_by_user(user_id).cloned())
    }

    async fn transactions_from_wallet(&self, wallet_id: WalletId) -> Result<Vec<Transaction>> {
        let state = self.snapshot().await;
        let mut entries: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|t| t.from_wallet == Some(wallet_id))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(entries)
    }

    async fn integrity_stats(&self) -> Result<IntegrityStats> {
        let state = self.snapshot().await;
        Ok(IntegrityStats {
            wallet_count: state.wallets.len() as i64,
            transaction_count: state.transactions.len() as i64,
            negative_balances: state.wallets.values().filter(|w| w.balance < 0).count() as i64,
            invalid_amounts: state.transactions.iter().filter(|t| t.amount <= 0).count() as i64,
            negative_fees: state.transactions.iter().filter(|t| t.fee < 0).count() as i64,
            unpaired_transfer_legs: count_unpaired_legs(&state.transactions),
        })
    }
}

struct MemoryTx {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    committed: Arc<RwLock<Arc<MemoryState>>>,
    staged: MemoryState,
}

impl MemoryTx {
    fn ensure_open(&self) -> Result<()> {
        self.guard
            .as_ref()
            .map(|_| ())
            .context("Transaction already finished")
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>> {
        self.ensure_open()?;
        Ok(self.staged.wallets.get(&id).cloned())
    }

    async fn lock_wallet_by_user(&mut self, user_id: UserId) -> Result<Option<Wallet>> {
        self.ensure_open()?;
        Ok(self.staged.wallet_by_user(user_id).cloned())
    }

    async fn insert_wallet(
        &mut self,
        user_id: UserId,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Result<Wallet> {
        self.ensure_open()?;
        if self.staged.wallet_by_user(user_id).is_some() {
            bail!("Failed to insert wallet: user {user_id} already has one");
        }

        self.staged.next_wallet_id += 1;
        let wallet = Wallet {
            id: self.staged.next_wallet_id,
            user_id,
            balance: 0,
            currency: currency.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.staged.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn set_balance(
        &mut self,
        id: WalletId,
        balance: Cents,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_open()?;
        if balance < 0 {
            bail!("Failed to update wallet balance: {balance} is negative");
        }
        let wallet = self
            .staged
            .wallets
            .get_mut(&id)
            .with_context(|| format!("Wallet {id} vanished while locked"))?;
        wallet.balance = balance;
        wallet.updated_at = now;
        Ok(())
    }

    async fn append(&mut self, entry: NewTransaction, now: DateTime<Utc>) -> Result<Transaction> {
        self.ensure_open()?;
        if entry.amount <= 0 || entry.fee < 0 {
            bail!("Failed to log {} transaction: invalid amount or fee", entry.kind);
        }
        for wallet in [entry.from_wallet, entry.to_wallet].into_iter().flatten() {
            if !self.staged.wallets.contains_key(&wallet) {
                bail!("Failed to log {} transaction: unknown wallet {wallet}", entry.kind);
            }
        }

        self.staged.next_transaction_id += 1;
        let logged = Transaction::from_new(self.staged.next_transaction_id, entry, now);
        self.staged.transactions.push(logged.clone());
        Ok(logged)
    }

    async fn commit(&mut self) -> Result<()> {
        let mut guard = self.guard.take().context("Transaction already finished")?;
        // Published while the writer lock is still held
        *self.committed.write().await = Arc::new(self.staged.clone());
        *guard = std::mem::take(&mut self.staged);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.guard.take().context("Transaction already finished")?;
        Ok(())
    }
}

use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::domain::{
    Cents, Clock, EntryDetails, IntegrityReport, NewTransaction, Transaction, UserId, Wallet,
    WalletId, build_integrity_report,
};
use crate::error::LedgerError;

use super::{LedgerStore, LedgerTx};

/// Both sides of a committed transfer.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub sender: Wallet,
    pub receiver: Wallet,
    pub debit: Transaction,
    pub credit: Transaction,
}

/// Wallet operations on top of a [`LedgerStore`].
///
/// Holds no cached wallet state: every mutation re-reads the authoritative
/// balance under lock, writes the new balance and its log entries, and
/// commits them as one unit.
pub struct WalletRepository {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl WalletRepository {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Run one store-transaction-scoped operation under the configured
    /// deadline. On expiry the future, and with it the open transaction, is
    /// dropped, which rolls the transaction back.
    async fn with_deadline<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        match tokio::time::timeout(self.config.tx_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.config.tx_timeout.as_millis() as u64,
                    "deadline elapsed, transaction rolled back"
                );
                Err(LedgerError::Storage(anyhow!(
                    "{operation} did not finish within {:?}",
                    self.config.tx_timeout
                )))
            }
        }
    }

    // ========================
    // Lookups
    // ========================

    /// Unlocked snapshot read.
    pub async fn wallet_by_id(&self, id: WalletId) -> Result<Wallet, LedgerError> {
        self.store
            .wallet_by_id(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("wallet {id}")))
    }

    /// Unlocked snapshot read.
    pub async fn wallet_by_user(&self, user_id: UserId) -> Result<Wallet, LedgerError> {
        self.store
            .wallet_by_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("wallet for user {user_id}")))
    }

    /// Entries recorded from this wallet's side, newest first. Each call is a
    /// fresh query; unknown wallets simply have no entries.
    pub async fn list_transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.store.transactions_from_wallet(wallet_id).await?)
    }

    // ========================
    // Mutations
    // ========================

    /// Create an empty wallet in the default currency. One wallet per user.
    pub async fn create_wallet(&self, user_id: UserId) -> Result<Wallet, LedgerError> {
        self.open_wallet(user_id, 0, &EntryDetails::default()).await
    }

    /// Create a wallet and, when `initial_deposit` is positive, fund it with a
    /// logged deposit in the same transaction.
    pub async fn open_wallet(
        &self,
        user_id: UserId,
        initial_deposit: Cents,
        details: &EntryDetails,
    ) -> Result<Wallet, LedgerError> {
        if initial_deposit < 0 {
            return Err(LedgerError::InvalidAmount(
                "Opening balance must not be negative".to_string(),
            ));
        }
        ensure_valid_fee(details)?;

        let wallet = self
            .with_deadline("create_wallet", async {
                let mut tx = self.store.begin().await?;
                if tx.lock_wallet_by_user(user_id).await?.is_some() {
                    return abort(
                        tx,
                        LedgerError::AlreadyExists(format!("wallet for user {user_id}")),
                    )
                    .await;
                }

                let now = self.clock.now();
                let mut wallet = tx
                    .insert_wallet(user_id, &self.config.default_currency, now)
                    .await?;

                if initial_deposit > 0 {
                    tx.set_balance(wallet.id, initial_deposit, now).await?;
                    tx.append(
                        NewTransaction::deposit(wallet.id, initial_deposit, details),
                        now,
                    )
                    .await?;
                    wallet.balance = initial_deposit;
                }

                tx.commit().await?;
                Ok(wallet)
            })
            .await?;

        info!(
            wallet_id = wallet.id,
            user_id,
            balance = wallet.balance,
            "wallet created"
        );
        Ok(wallet)
    }

    /// Credit the user's wallet. Without a wallet, one is created first when
    /// `auto_provision_on_deposit` is set; otherwise this fails with not-found.
    pub async fn deposit(
        &self,
        user_id: UserId,
        amount: Cents,
        details: &EntryDetails,
    ) -> Result<Wallet, LedgerError> {
        ensure_positive(amount)?;
        ensure_valid_fee(details)?;

        let wallet = self
            .with_deadline("deposit", async {
                let mut tx = self.store.begin().await?;
                let locked = tx.lock_wallet_by_user(user_id).await?;
                let now = self.clock.now();

                let wallet = match locked {
                    Some(wallet) => wallet,
                    None if self.config.auto_provision_on_deposit => {
                        debug!(user_id, "provisioning wallet on first deposit");
                        tx.insert_wallet(user_id, &self.config.default_currency, now)
                            .await?
                    }
                    None => {
                        return abort(
                            tx,
                            LedgerError::NotFound(format!("wallet for user {user_id}")),
                        )
                        .await;
                    }
                };

                let Some(balance) = wallet.credited(amount) else {
                    return abort(
                        tx,
                        LedgerError::InvalidAmount("Deposit would overflow the balance".into()),
                    )
                    .await;
                };

                tx.set_balance(wallet.id, balance, now).await?;
                tx.append(NewTransaction::deposit(wallet.id, amount, details), now)
                    .await?;
                tx.commit().await?;

                Ok(Wallet {
                    balance,
                    updated_at: now,
                    ..wallet
                })
            })
            .await?;

        info!(wallet_id = wallet.id, user_id, amount, balance = wallet.balance, "deposit");
        Ok(wallet)
    }

    /// Debit the user's wallet; the balance never drops below zero.
    pub async fn withdraw(
        &self,
        user_id: UserId,
        amount: Cents,
        details: &EntryDetails,
    ) -> Result<Wallet, LedgerError> {
        ensure_positive(amount)?;
        ensure_valid_fee(details)?;

        let wallet = self
            .with_deadline("withdraw", async {
                let mut tx = self.store.begin().await?;

                let Some(wallet) = tx.lock_wallet_by_user(user_id).await? else {
                    return abort(
                        tx,
                        LedgerError::NotFound(format!("wallet for user {user_id}")),
                    )
                    .await;
                };

                let Some(balance) = wallet.debited(amount) else {
                    return abort(
                        tx,
                        LedgerError::InsufficientFunds {
                            wallet_id: wallet.id,
                            balance: wallet.balance,
                            required: amount,
                        },
                    )
                    .await;
                };

                let now = self.clock.now();
                tx.set_balance(wallet.id, balance, now).await?;
                tx.append(NewTransaction::withdrawal(wallet.id, amount, details), now)
                    .await?;
                tx.commit().await?;

                Ok(Wallet {
                    balance,
                    updated_at: now,
                    ..wallet
                })
            })
            .await?;

        info!(wallet_id = wallet.id, user_id, amount, balance = wallet.balance, "withdrawal");
        Ok(wallet)
    }

    /// Move `amount` between two wallets in one transaction.
    ///
    /// Both rows are locked in ascending id order whatever the direction, so
    /// concurrent A->B and B->A transfers queue up instead of deadlocking.
    /// Funds are checked only once both locks are held.
    pub async fn transfer_funds(
        &self,
        from: WalletId,
        to: WalletId,
        amount: Cents,
        details: &EntryDetails,
    ) -> Result<TransferReceipt, LedgerError> {
        ensure_positive(amount)?;
        ensure_valid_fee(details)?;
        if from == to {
            return Err(LedgerError::InvalidOperation(
                "Cannot transfer to the same wallet".to_string(),
            ));
        }

        let receipt = self
            .with_deadline("transfer", async {
                let mut tx = self.store.begin().await?;

                let (low, high) = if from < to { (from, to) } else { (to, from) };
                let Some(low_wallet) = tx.lock_wallet(low).await? else {
                    return abort(tx, LedgerError::NotFound(format!("wallet {low}"))).await;
                };
                let Some(high_wallet) = tx.lock_wallet(high).await? else {
                    return abort(tx, LedgerError::NotFound(format!("wallet {high}"))).await;
                };
                let (sender, receiver) = if from < to {
                    (low_wallet, high_wallet)
                } else {
                    (high_wallet, low_wallet)
                };

                if sender.currency != receiver.currency {
                    return abort(
                        tx,
                        LedgerError::InvalidOperation(format!(
                            "Currency mismatch between wallets: {} vs {}",
                            sender.currency, receiver.currency
                        )),
                    )
                    .await;
                }

                let Some(sender_balance) = sender.debited(amount) else {
                    return abort(
                        tx,
                        LedgerError::InsufficientFunds {
                            wallet_id: sender.id,
                            balance: sender.balance,
                            required: amount,
                        },
                    )
                    .await;
                };
                let Some(receiver_balance) = receiver.credited(amount) else {
                    return abort(
                        tx,
                        LedgerError::InvalidAmount("Transfer would overflow the receiver".into()),
                    )
                    .await;
                };

                let now = self.clock.now();
                tx.set_balance(sender.id, sender_balance, now).await?;
                tx.set_balance(receiver.id, receiver_balance, now).await?;

                let [debit, credit] =
                    NewTransaction::transfer_legs(sender.id, receiver.id, amount, details);
                let debit = tx.append(debit, now).await?;
                let credit = tx.append(credit, now).await?;
                tx.commit().await?;

                Ok(TransferReceipt {
                    sender: Wallet {
                        balance: sender_balance,
                        updated_at: now,
                        ..sender
                    },
                    receiver: Wallet {
                        balance: receiver_balance,
                        updated_at: now,
                        ..receiver
                    },
                    debit,
                    credit,
                })
            })
            .await?;

        info!(from, to, amount, "transfer");
        Ok(receipt)
    }

    /// Overwrite a wallet's balance without logging anything.
    ///
    /// Low-level primitive: it skips the amount and sufficiency rules and
    /// leaves the log out of step with the balance. Not exposed by the
    /// service layer.
    pub async fn update_wallet_balance(
        &self,
        wallet_id: WalletId,
        new_balance: Cents,
    ) -> Result<Wallet, LedgerError> {
        if new_balance < 0 {
            return Err(LedgerError::InvalidAmount(
                "Balance must not be negative".to_string(),
            ));
        }

        self.with_deadline("update_wallet_balance", async {
            let mut tx = self.store.begin().await?;
            let Some(wallet) = tx.lock_wallet(wallet_id).await? else {
                return abort(tx, LedgerError::NotFound(format!("wallet {wallet_id}"))).await;
            };

            let now = self.clock.now();
            tx.set_balance(wallet_id, new_balance, now).await?;
            tx.commit().await?;

            warn!(wallet_id, new_balance, "balance overwritten without a ledger entry");
            Ok(Wallet {
                balance: new_balance,
                updated_at: now,
                ..wallet
            })
        })
        .await
    }

    /// Unlocked consistency scan over all wallets and entries.
    pub async fn integrity_report(&self) -> Result<IntegrityReport, LedgerError> {
        let stats = self.store.integrity_stats().await?;
        let report = build_integrity_report(&stats);
        if !report.is_healthy() {
            warn!(issues = report.issues.len(), "ledger integrity issues found");
        }
        Ok(report)
    }
}

/// Roll back and surface `err`. A failing rollback is only logged: the
/// transaction is discarded either way and the business error is what the
/// caller needs.
async fn abort<T>(mut tx: Box<dyn LedgerTx>, err: LedgerError) -> Result<T, LedgerError> {
    if let Err(rollback_err) = tx.rollback().await {
        warn!(error = %rollback_err, "rollback failed");
    }
    Err(err)
}

fn ensure_positive(amount: Cents) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(
            "Amount must be positive".to_string(),
        ));
    }
    Ok(())
}

fn ensure_valid_fee(details: &EntryDetails) -> Result<(), LedgerError> {
    if details.fee < 0 {
        return Err(LedgerError::InvalidAmount(
            "Fee must not be negative".to_string(),
        ));
    }
    Ok(())
}

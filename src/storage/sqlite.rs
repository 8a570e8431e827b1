use std::str::FromStr;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::debug;

use crate::config::LedgerConfig;
use crate::domain::{
    Cents, IntegrityStats, NewTransaction, Transaction, TransactionKind, TransactionStatus,
    UserId, Wallet, WalletId,
};

use super::{LedgerStore, LedgerTx, MIGRATION_001_INITIAL};

const WALLET_COLUMNS: &str = "id, user_id, balance, currency, created_at, updated_at";

/// SQLite-backed ledger store.
///
/// SQLite has no `SELECT ... FOR UPDATE`. A transaction locks a wallet with a
/// no-op `UPDATE`, which takes the database write lock (waiting up to the
/// configured busy timeout) and keeps it until commit or rollback. Writers are
/// therefore serialized; snapshot reads on the pool proceed concurrently
/// under WAL.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store over an existing connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn open(config: &LedgerConfig, create_if_missing: bool) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .with_context(|| format!("Invalid database URL: {}", config.database_url))?
            .create_if_missing(create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Ok(Self::new(pool))
    }

    /// Connect to an existing database.
    pub async fn connect(config: &LedgerConfig) -> Result<Self> {
        Self::open(config, false).await
    }

    /// Create the database if needed and bring its schema up to date.
    pub async fn init(config: &LedgerConfig) -> Result<Self> {
        let store = Self::open(config, true).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    async fn count(&self, sql: &str) -> Result<i64> {
        let row = sqlx::query(sql)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to run integrity query: {sql}"))?;
        Ok(row.get("count"))
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(Box::new(SqliteTx { tx: Some(tx) }))
    }

    async fn wallet_by_id(&self, id: WalletId) -> Result<Option<Wallet>> {
        let row = sqlx::query(&format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch wallet")?;

        row.as_ref().map(row_to_wallet).transpose()
    }

    async fn wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = ?"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch wallet by user")?;

        row.as_ref().map(row_to_wallet).transpose()
    }

    async fn transactions_from_wallet(&self, wallet_id: WalletId) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, type, from_wallet_id, to_wallet_id, amount, fee, note, status, created_at
            FROM transactions
            WHERE from_wallet_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions for wallet")?;

        rows.iter().map(row_to_transaction).collect()
    }

    async fn integrity_stats(&self) -> Result<IntegrityStats> {
        let wallet_count = self.count("SELECT COUNT(*) AS count FROM wallets").await?;
        let transaction_count = self
            .count("SELECT COUNT(*) AS count FROM transactions")
            .await?;
        let negative_balances = self
            .count("SELECT COUNT(*) AS count FROM wallets WHERE balance < 0")
            .await?;
        let invalid_amounts = self
            .count("SELECT COUNT(*) AS count FROM transactions WHERE amount <= 0")
            .await?;
        let negative_fees = self
            .count("SELECT COUNT(*) AS count FROM transactions WHERE fee < 0")
            .await?;

        // Legs are appended back to back, so a debit at id n pairs with the
        // credit at id n + 1.
        let orphan_debits = self
            .count(
                r#"
                SELECT COUNT(*) AS count
                FROM transactions d
                WHERE d.type = 'transfer-debit'
                  AND NOT EXISTS (
                    SELECT 1 FROM transactions c
                    WHERE c.id = d.id + 1
                      AND c.type = 'transfer-credit'
                      AND c.from_wallet_id = d.to_wallet_id
                      AND c.to_wallet_id = d.from_wallet_id
                      AND c.amount = d.amount
                  )
                "#,
            )
            .await?;
        let orphan_credits = self
            .count(
                r#"
                SELECT COUNT(*) AS count
                FROM transactions c
                WHERE c.type = 'transfer-credit'
                  AND NOT EXISTS (
                    SELECT 1 FROM transactions d
                    WHERE d.id = c.id - 1
                      AND d.type = 'transfer-debit'
                      AND d.from_wallet_id = c.to_wallet_id
                      AND d.to_wallet_id = c.from_wallet_id
                      AND d.amount = c.amount
                  )
                "#,
            )
            .await?;

        Ok(IntegrityStats {
            wallet_count,
            transaction_count,
            negative_balances,
            invalid_amounts,
            negative_fees,
            unpaired_transfer_legs: orphan_debits + orphan_credits,
        })
    }
}

struct SqliteTx {
    /// `None` once committed or rolled back. Dropping a live transaction
    /// makes sqlx roll it back.
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
}

impl SqliteTx {
    fn conn(&mut self) -> Result<&mut SqliteConnection> {
        self.tx
            .as_deref_mut()
            .context("Transaction already finished")
    }
}

#[async_trait]
impl LedgerTx for SqliteTx {
    async fn lock_wallet(&mut self, id: WalletId) -> Result<Option<Wallet>> {
        let conn = self.conn()?;
        let row = sqlx::query(&format!(
            "UPDATE wallets SET balance = balance WHERE id = ? RETURNING {WALLET_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to lock wallet")?;

        row.as_ref().map(row_to_wallet).transpose()
    }

    async fn lock_wallet_by_user(&mut self, user_id: UserId) -> Result<Option<Wallet>> {
        let conn = self.conn()?;
        let row = sqlx::query(&format!(
            "UPDATE wallets SET balance = balance WHERE user_id = ? RETURNING {WALLET_COLUMNS}"
        ))
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to lock wallet by user")?;

        row.as_ref().map(row_to_wallet).transpose()
    }

    async fn insert_wallet(
        &mut self,
        user_id: UserId,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Result<Wallet> {
        let conn = self.conn()?;
        let now_str = encode_timestamp(now);
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO wallets (user_id, balance, currency, created_at, updated_at)
            VALUES (?, 0, ?, ?, ?)
            RETURNING {WALLET_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(currency)
        .bind(&now_str)
        .bind(&now_str)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to insert wallet")?;

        row_to_wallet(&row)
    }

    async fn set_balance(
        &mut self,
        id: WalletId,
        balance: Cents,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let result = sqlx::query("UPDATE wallets SET balance = ?, updated_at = ? WHERE id = ?")
            .bind(balance)
            .bind(encode_timestamp(now))
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to update wallet balance")?;

        if result.rows_affected() != 1 {
            bail!("Wallet {id} vanished while locked");
        }
        Ok(())
    }

    async fn append(&mut self, entry: NewTransaction, now: DateTime<Utc>) -> Result<Transaction> {
        let conn = self.conn()?;
        let row = sqlx::query(
            r#"
            INSERT INTO transactions (type, from_wallet_id, to_wallet_id, amount, fee, note, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(entry.kind.as_str())
        .bind(entry.from_wallet)
        .bind(entry.to_wallet)
        .bind(entry.amount)
        .bind(entry.fee)
        .bind(&entry.note)
        .bind(entry.status.as_str())
        .bind(encode_timestamp(now))
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("Failed to log {} transaction", entry.kind))?;

        let id: i64 = row.get("id");
        debug!(transaction_id = id, kind = %entry.kind, "appended ledger entry");
        Ok(Transaction::from_new(id, entry, now))
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self.tx.take().context("Transaction already finished")?;
        tx.commit().await.context("Failed to commit transaction")
    }

    async fn rollback(&mut self) -> Result<()> {
        let tx = self.tx.take().context("Transaction already finished")?;
        tx.rollback()
            .await
            .context("Failed to roll back transaction")
    }
}

/// Fixed-width RFC 3339 so that lexical order on the column is chronological.
fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid {column} timestamp"))?
        .with_timezone(&Utc))
}

fn row_to_wallet(row: &SqliteRow) -> Result<Wallet> {
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Wallet {
        id: row.get("id"),
        user_id: row.get("user_id"),
        balance: row.get("balance"),
        currency: row.get("currency"),
        created_at: decode_timestamp(&created_at, "created_at")?,
        updated_at: decode_timestamp(&updated_at, "updated_at")?,
    })
}

fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
    let kind: String = row.get("type");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");

    Ok(Transaction {
        id: row.get("id"),
        kind: TransactionKind::from_str(&kind)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction type: {}", kind))?,
        from_wallet: row.get("from_wallet_id"),
        to_wallet: row.get("to_wallet_id"),
        amount: row.get("amount"),
        fee: row.get("fee"),
        note: row.get("note"),
        status: TransactionStatus::from_str(&status)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction status: {}", status))?,
        created_at: decode_timestamp(&created_at, "created_at")?,
    })
}

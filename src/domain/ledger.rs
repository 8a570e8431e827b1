use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::{Transaction, TransactionId, TransactionKind};

/// Source of timestamps for wallets and ledger entries.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Raw counters gathered by a store for an integrity check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityStats {
    pub wallet_count: i64,
    pub transaction_count: i64,
    pub negative_balances: i64,
    pub invalid_amounts: i64,
    pub negative_fees: i64,
    pub unpaired_transfer_legs: i64,
}

#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub wallet_count: i64,
    pub transaction_count: i64,
    pub issues: Vec<String>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

pub fn build_integrity_report(stats: &IntegrityStats) -> IntegrityReport {
    let mut issues = Vec::new();

    if stats.negative_balances > 0 {
        issues.push(format!(
            "{} wallet(s) have a negative balance",
            stats.negative_balances
        ));
    }
    if stats.invalid_amounts > 0 {
        issues.push(format!(
            "{} entr(ies) have a non-positive amount",
            stats.invalid_amounts
        ));
    }
    if stats.negative_fees > 0 {
        issues.push(format!("{} entr(ies) have a negative fee", stats.negative_fees));
    }
    if stats.unpaired_transfer_legs > 0 {
        issues.push(format!(
            "{} transfer leg(s) lack their counterpart",
            stats.unpaired_transfer_legs
        ));
    }

    IntegrityReport {
        wallet_count: stats.wallet_count,
        transaction_count: stats.transaction_count,
        issues,
    }
}

/// Count transfer legs whose mirror entry is missing.
///
/// Both legs are appended back to back inside one store transaction, so a
/// debit with id `n` must be followed by its credit at id `n + 1`.
pub fn count_unpaired_legs(entries: &[Transaction]) -> i64 {
    let by_id: HashMap<TransactionId, &Transaction> = entries.iter().map(|t| (t.id, t)).collect();

    let mirrors = |debit: &Transaction, credit: &Transaction| {
        debit.kind == TransactionKind::TransferDebit
            && credit.kind == TransactionKind::TransferCredit
            && debit.from_wallet == credit.to_wallet
            && debit.to_wallet == credit.from_wallet
            && debit.amount == credit.amount
    };

    entries
        .iter()
        .filter(|entry| entry.kind.is_transfer_leg())
        .filter(|entry| {
            let paired = if entry.kind == TransactionKind::TransferDebit {
                by_id
                    .get(&(entry.id + 1))
                    .is_some_and(|credit| mirrors(entry, credit))
            } else {
                by_id
                    .get(&(entry.id - 1))
                    .is_some_and(|debit| mirrors(debit, entry))
            };
            !paired
        })
        .count() as i64
}

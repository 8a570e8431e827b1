use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, WalletId};

pub type TransactionId = i64;

/// What a ledger entry records. A transfer is written as two entries,
/// one per leg, so each wallet's history is self-contained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    TransferDebit,
    TransferCredit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::TransferDebit => "transfer-debit",
            TransactionKind::TransferCredit => "transfer-credit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionKind::Deposit),
            "withdrawal" => Some(TransactionKind::Withdrawal),
            "transfer-debit" => Some(TransactionKind::TransferDebit),
            "transfer-credit" => Some(TransactionKind::TransferCredit),
            _ => None,
        }
    }

    pub fn is_transfer_leg(&self) -> bool {
        matches!(
            self,
            TransactionKind::TransferDebit | TransactionKind::TransferCredit
        )
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Completed,
    /// Not produced by the current write paths; entries are only appended
    /// once the mutation they describe has succeeded.
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

/// Informational extras attached to a balance mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryDetails {
    /// Flat fee, recorded only. It never changes a balance.
    pub fee: Cents,
    pub note: Option<String>,
}

impl EntryDetails {
    pub fn with_fee(mut self, fee: Cents) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// An entry waiting to be appended. The store assigns id and created_at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub from_wallet: Option<WalletId>,
    pub to_wallet: Option<WalletId>,
    pub amount: Cents,
    pub fee: Cents,
    pub note: Option<String>,
    pub status: TransactionStatus,
}

impl NewTransaction {
    fn completed(
        kind: TransactionKind,
        from_wallet: WalletId,
        to_wallet: Option<WalletId>,
        amount: Cents,
        details: &EntryDetails,
    ) -> Self {
        Self {
            kind,
            from_wallet: Some(from_wallet),
            to_wallet,
            amount,
            fee: details.fee,
            note: details.note.clone(),
            status: TransactionStatus::Completed,
        }
    }

    pub fn deposit(wallet: WalletId, amount: Cents, details: &EntryDetails) -> Self {
        Self::completed(TransactionKind::Deposit, wallet, None, amount, details)
    }

    pub fn withdrawal(wallet: WalletId, amount: Cents, details: &EntryDetails) -> Self {
        Self::completed(TransactionKind::Withdrawal, wallet, None, amount, details)
    }

    /// Both legs of a transfer: the debit seen from the sender and the
    /// mirrored credit seen from the receiver.
    pub fn transfer_legs(
        sender: WalletId,
        receiver: WalletId,
        amount: Cents,
        details: &EntryDetails,
    ) -> [Self; 2] {
        [
            Self::completed(
                TransactionKind::TransferDebit,
                sender,
                Some(receiver),
                amount,
                details,
            ),
            Self::completed(
                TransactionKind::TransferCredit,
                receiver,
                Some(sender),
                amount,
                details,
            ),
        ]
    }
}

/// A committed, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub from_wallet: Option<WalletId>,
    pub to_wallet: Option<WalletId>,
    pub amount: Cents,
    pub fee: Cents,
    pub note: Option<String>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn from_new(id: TransactionId, entry: NewTransaction, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: entry.kind,
            from_wallet: entry.from_wallet,
            to_wallet: entry.to_wallet,
            amount: entry.amount,
            fee: entry.fee,
            note: entry.note,
            status: entry.status,
            created_at,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Cents;

pub type WalletId = i64;

/// Identifier of an authenticated principal, validated upstream.
pub type UserId = i64;

/// Currency assigned to new wallets unless configured otherwise.
pub const DEFAULT_CURRENCY: &str = "USD";

/// A user's wallet. The balance is a projection maintained by the repository;
/// it is only ever changed inside a store transaction that also appends to
/// the transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub balance: Cents,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn can_cover(&self, amount: Cents) -> bool {
        self.balance >= amount
    }

    /// Balance after crediting `amount`, or `None` on overflow.
    pub fn credited(&self, amount: Cents) -> Option<Cents> {
        self.balance.checked_add(amount)
    }

    /// Balance after debiting `amount`, or `None` if funds are short.
    pub fn debited(&self, amount: Cents) -> Option<Cents> {
        if self.can_cover(amount) {
            Some(self.balance - amount)
        } else {
            None
        }
    }
}

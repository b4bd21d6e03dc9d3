use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::schema::types::WalletDirection;

/// Per-account balance. Never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub owner_id: Uuid,
    pub balance: Decimal,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn empty(owner_id: Uuid, currency: &str, now: DateTime<Utc>) -> Self {
        Self {
            owner_id,
            balance: Decimal::ZERO,
            currency: currency.to_string(),
            updated_at: now,
        }
    }
}

/// Immutable wallet history row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub direction: WalletDirection,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub reason: String,
    pub settlement_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Why a balance moved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionReason {
    pub description: String,
    pub settlement_id: Option<Uuid>,
}

impl TransactionReason {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            settlement_id: None,
        }
    }

    pub fn for_settlement(description: impl Into<String>, settlement_id: Uuid) -> Self {
        Self {
            description: description.into(),
            settlement_id: Some(settlement_id),
        }
    }
}

/// Capital an investor put into a host installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestorAllocation {
    pub investor_id: Uuid,
    pub host_id: Uuid,
    pub amount: Decimal,
}

/// A single balance movement, computed by the wallet store before it is applied
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceChange {
    pub owner_id: Uuid,
    pub direction: WalletDirection,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub reason: TransactionReason,
}

impl BalanceChange {
    pub fn into_transaction(self, id: Uuid, created_at: DateTime<Utc>) -> WalletTransaction {
        WalletTransaction {
            id,
            owner_id: self.owner_id,
            direction: self.direction,
            amount: self.amount,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            reason: self.reason.description,
            settlement_id: self.reason.settlement_id,
            created_at,
        }
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::schema::types::{
    ProductMode, RevenueType, SettlementKind, SettlementStatus,
};

/// One investor's cut of a host-investment settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestorShare {
    pub investor_id: Uuid,
    /// Fraction of the investor pool, 0..=1
    pub share: Decimal,
    pub amount: Decimal,
}

/// Record of one settlement attempt or refund.
///
/// On refund records the money fields describe what was returned:
/// `total_price` to the buyer, `seller_credit` taken back from the seller and
/// `platform_fee` taken out of platform revenue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub id: Uuid,
    pub kind: SettlementKind,
    pub status: SettlementStatus,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub product_mode: ProductMode,
    pub energy_kwh: Decimal,
    pub unit_price: Decimal,
    /// energy × unit price
    pub subtotal: Decimal,
    /// What the buyer pays (purchase) or receives back (refund)
    pub total_price: Decimal,
    /// Everything the platform keeps from this settlement
    pub platform_fee: Decimal,
    pub seller_credit: Decimal,
    pub investor_shares: Vec<InvestorShare>,
    pub refund_of: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SettlementRecord {
    /// Sum of investor payouts
    pub fn investor_total(&self) -> Decimal {
        self.investor_shares.iter().map(|s| s.amount).sum()
    }

    /// Whether a retried request carries the same parameters as this record
    pub fn matches_request(&self, request: &SettlementRequest) -> bool {
        self.listing_id == request.listing_id
            && self.buyer_id == request.buyer_id
            && self.energy_kwh == request.energy_kwh
    }
}

/// A buyer's request to settle one leg against one listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub energy_kwh: Decimal,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl SettlementRequest {
    pub fn new(listing_id: Uuid, buyer_id: Uuid, energy_kwh: Decimal) -> Self {
        Self {
            listing_id,
            buyer_id,
            energy_kwh,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub settlement_id: Uuid,
    /// Defaults to the full amount the buyer paid
    pub amount: Option<Decimal>,
    pub reason: String,
}

/// Append-only entry of platform income (negative for refund adjustments)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueEntry {
    pub id: Uuid,
    pub settlement_id: Uuid,
    pub amount: Decimal,
    pub revenue_type: RevenueType,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Aggregated platform revenue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformRevenueSummary {
    pub total_revenue: Decimal,
    pub platform_fees: Decimal,
    pub revenue_shares: Decimal,
    pub refund_adjustments: Decimal,
    pub settlement_count: i64,
}

impl PlatformRevenueSummary {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a RevenueEntry>) -> Self {
        let mut summary = Self::default();
        let mut settlements = std::collections::HashSet::new();
        for entry in entries {
            summary.total_revenue += entry.amount;
            match entry.revenue_type {
                RevenueType::PlatformFee => summary.platform_fees += entry.amount,
                RevenueType::RevenueShare => summary.revenue_shares += entry.amount,
                RevenueType::RefundAdjustment => summary.refund_adjustments += entry.amount,
            }
            settlements.insert(entry.settlement_id);
        }
        summary.settlement_count = settlements.len() as i64;
        summary
    }
}

/// Settlement statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettlementStats {
    pub completed_count: i64,
    pub failed_count: i64,
    pub refunded_count: i64,
    pub total_settled_value: Decimal,
    pub total_energy_kwh: Decimal,
}

// Enum types shared between the Postgres schema (see migrations/) and the
// in-memory store.

pub mod types {
    use serde::{Deserialize, Serialize};
    use std::fmt;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
    #[sqlx(type_name = "listing_status", rename_all = "lowercase")]
    #[serde(rename_all = "lowercase")]
    pub enum ListingStatus {
        Active,
        Sold,
        Expired,
        Cancelled,
    }

    impl ListingStatus {
        /// Terminal states never transition again
        pub fn is_terminal(&self) -> bool {
            !matches!(self, ListingStatus::Active)
        }
    }

    impl fmt::Display for ListingStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                ListingStatus::Active => write!(f, "active"),
                ListingStatus::Sold => write!(f, "sold"),
                ListingStatus::Expired => write!(f, "expired"),
                ListingStatus::Cancelled => write!(f, "cancelled"),
            }
        }
    }

    /// Which settlement policy a listing settles under
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
    #[sqlx(type_name = "product_mode", rename_all = "snake_case")]
    #[serde(rename_all = "snake_case")]
    pub enum ProductMode {
        Marketplace,
        HostInvestment,
    }

    impl fmt::Display for ProductMode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                ProductMode::Marketplace => write!(f, "marketplace"),
                ProductMode::HostInvestment => write!(f, "host_investment"),
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
    #[sqlx(type_name = "settlement_status", rename_all = "lowercase")]
    #[serde(rename_all = "lowercase")]
    pub enum SettlementStatus {
        Pending,
        Completed,
        Failed,
        Refunded,
    }

    impl fmt::Display for SettlementStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                SettlementStatus::Pending => write!(f, "pending"),
                SettlementStatus::Completed => write!(f, "completed"),
                SettlementStatus::Failed => write!(f, "failed"),
                SettlementStatus::Refunded => write!(f, "refunded"),
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
    #[sqlx(type_name = "settlement_kind", rename_all = "lowercase")]
    #[serde(rename_all = "lowercase")]
    pub enum SettlementKind {
        Purchase,
        Refund,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
    #[sqlx(type_name = "wallet_direction", rename_all = "lowercase")]
    #[serde(rename_all = "lowercase")]
    pub enum WalletDirection {
        Credit,
        Debit,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
    #[sqlx(type_name = "revenue_type", rename_all = "snake_case")]
    #[serde(rename_all = "snake_case")]
    pub enum RevenueType {
        PlatformFee,
        RevenueShare,
        RefundAdjustment,
    }

    impl fmt::Display for RevenueType {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                RevenueType::PlatformFee => write!(f, "platform_fee"),
                RevenueType::RevenueShare => write!(f, "revenue_share"),
                RevenueType::RefundAdjustment => write!(f, "refund_adjustment"),
            }
        }
    }

}

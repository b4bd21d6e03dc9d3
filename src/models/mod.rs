// Domain records shared by the engine services and stores

pub mod allocation;
pub mod listing;
pub mod settlement;
pub mod wallet;

pub use allocation::{
    AllocationLeg, AllocationPlan, AllocationSummary, BuyerPreferences, EnergyRequest,
    LegOutcome, PlanExecution, RankedListing, ScoreBreakdown,
};
pub use listing::{GeoPoint, Listing, ListingCandidate, ListingUpdate, NewListing, SellerReputation};
pub use settlement::{
    InvestorShare, PlatformRevenueSummary, RefundRequest, RevenueEntry, SettlementRecord,
    SettlementRequest, SettlementStats,
};
pub use wallet::{
    BalanceChange, InvestorAllocation, TransactionReason, Wallet, WalletTransaction,
};

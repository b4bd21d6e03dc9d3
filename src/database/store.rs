//! Unit-of-work seam between the engine services and persistence.
//!
//! A [`MarketTx`] is one atomic unit: everything written through it becomes
//! visible together on [`MarketTx::commit`], and dropping it without
//! committing discards every write. Row locks taken through it are held until
//! commit or drop.

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::database::schema::types::SettlementStatus;
use crate::error::Result;
use crate::models::{
    InvestorAllocation, Listing, RevenueEntry, SettlementRecord, SettlementStats, Wallet,
    WalletTransaction,
};
use crate::services::wallet::WalletStore;

#[async_trait]
pub trait MarketTx: WalletStore {
    /// Lock a listing row and return its current state.
    /// `ListingNotFound` when absent, `LockContention` when the wait elapses.
    async fn lock_listing(&mut self, listing_id: Uuid) -> Result<Listing>;

    async fn insert_listing(&mut self, listing: &Listing) -> Result<()>;

    /// Persist a listing previously returned by `lock_listing`
    async fn save_listing(&mut self, listing: &Listing) -> Result<()>;

    /// Lock a settlement record. `SettlementNotFound` when absent.
    async fn lock_settlement(&mut self, settlement_id: Uuid) -> Result<SettlementRecord>;

    /// Completed purchase previously recorded under this buyer's idempotency key
    async fn find_settlement_by_key(
        &mut self,
        buyer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<SettlementRecord>>;

    async fn insert_settlement(&mut self, record: &SettlementRecord) -> Result<()>;

    async fn update_settlement_status(
        &mut self,
        settlement_id: Uuid,
        status: SettlementStatus,
    ) -> Result<()>;

    async fn insert_revenue(&mut self, entry: &RevenueEntry) -> Result<()>;

    /// Capital invested into a host's installations
    async fn investor_allocations(&mut self, host_id: Uuid) -> Result<Vec<InvestorAllocation>>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Open a unit of work. `lock_wait` bounds every row lock taken in it.
    async fn begin(&self, lock_wait: Duration) -> Result<Box<dyn MarketTx>>;

    async fn get_listing(&self, listing_id: Uuid) -> Result<Option<Listing>>;

    async fn get_settlement(&self, settlement_id: Uuid) -> Result<Option<SettlementRecord>>;

    async fn find_settlement_by_key(
        &self,
        buyer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<SettlementRecord>>;

    /// Write a record outside any unit of work. Used for failed attempts
    /// whose own unit of work was rolled back.
    async fn record_settlement(&self, record: &SettlementRecord) -> Result<()>;

    async fn wallet(&self, owner_id: Uuid) -> Result<Option<Wallet>>;

    async fn wallet_history(&self, owner_id: Uuid, limit: i64) -> Result<Vec<WalletTransaction>>;

    /// Revenue entries, optionally limited to one settlement
    async fn revenue_entries(&self, settlement_id: Option<Uuid>) -> Result<Vec<RevenueEntry>>;

    async fn settlement_stats(&self) -> Result<SettlementStats>;
}

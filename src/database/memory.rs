//! In-process market store for tests and embedded use.
//!
//! Rows are guarded by per-row leases held by the unit of work. Writes are
//! staged inside the unit of work and applied under one state lock at commit,
//! so a dropped unit of work leaves nothing behind.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::database::schema::types::{SettlementKind, SettlementStatus};
use crate::database::store::{MarketStore, MarketTx};
use crate::error::{EngineError, Result};
use crate::models::{
    BalanceChange, InvestorAllocation, Listing, RevenueEntry, SellerReputation, SettlementRecord,
    SettlementStats, Wallet, WalletTransaction,
};
use crate::services::lease::{
    listing_resource, settlement_resource, wallet_resource, InProcessLeaseProvider, Lease,
    LeaseProvider,
};
use crate::services::listing_directory::{listing_matches, sort_listings, GeoScope, ListingDirectory, ListingFilters};
use crate::services::reputation::ReputationSource;
use crate::services::wallet::WalletStore;
use crate::utils::{system_clock, SharedClock};

#[derive(Default)]
struct MemoryState {
    listings: HashMap<Uuid, Listing>,
    settlements: HashMap<Uuid, SettlementRecord>,
    settlement_keys: HashMap<(Uuid, String), Uuid>,
    wallets: HashMap<Uuid, Wallet>,
    wallet_history: Vec<WalletTransaction>,
    revenue: Vec<RevenueEntry>,
    investors: Vec<InvestorAllocation>,
    reputations: HashMap<Uuid, SellerReputation>,
}

impl MemoryState {
    fn insert_settlement(&mut self, record: SettlementRecord) -> Result<()> {
        if let Some(key) = &record.idempotency_key {
            let slot = (record.buyer_id, key.clone());
            if let Some(existing) = self.settlement_keys.get(&slot) {
                if *existing != record.id {
                    return Err(EngineError::IdempotencyConflict(key.clone()));
                }
            }
            self.settlement_keys.insert(slot, record.id);
        }
        self.settlements.insert(record.id, record);
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryMarketStore {
    state: Arc<RwLock<MemoryState>>,
    rows: InProcessLeaseProvider,
    clock: SharedClock,
    currency: String,
}

impl Default for InMemoryMarketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMarketStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            rows: InProcessLeaseProvider::new(),
            clock,
            currency: "INR".to_string(),
        }
    }

    /// Seed a listing as-is, bypassing seller validation
    pub async fn put_listing(&self, listing: Listing) {
        self.state.write().await.listings.insert(listing.id, listing);
    }

    /// Seed a wallet balance, bypassing history
    pub async fn set_balance(&self, owner_id: Uuid, balance: Decimal) {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let wallet = state
            .wallets
            .entry(owner_id)
            .or_insert_with(|| Wallet::empty(owner_id, &self.currency, now));
        wallet.balance = balance;
        wallet.updated_at = now;
    }

    pub async fn add_investor_allocation(&self, allocation: InvestorAllocation) {
        self.state.write().await.investors.push(allocation);
    }

    pub async fn set_reputation(&self, reputation: SellerReputation) {
        self.state
            .write()
            .await
            .reputations
            .insert(reputation.seller_id, reputation);
    }

    /// Balance of an account, zero when unknown
    pub async fn balance_of(&self, owner_id: Uuid) -> Decimal {
        self.state
            .read()
            .await
            .wallets
            .get(&owner_id)
            .map(|w| w.balance)
            .unwrap_or_default()
    }

    /// Rows currently locked or waited on by open units of work
    pub fn locked_rows(&self) -> usize {
        self.rows.tracked_resources()
    }

    /// Every settlement record, including failed attempts
    pub async fn all_settlements(&self) -> Vec<SettlementRecord> {
        let mut records: Vec<_> = self.state.read().await.settlements.values().cloned().collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        records
    }
}

#[async_trait]
impl MarketStore for InMemoryMarketStore {
    async fn begin(&self, lock_wait: Duration) -> Result<Box<dyn MarketTx>> {
        Ok(Box::new(MemoryTx {
            state: self.state.clone(),
            rows: self.rows.clone(),
            clock: self.clock.clone(),
            currency: self.currency.clone(),
            lock_wait,
            held: HashMap::new(),
            listings: HashMap::new(),
            dirty_listings: HashSet::new(),
            settlements: HashMap::new(),
            new_settlements: Vec::new(),
            status_updates: HashMap::new(),
            wallets: HashMap::new(),
            history: Vec::new(),
            revenue: Vec::new(),
        }))
    }

    async fn get_listing(&self, listing_id: Uuid) -> Result<Option<Listing>> {
        Ok(self.state.read().await.listings.get(&listing_id).cloned())
    }

    async fn get_settlement(&self, settlement_id: Uuid) -> Result<Option<SettlementRecord>> {
        Ok(self.state.read().await.settlements.get(&settlement_id).cloned())
    }

    async fn find_settlement_by_key(
        &self,
        buyer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<SettlementRecord>> {
        let state = self.state.read().await;
        Ok(state
            .settlement_keys
            .get(&(buyer_id, idempotency_key.to_string()))
            .and_then(|id| state.settlements.get(id))
            .cloned())
    }

    async fn record_settlement(&self, record: &SettlementRecord) -> Result<()> {
        self.state.write().await.insert_settlement(record.clone())
    }

    async fn wallet(&self, owner_id: Uuid) -> Result<Option<Wallet>> {
        Ok(self.state.read().await.wallets.get(&owner_id).cloned())
    }

    async fn wallet_history(&self, owner_id: Uuid, limit: i64) -> Result<Vec<WalletTransaction>> {
        let state = self.state.read().await;
        Ok(state
            .wallet_history
            .iter()
            .rev()
            .filter(|tx| tx.owner_id == owner_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn revenue_entries(&self, settlement_id: Option<Uuid>) -> Result<Vec<RevenueEntry>> {
        let state = self.state.read().await;
        Ok(state
            .revenue
            .iter()
            .filter(|e| settlement_id.map_or(true, |id| e.settlement_id == id))
            .cloned()
            .collect())
    }

    async fn settlement_stats(&self) -> Result<SettlementStats> {
        let state = self.state.read().await;
        let mut stats = SettlementStats::default();
        for record in state.settlements.values() {
            if record.kind != SettlementKind::Purchase {
                continue;
            }
            match record.status {
                SettlementStatus::Completed => {
                    stats.completed_count += 1;
                    stats.total_settled_value += record.total_price;
                    stats.total_energy_kwh += record.energy_kwh;
                }
                SettlementStatus::Refunded => {
                    stats.refunded_count += 1;
                    stats.total_settled_value += record.total_price;
                    stats.total_energy_kwh += record.energy_kwh;
                }
                SettlementStatus::Failed => stats.failed_count += 1,
                SettlementStatus::Pending => {}
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl ListingDirectory for InMemoryMarketStore {
    async fn find_active_listings(
        &self,
        filters: &ListingFilters,
        scope: Option<&GeoScope>,
    ) -> Result<Vec<Listing>> {
        let now = self.clock.now();
        let state = self.state.read().await;
        let mut found: Vec<Listing> = state
            .listings
            .values()
            .filter(|l| listing_matches(l, filters, scope, now))
            .cloned()
            .collect();
        sort_listings(&mut found);
        if let Some(limit) = filters.limit {
            found.truncate(limit);
        }
        Ok(found)
    }
}

#[async_trait]
impl ReputationSource for InMemoryMarketStore {
    async fn seller_reputation(&self, seller_id: Uuid) -> Result<Option<SellerReputation>> {
        Ok(self.state.read().await.reputations.get(&seller_id).cloned())
    }
}

/// One unit of work against [`InMemoryMarketStore`]
pub struct MemoryTx {
    state: Arc<RwLock<MemoryState>>,
    rows: InProcessLeaseProvider,
    clock: SharedClock,
    currency: String,
    lock_wait: Duration,
    held: HashMap<String, Lease>,
    listings: HashMap<Uuid, Listing>,
    dirty_listings: HashSet<Uuid>,
    settlements: HashMap<Uuid, SettlementRecord>,
    new_settlements: Vec<SettlementRecord>,
    status_updates: HashMap<Uuid, SettlementStatus>,
    wallets: HashMap<Uuid, Wallet>,
    history: Vec<WalletTransaction>,
    revenue: Vec<RevenueEntry>,
}

impl MemoryTx {
    async fn lock_row(&mut self, resource: String) -> Result<()> {
        if self.held.contains_key(&resource) {
            return Ok(());
        }
        let lease = self.rows.acquire(&resource, self.lock_wait).await?;
        self.held.insert(resource, lease);
        Ok(())
    }
}

#[async_trait]
impl WalletStore for MemoryTx {
    async fn lock_wallets(&mut self, accounts: &[Uuid]) -> Result<()> {
        let mut ordered = accounts.to_vec();
        ordered.sort();
        ordered.dedup();

        for account in ordered {
            if self.wallets.contains_key(&account) {
                continue;
            }
            self.lock_row(wallet_resource(account)).await?;
            let now = self.clock.now();
            let wallet = self
                .state
                .read()
                .await
                .wallets
                .get(&account)
                .cloned()
                .unwrap_or_else(|| Wallet::empty(account, &self.currency, now));
            self.wallets.insert(account, wallet);
        }
        Ok(())
    }

    async fn get_balance(&mut self, account: Uuid) -> Result<Decimal> {
        if !self.wallets.contains_key(&account) {
            self.lock_wallets(&[account]).await?;
        }
        self.wallets
            .get(&account)
            .map(|w| w.balance)
            .ok_or_else(|| EngineError::Internal(format!("wallet {} not loaded", account)))
    }

    async fn apply_balance_change(&mut self, change: BalanceChange) -> Result<WalletTransaction> {
        let now = self.clock.now();
        let wallet = self
            .wallets
            .get_mut(&change.owner_id)
            .ok_or_else(|| EngineError::Internal(format!("wallet {} not locked", change.owner_id)))?;

        if wallet.balance != change.balance_before {
            return Err(EngineError::Internal(format!(
                "stale balance for wallet {}",
                change.owner_id
            )));
        }
        if change.balance_after < Decimal::ZERO {
            return Err(EngineError::InsufficientBalance {
                account: change.owner_id,
                required: change.amount,
                available: change.balance_before,
            });
        }

        wallet.balance = change.balance_after;
        wallet.updated_at = now;
        let record = change.into_transaction(Uuid::new_v4(), now);
        self.history.push(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl MarketTx for MemoryTx {
    async fn lock_listing(&mut self, listing_id: Uuid) -> Result<Listing> {
        if let Some(listing) = self.listings.get(&listing_id) {
            return Ok(listing.clone());
        }
        self.lock_row(listing_resource(listing_id)).await?;
        let listing = self
            .state
            .read()
            .await
            .listings
            .get(&listing_id)
            .cloned()
            .ok_or(EngineError::ListingNotFound(listing_id))?;
        self.listings.insert(listing_id, listing.clone());
        Ok(listing)
    }

    async fn insert_listing(&mut self, listing: &Listing) -> Result<()> {
        self.lock_row(listing_resource(listing.id)).await?;
        if self.state.read().await.listings.contains_key(&listing.id) {
            return Err(EngineError::invalid_input(format!(
                "listing {} already exists",
                listing.id
            )));
        }
        self.listings.insert(listing.id, listing.clone());
        self.dirty_listings.insert(listing.id);
        Ok(())
    }

    async fn save_listing(&mut self, listing: &Listing) -> Result<()> {
        if !self.listings.contains_key(&listing.id) {
            return Err(EngineError::Internal(format!(
                "listing {} saved without being locked",
                listing.id
            )));
        }
        self.listings.insert(listing.id, listing.clone());
        self.dirty_listings.insert(listing.id);
        Ok(())
    }

    async fn lock_settlement(&mut self, settlement_id: Uuid) -> Result<SettlementRecord> {
        if let Some(record) = self.settlements.get(&settlement_id) {
            return Ok(record.clone());
        }
        self.lock_row(settlement_resource(settlement_id)).await?;
        let record = self
            .state
            .read()
            .await
            .settlements
            .get(&settlement_id)
            .cloned()
            .ok_or(EngineError::SettlementNotFound(settlement_id))?;
        self.settlements.insert(settlement_id, record.clone());
        Ok(record)
    }

    async fn find_settlement_by_key(
        &mut self,
        buyer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<SettlementRecord>> {
        if let Some(staged) = self.new_settlements.iter().find(|r| {
            r.buyer_id == buyer_id && r.idempotency_key.as_deref() == Some(idempotency_key)
        }) {
            return Ok(Some(staged.clone()));
        }
        let state = self.state.read().await;
        Ok(state
            .settlement_keys
            .get(&(buyer_id, idempotency_key.to_string()))
            .and_then(|id| state.settlements.get(id))
            .cloned())
    }

    async fn insert_settlement(&mut self, record: &SettlementRecord) -> Result<()> {
        self.new_settlements.push(record.clone());
        Ok(())
    }

    async fn update_settlement_status(
        &mut self,
        settlement_id: Uuid,
        status: SettlementStatus,
    ) -> Result<()> {
        if let Some(staged) = self
            .new_settlements
            .iter_mut()
            .find(|r| r.id == settlement_id)
        {
            staged.status = status;
            return Ok(());
        }
        if !self.settlements.contains_key(&settlement_id) {
            return Err(EngineError::Internal(format!(
                "settlement {} updated without being locked",
                settlement_id
            )));
        }
        self.status_updates.insert(settlement_id, status);
        Ok(())
    }

    async fn insert_revenue(&mut self, entry: &RevenueEntry) -> Result<()> {
        self.revenue.push(entry.clone());
        Ok(())
    }

    async fn investor_allocations(&mut self, host_id: Uuid) -> Result<Vec<InvestorAllocation>> {
        let state = self.state.read().await;
        Ok(state
            .investors
            .iter()
            .filter(|a| a.host_id == host_id)
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut tx = *self;
        let mut state = tx.state.write().await;

        // Check every constraint before touching shared state.
        for record in &tx.new_settlements {
            if let Some(key) = &record.idempotency_key {
                if state
                    .settlement_keys
                    .contains_key(&(record.buyer_id, key.clone()))
                {
                    return Err(EngineError::IdempotencyConflict(key.clone()));
                }
            }
        }

        for id in tx.dirty_listings.drain() {
            if let Some(listing) = tx.listings.remove(&id) {
                state.listings.insert(id, listing);
            }
        }
        for (id, status) in tx.status_updates.drain() {
            if let Some(record) = state.settlements.get_mut(&id) {
                record.status = status;
            }
        }
        for record in tx.new_settlements.drain(..) {
            state.insert_settlement(record)?;
        }
        for (id, wallet) in tx.wallets.drain() {
            state.wallets.insert(id, wallet);
        }
        state.wallet_history.append(&mut tx.history);
        state.revenue.append(&mut tx.revenue);
        drop(state);

        debug!("Memory unit of work committed ({} row leases)", tx.held.len());
        Ok(())
    }
}

mod common;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use common::{d, TestMarket};
use energy_settlement_engine::database::schema::types::{ProductMode, SettlementStatus};
use energy_settlement_engine::database::{InMemoryMarketStore, MarketStore, MarketTx};
use energy_settlement_engine::models::{
    BalanceChange, InvestorAllocation, Listing, RevenueEntry, SettlementRecord, SettlementRequest,
    SettlementStats, Wallet, WalletTransaction,
};
use energy_settlement_engine::services::lease::InProcessLeaseProvider;
use energy_settlement_engine::services::wallet::WalletStore;
use energy_settlement_engine::services::{SettlementConfig, SettlementService};
use energy_settlement_engine::EngineError;

/// Write that fails once the money has already been staged
#[derive(Debug, Clone, Copy)]
enum FailAt {
    SaveListing,
    InsertSettlement,
    InsertRevenue,
}

fn injected(step: FailAt) -> EngineError {
    EngineError::Internal(format!("injected failure at {:?}", step))
}

/// In-memory store whose units of work fail at one chosen write
struct FlakyStore {
    inner: Arc<InMemoryMarketStore>,
    fail_at: FailAt,
}

struct FlakyTx {
    inner: Box<dyn MarketTx>,
    fail_at: FailAt,
}

#[async_trait]
impl WalletStore for FlakyTx {
    async fn lock_wallets(&mut self, accounts: &[Uuid]) -> energy_settlement_engine::Result<()> {
        self.inner.lock_wallets(accounts).await
    }

    async fn get_balance(&mut self, account: Uuid) -> energy_settlement_engine::Result<Decimal> {
        self.inner.get_balance(account).await
    }

    async fn apply_balance_change(
        &mut self,
        change: BalanceChange,
    ) -> energy_settlement_engine::Result<WalletTransaction> {
        self.inner.apply_balance_change(change).await
    }
}

#[async_trait]
impl MarketTx for FlakyTx {
    async fn lock_listing(&mut self, listing_id: Uuid) -> energy_settlement_engine::Result<Listing> {
        self.inner.lock_listing(listing_id).await
    }

    async fn insert_listing(&mut self, listing: &Listing) -> energy_settlement_engine::Result<()> {
        self.inner.insert_listing(listing).await
    }

    async fn save_listing(&mut self, listing: &Listing) -> energy_settlement_engine::Result<()> {
        if let FailAt::SaveListing = self.fail_at {
            return Err(injected(self.fail_at));
        }
        self.inner.save_listing(listing).await
    }

    async fn lock_settlement(
        &mut self,
        settlement_id: Uuid,
    ) -> energy_settlement_engine::Result<SettlementRecord> {
        self.inner.lock_settlement(settlement_id).await
    }

    async fn find_settlement_by_key(
        &mut self,
        buyer_id: Uuid,
        idempotency_key: &str,
    ) -> energy_settlement_engine::Result<Option<SettlementRecord>> {
        self.inner.find_settlement_by_key(buyer_id, idempotency_key).await
    }

    async fn insert_settlement(&mut self, record: &SettlementRecord) -> energy_settlement_engine::Result<()> {
        if let FailAt::InsertSettlement = self.fail_at {
            return Err(injected(self.fail_at));
        }
        self.inner.insert_settlement(record).await
    }

    async fn update_settlement_status(
        &mut self,
        settlement_id: Uuid,
        status: SettlementStatus,
    ) -> energy_settlement_engine::Result<()> {
        self.inner.update_settlement_status(settlement_id, status).await
    }

    async fn insert_revenue(&mut self, entry: &RevenueEntry) -> energy_settlement_engine::Result<()> {
        if let FailAt::InsertRevenue = self.fail_at {
            return Err(injected(self.fail_at));
        }
        self.inner.insert_revenue(entry).await
    }

    async fn investor_allocations(
        &mut self,
        host_id: Uuid,
    ) -> energy_settlement_engine::Result<Vec<InvestorAllocation>> {
        self.inner.investor_allocations(host_id).await
    }

    async fn commit(self: Box<Self>) -> energy_settlement_engine::Result<()> {
        let this = *self;
        this.inner.commit().await
    }
}

#[async_trait]
impl MarketStore for FlakyStore {
    async fn begin(&self, lock_wait: Duration) -> energy_settlement_engine::Result<Box<dyn MarketTx>> {
        let inner = self.inner.begin(lock_wait).await?;
        Ok(Box::new(FlakyTx {
            inner,
            fail_at: self.fail_at,
        }))
    }

    async fn get_listing(&self, listing_id: Uuid) -> energy_settlement_engine::Result<Option<Listing>> {
        self.inner.get_listing(listing_id).await
    }

    async fn get_settlement(
        &self,
        settlement_id: Uuid,
    ) -> energy_settlement_engine::Result<Option<SettlementRecord>> {
        self.inner.get_settlement(settlement_id).await
    }

    async fn find_settlement_by_key(
        &self,
        buyer_id: Uuid,
        idempotency_key: &str,
    ) -> energy_settlement_engine::Result<Option<SettlementRecord>> {
        self.inner.find_settlement_by_key(buyer_id, idempotency_key).await
    }

    async fn record_settlement(&self, record: &SettlementRecord) -> energy_settlement_engine::Result<()> {
        self.inner.record_settlement(record).await
    }

    async fn wallet(&self, owner_id: Uuid) -> energy_settlement_engine::Result<Option<Wallet>> {
        self.inner.wallet(owner_id).await
    }

    async fn wallet_history(
        &self,
        owner_id: Uuid,
        limit: i64,
    ) -> energy_settlement_engine::Result<Vec<WalletTransaction>> {
        self.inner.wallet_history(owner_id, limit).await
    }

    async fn revenue_entries(
        &self,
        settlement_id: Option<Uuid>,
    ) -> energy_settlement_engine::Result<Vec<RevenueEntry>> {
        self.inner.revenue_entries(settlement_id).await
    }

    async fn settlement_stats(&self) -> energy_settlement_engine::Result<SettlementStats> {
        self.inner.settlement_stats().await
    }
}

fn flaky_service(market: &TestMarket, fail_at: FailAt) -> SettlementService {
    let store = Arc::new(FlakyStore {
        inner: market.store.clone(),
        fail_at,
    });
    SettlementService::with_config(
        store,
        Arc::new(InProcessLeaseProvider::new()),
        market.clock.clone(),
        SettlementConfig::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_late_write_failure_rolls_back_staged_money() -> Result<()> {
    for fail_at in [FailAt::SaveListing, FailAt::InsertSettlement, FailAt::InsertRevenue] {
        let market = TestMarket::new();
        let listing = market.listing("100", "5", "5", None).await;
        let buyer = market.buyer("1000").await;
        let service = flaky_service(&market, fail_at);

        let err = service
            .settle(SettlementRequest::new(listing.id, buyer, d("30")))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)), "{:?}: {}", fail_at, err);

        // The debit and credit were staged before the failing write
        assert_eq!(market.balance(buyer).await, d("1000"), "{:?}", fail_at);
        assert_eq!(market.balance(listing.seller_id).await, Decimal::ZERO, "{:?}", fail_at);
        assert_eq!(market.current(listing.id).await.energy_kwh, d("100"), "{:?}", fail_at);
        assert!(market.store.wallet_history(buyer, 10).await?.is_empty());
        assert!(market.store.wallet_history(listing.seller_id, 10).await?.is_empty());
        assert!(market.store.revenue_entries(None).await?.is_empty());

        let records = market.store.all_settlements().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, SettlementStatus::Failed);

        // Nothing is left locked: a healthy service settles straight after
        let record = market
            .settlement
            .settle(SettlementRequest::new(listing.id, buyer, d("30")))
            .await?;
        assert_eq!(record.total_price, d("157.50"));
        assert_eq!(market.balance(buyer).await, d("842.50"));
    }

    println!("✅ Late write failures leave balances, listing and history untouched");
    Ok(())
}

#[tokio::test]
async fn test_host_investment_failure_leaves_investors_unpaid() -> Result<()> {
    let market = TestMarket::new();
    let mut listing = market.listing("100", "5", "1", None).await;
    listing.product_mode = ProductMode::HostInvestment;
    market.put(&listing).await;

    let investor = Uuid::new_v4();
    market
        .store
        .add_investor_allocation(InvestorAllocation {
            investor_id: investor,
            host_id: listing.seller_id,
            amount: d("1000"),
        })
        .await;
    let buyer = market.buyer("1000").await;

    let err = flaky_service(&market, FailAt::InsertRevenue)
        .settle(SettlementRequest::new(listing.id, buyer, d("20")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Internal(_)));

    assert_eq!(market.balance(buyer).await, d("1000"));
    assert_eq!(market.balance(listing.seller_id).await, Decimal::ZERO);
    assert_eq!(market.balance(investor).await, Decimal::ZERO);
    assert!(market.store.wallet_history(investor, 10).await?.is_empty());
    assert_eq!(market.current(listing.id).await.energy_kwh, d("100"));
    Ok(())
}

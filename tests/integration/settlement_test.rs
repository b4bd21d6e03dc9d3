mod common;

use anyhow::Result;
use chrono::Duration;
use rust_decimal::Decimal;
use uuid::Uuid;

use common::{d, TestMarket};
use energy_settlement_engine::database::schema::types::{
    ListingStatus, ProductMode, RevenueType, SettlementKind, SettlementStatus,
};
use energy_settlement_engine::database::MarketStore;
use energy_settlement_engine::models::{InvestorAllocation, RefundRequest, SettlementRequest};
use energy_settlement_engine::services::{SettlementConfig, SettlementPolicy};
use energy_settlement_engine::EngineError;

#[tokio::test]
async fn test_partial_purchase_with_direct_fee() -> Result<()> {
    let market = TestMarket::new();
    let listing = market.listing("100", "5", "5", None).await;
    let buyer = market.buyer("1000").await;

    let record = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("30")))
        .await?;

    assert_eq!(record.status, SettlementStatus::Completed);
    assert_eq!(record.subtotal, d("150.00"));
    assert_eq!(record.total_price, d("157.50"));
    assert_eq!(record.seller_credit, d("142.50"));
    assert_eq!(record.platform_fee, d("15.00"));
    assert_eq!(market.balance(buyer).await, d("842.50"));
    assert_eq!(market.balance(listing.seller_id).await, d("142.50"));

    let after = market.current(listing.id).await;
    assert_eq!(after.energy_kwh, d("70"));
    assert_eq!(after.status, ListingStatus::Active);

    println!("✅ 30 kWh purchase settled with 5% fee on both sides");
    Ok(())
}

#[tokio::test]
async fn test_buying_everything_marks_listing_sold() -> Result<()> {
    let market = TestMarket::new();
    let listing = market.listing("100", "5", "5", None).await;
    let buyer = market.buyer("1000").await;

    market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("100")))
        .await?;

    let after = market.current(listing.id).await;
    assert_eq!(after.energy_kwh, Decimal::ZERO);
    assert_eq!(after.status, ListingStatus::Sold);

    let err = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("5")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ListingUnavailable { .. }));
    Ok(())
}

#[tokio::test]
async fn test_below_minimum_is_rejected_without_mutation() -> Result<()> {
    let market = TestMarket::new();
    let listing = market.listing("100", "5", "5", None).await;
    let buyer = market.buyer("1000").await;

    let err = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("3")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BelowMinimumPurchase { .. }));

    assert_eq!(market.current(listing.id).await.energy_kwh, d("100"));
    assert_eq!(market.balance(buyer).await, d("1000"));
    assert_eq!(market.balance(listing.seller_id).await, Decimal::ZERO);
    assert!(market.store.wallet_history(buyer, 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_seller_cannot_buy_own_listing() -> Result<()> {
    let market = TestMarket::new();
    let listing = market.listing("100", "5", "5", None).await;
    market.store.set_balance(listing.seller_id, d("1000")).await;

    let err = market
        .settlement
        .settle(SettlementRequest::new(listing.id, listing.seller_id, d("10")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SelfPurchaseForbidden(id) if id == listing.seller_id));
    assert_eq!(market.balance(listing.seller_id).await, d("1000"));
    Ok(())
}

#[tokio::test]
async fn test_quantity_and_window_checks() -> Result<()> {
    let market = TestMarket::new();
    let listing = market.listing("20", "5", "1", None).await;
    let buyer = market.buyer("1000").await;

    let err = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("25")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientQuantity { .. }));

    market.clock.advance(Duration::hours(25));
    let err = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("5")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ListingUnavailable { .. }));

    let err = market
        .settlement
        .settle(SettlementRequest::new(Uuid::new_v4(), buyer, d("5")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ListingNotFound(_)));
    Ok(())
}

#[tokio::test]
async fn test_insufficient_balance_rolls_back_everything() -> Result<()> {
    let market = TestMarket::new();
    let listing = market.listing("100", "5", "5", None).await;
    let buyer = market.buyer("100").await;

    // 30 kWh costs 157.50 with the buyer fee
    let err = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("30")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientBalance { .. }));

    assert_eq!(market.balance(buyer).await, d("100"));
    assert_eq!(market.balance(listing.seller_id).await, Decimal::ZERO);
    assert_eq!(market.current(listing.id).await.energy_kwh, d("100"));
    assert!(market.store.revenue_entries(None).await?.is_empty());

    let records = market.store.all_settlements().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, SettlementStatus::Failed);
    assert!(records[0]
        .reason
        .as_deref()
        .is_some_and(|r| r.contains("Insufficient balance")));

    let stats = market.settlement.get_settlement_stats().await?;
    assert_eq!(stats.failed_count, 1);
    assert_eq!(stats.completed_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_idempotent_replay_moves_money_once() -> Result<()> {
    let market = TestMarket::new();
    let listing = market.listing("100", "5", "5", None).await;
    let buyer = market.buyer("1000").await;

    let request = SettlementRequest::new(listing.id, buyer, d("10")).with_idempotency_key("order-42");
    let first = market.settlement.settle(request.clone()).await?;
    let second = market.settlement.settle(request).await?;

    assert_eq!(first.id, second.id);
    assert_eq!(market.balance(buyer).await, d("947.50"));
    assert_eq!(market.current(listing.id).await.energy_kwh, d("90"));

    let conflicting =
        SettlementRequest::new(listing.id, buyer, d("20")).with_idempotency_key("order-42");
    let err = market.settlement.settle(conflicting).await.unwrap_err();
    assert!(matches!(err, EngineError::IdempotencyConflict(ref key) if key == "order-42"));

    // Keys are scoped to the buyer
    let other_buyer = market.buyer("1000").await;
    let other = market
        .settlement
        .settle(SettlementRequest::new(listing.id, other_buyer, d("10")).with_idempotency_key("order-42"))
        .await?;
    assert_ne!(other.id, first.id);
    Ok(())
}

#[tokio::test]
async fn test_blank_key_is_rejected() {
    let market = TestMarket::new();
    let listing = market.listing("100", "5", "5", None).await;
    let buyer = market.buyer("1000").await;

    let err = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("10")).with_idempotency_key("  "))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[tokio::test]
async fn test_full_refund_reverses_purchase() -> Result<()> {
    let market = TestMarket::new();
    let listing = market.listing("100", "5", "5", None).await;
    let buyer = market.buyer("1000").await;

    let purchase = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("30")))
        .await?;
    let refund = market
        .settlement
        .refund(RefundRequest {
            settlement_id: purchase.id,
            amount: None,
            reason: "meter reading disputed".to_string(),
        })
        .await?;

    assert_eq!(refund.kind, SettlementKind::Refund);
    assert_eq!(refund.refund_of, Some(purchase.id));
    assert_eq!(refund.total_price, d("157.50"));
    assert_eq!(refund.seller_credit, d("142.50"));
    assert_eq!(refund.platform_fee, d("15.00"));

    assert_eq!(market.balance(buyer).await, d("1000"));
    assert_eq!(market.balance(listing.seller_id).await, Decimal::ZERO);
    assert_eq!(
        market.settlement.get_settlement(purchase.id).await?.status,
        SettlementStatus::Refunded
    );

    let revenue = market.settlement.platform_revenue().await?;
    assert_eq!(revenue.platform_fees, d("15.00"));
    assert_eq!(revenue.refund_adjustments, d("-15.00"));
    assert_eq!(revenue.total_revenue, Decimal::ZERO);

    // Energy already delivered is not put back on sale
    assert_eq!(market.current(listing.id).await.energy_kwh, d("70"));

    let stats = market.settlement.get_settlement_stats().await?;
    assert_eq!(stats.refunded_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_partial_refund_comes_from_seller() -> Result<()> {
    let market = TestMarket::new();
    let listing = market.listing("100", "5", "5", None).await;
    let buyer = market.buyer("1000").await;

    let purchase = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("30")))
        .await?;
    let refund = market
        .settlement
        .refund(RefundRequest {
            settlement_id: purchase.id,
            amount: Some(d("50")),
            reason: "partial outage".to_string(),
        })
        .await?;

    assert_eq!(refund.total_price, d("50"));
    assert_eq!(refund.seller_credit, d("50"));
    assert_eq!(refund.platform_fee, Decimal::ZERO);
    assert_eq!(market.balance(buyer).await, d("892.50"));
    assert_eq!(market.balance(listing.seller_id).await, d("92.50"));
    assert!(market
        .store
        .revenue_entries(Some(refund.id))
        .await?
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn test_refund_rules() -> Result<()> {
    let market = TestMarket::new();
    let listing = market.listing("100", "5", "5", None).await;
    let buyer = market.buyer("1000").await;

    let purchase = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("10")))
        .await?;

    let missing_reason = market
        .settlement
        .refund(RefundRequest {
            settlement_id: purchase.id,
            amount: None,
            reason: " ".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(missing_reason, EngineError::InvalidInput(_)));

    let unknown = market
        .settlement
        .refund(RefundRequest {
            settlement_id: Uuid::new_v4(),
            amount: None,
            reason: "test".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(unknown, EngineError::SettlementNotFound(_)));

    // Amounts above what was paid are capped
    let refund = market
        .settlement
        .refund(RefundRequest {
            settlement_id: purchase.id,
            amount: Some(d("500")),
            reason: "cancelled delivery".to_string(),
        })
        .await?;
    assert_eq!(refund.total_price, d("52.50"));

    let of_refund = market
        .settlement
        .refund(RefundRequest {
            settlement_id: refund.id,
            amount: None,
            reason: "again".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(of_refund, EngineError::RefundNotAllowed(_)));
    Ok(())
}

#[tokio::test]
async fn test_host_investment_split_conserves_money() -> Result<()> {
    let market = TestMarket::new();
    let mut listing = market.listing("100", "6", "1", None).await;
    listing.product_mode = ProductMode::HostInvestment;
    market.put(&listing).await;

    let investors = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
    for (investor, amount) in investors.iter().zip(["1000", "1000", "1000"]) {
        market
            .store
            .add_investor_allocation(InvestorAllocation {
                investor_id: *investor,
                host_id: listing.seller_id,
                amount: d(amount),
            })
            .await;
    }

    let buyer = market.buyer("1000").await;
    let record = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("1.67")))
        .await?;

    // 1.67 kWh x 6 = 10.02: host 4.51, platform 2.00, investors 3.51
    assert_eq!(record.total_price, d("10.02"));
    assert_eq!(record.investor_total(), d("3.51"));
    assert_eq!(record.investor_shares.len(), 3);
    assert_eq!(
        record.total_price,
        record.seller_credit + record.investor_total() + record.platform_fee
    );

    let mut paid_out = market.balance(listing.seller_id).await;
    for investor in investors {
        paid_out += market.balance(investor).await;
    }
    let revenue = market.store.revenue_entries(Some(record.id)).await?;
    assert_eq!(revenue.len(), 1);
    assert_eq!(revenue[0].revenue_type, RevenueType::RevenueShare);
    assert_eq!(paid_out + revenue[0].amount, d("1000") - market.balance(buyer).await);
    Ok(())
}

#[tokio::test]
async fn test_revenue_share_rounding_never_pays_out_more_than_charged() -> Result<()> {
    let market = TestMarket::with_config(SettlementConfig {
        host_investment: SettlementPolicy::RevenueShare {
            host_share: d("0"),
            platform_share: d("0.5"),
            investor_share: d("0.5"),
        },
        ..Default::default()
    });
    let mut listing = market.listing("100", "0.01", "1", None).await;
    listing.product_mode = ProductMode::HostInvestment;
    market.put(&listing).await;

    let investor = Uuid::new_v4();
    market
        .store
        .add_investor_allocation(InvestorAllocation {
            investor_id: investor,
            host_id: listing.seller_id,
            amount: d("500"),
        })
        .await;
    let buyer = market.buyer("10").await;

    let record = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("1")))
        .await?;

    assert_eq!(record.total_price, d("0.01"));
    assert!(record.seller_credit >= Decimal::ZERO);
    assert!(record.platform_fee >= Decimal::ZERO);

    let charged = d("10") - market.balance(buyer).await;
    let revenue: Decimal = market
        .store
        .revenue_entries(Some(record.id))
        .await?
        .iter()
        .map(|e| e.amount)
        .sum();
    let paid_out =
        market.balance(listing.seller_id).await + market.balance(investor).await + revenue;
    assert_eq!(charged, d("0.01"));
    assert_eq!(paid_out, charged);
    Ok(())
}

#[tokio::test]
async fn test_host_without_investors_keeps_the_pool() -> Result<()> {
    let market = TestMarket::new();
    let mut listing = market.listing("100", "5", "1", None).await;
    listing.product_mode = ProductMode::HostInvestment;
    market.put(&listing).await;
    let buyer = market.buyer("1000").await;

    let record = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("20")))
        .await?;

    assert!(record.investor_shares.is_empty());
    assert_eq!(record.seller_credit, d("80.00"));
    assert_eq!(record.platform_fee, d("20.00"));
    Ok(())
}

#[tokio::test]
async fn test_cancelled_listing_cannot_be_bought() -> Result<()> {
    let market = TestMarket::new();
    let listing = market.listing("100", "5", "5", None).await;
    let buyer = market.buyer("1000").await;

    let cancelled = market
        .listings
        .cancel_listing(listing.seller_id, listing.id)
        .await?;
    assert_eq!(cancelled.status, ListingStatus::Cancelled);

    let err = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("10")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ListingUnavailable { .. }));
    assert_eq!(market.balance(buyer).await, d("1000"));
    Ok(())
}

#[tokio::test]
async fn test_wallet_history_tracks_each_movement() -> Result<()> {
    let market = TestMarket::new();
    let listing = market.listing("100", "5", "5", None).await;
    let buyer = market.buyer("1000").await;

    let record = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("10")))
        .await?;

    let history = market.store.wallet_history(buyer, 10).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].balance_before, d("1000"));
    assert_eq!(history[0].balance_after, d("947.50"));
    assert_eq!(history[0].settlement_id, Some(record.id));

    let seller_history = market.store.wallet_history(listing.seller_id, 10).await?;
    assert_eq!(seller_history.len(), 1);
    assert_eq!(seller_history[0].amount, d("47.50"));
    Ok(())
}

#[tokio::test]
async fn test_custom_fee_policy() -> Result<()> {
    let config = SettlementConfig {
        marketplace: energy_settlement_engine::SettlementPolicy::DirectFee {
            buyer_fee_rate: d("0.02"),
            seller_fee_rate: Decimal::ZERO,
        },
        ..Default::default()
    };
    let market = TestMarket::with_config(config);
    let listing = market.listing("100", "5", "5", None).await;
    let buyer = market.buyer("1000").await;

    let record = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("10")))
        .await?;
    assert_eq!(record.total_price, d("51.00"));
    assert_eq!(record.seller_credit, d("50.00"));
    assert_eq!(record.platform_fee, d("1.00"));
    Ok(())
}

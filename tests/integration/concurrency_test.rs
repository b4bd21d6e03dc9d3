mod common;

use anyhow::Result;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::time::Duration;

use common::{d, TestMarket};
use energy_settlement_engine::database::schema::types::ListingStatus;
use energy_settlement_engine::models::SettlementRequest;
use energy_settlement_engine::services::lease::{listing_resource, LeaseProvider};
use energy_settlement_engine::services::SettlementConfig;
use energy_settlement_engine::EngineError;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_buyers_never_oversell() -> Result<()> {
    let market = TestMarket::with_config(SettlementConfig {
        lock_wait_ms: 10_000,
        ..Default::default()
    });
    let listing = market.listing("100", "5", "1", None).await;

    let mut buyers = Vec::new();
    for _ in 0..25 {
        buyers.push(market.buyer("1000").await);
    }

    let attempts = buyers.iter().map(|buyer| {
        let service = market.settlement.clone();
        let request = SettlementRequest::new(listing.id, *buyer, d("10"));
        tokio::spawn(async move { service.settle(request).await })
    });
    let results = join_all(attempts).await;

    let mut settled = Decimal::ZERO;
    let mut successes = 0;
    for result in results {
        match result? {
            Ok(record) => {
                successes += 1;
                settled += record.energy_kwh;
            }
            Err(e) => assert!(
                matches!(
                    e,
                    EngineError::ListingUnavailable { .. } | EngineError::InsufficientQuantity { .. }
                ),
                "unexpected error: {}",
                e
            ),
        }
    }

    assert_eq!(successes, 10);
    assert_eq!(settled, d("100"));
    let after = market.current(listing.id).await;
    assert_eq!(after.energy_kwh, Decimal::ZERO);
    assert_eq!(after.status, ListingStatus::Sold);
    assert_eq!(market.balance(listing.seller_id).await, d("475.00"));
    assert_eq!(market.leases.tracked_resources(), 0);
    assert_eq!(market.store.locked_rows(), 0);

    println!("✅ 25 concurrent buyers, exactly 100 kWh sold");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_spending_never_goes_negative() -> Result<()> {
    let market = TestMarket::with_config(SettlementConfig {
        lock_wait_ms: 10_000,
        ..Default::default()
    });
    let buyer = market.buyer("100").await;

    // Each purchase costs 21.00 including the buyer fee
    let mut listings = Vec::new();
    for _ in 0..10 {
        listings.push(market.listing("20", "1", "1", None).await);
    }

    let attempts = listings.iter().map(|listing| {
        let service = market.settlement.clone();
        let request = SettlementRequest::new(listing.id, buyer, d("20"));
        tokio::spawn(async move { service.settle(request).await })
    });
    let results = join_all(attempts).await;

    let mut successes = 0i64;
    for result in results {
        match result? {
            Ok(_) => successes += 1,
            Err(e) => assert!(matches!(e, EngineError::InsufficientBalance { .. }), "unexpected error: {}", e),
        }
    }

    assert_eq!(successes, 4);
    let balance = market.balance(buyer).await;
    assert!(balance >= Decimal::ZERO);
    assert_eq!(balance, d("100") - d("21.00") * Decimal::from(successes));
    Ok(())
}

#[tokio::test]
async fn test_busy_listing_surfaces_retryable_contention() -> Result<()> {
    let market = TestMarket::with_config(SettlementConfig {
        lock_wait_ms: 50,
        ..Default::default()
    });
    let listing = market.listing("100", "5", "1", None).await;
    let buyer = market.buyer("1000").await;

    let held = market
        .leases
        .acquire(&listing_resource(listing.id), Duration::from_millis(50))
        .await?;

    let err = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("10")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LockContention { .. }));
    assert!(err.is_retryable());
    assert_eq!(market.balance(buyer).await, d("1000"));

    drop(held);
    let record = market
        .settlement
        .settle(SettlementRequest::new(listing.id, buyer, d("10")))
        .await?;
    assert_eq!(record.energy_kwh, d("10"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_retries_with_one_key_settle_once() -> Result<()> {
    let market = TestMarket::with_config(SettlementConfig {
        lock_wait_ms: 10_000,
        ..Default::default()
    });
    let listing = market.listing("100", "5", "1", None).await;
    let buyer = market.buyer("1000").await;

    let attempts = (0..8).map(|_| {
        let service = market.settlement.clone();
        let request =
            SettlementRequest::new(listing.id, buyer, d("10")).with_idempotency_key("retry-storm");
        tokio::spawn(async move { service.settle(request).await })
    });
    let results = join_all(attempts).await;

    let mut ids = Vec::new();
    for result in results {
        ids.push(result??.id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(market.balance(buyer).await, d("947.50"));
    assert_eq!(market.current(listing.id).await.energy_kwh, d("90"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellation_is_ordered_against_in_flight_purchases() -> Result<()> {
    let market = TestMarket::with_config(SettlementConfig {
        lock_wait_ms: 10_000,
        ..Default::default()
    });
    let listing = market.listing("100", "5", "1", None).await;

    let mut buyers = Vec::new();
    for _ in 0..8 {
        buyers.push(market.buyer("1000").await);
    }

    let (first, rest) = buyers.split_at(4);
    let spawn_settles = |group: &[uuid::Uuid]| {
        group
            .iter()
            .map(|buyer| {
                let service = market.settlement.clone();
                let request = SettlementRequest::new(listing.id, *buyer, d("10"));
                tokio::spawn(async move { service.settle(request).await })
            })
            .collect::<Vec<_>>()
    };

    let mut attempts = spawn_settles(first);
    let listings = market.listings.clone();
    let (seller, listing_id) = (listing.seller_id, listing.id);
    let cancel = tokio::spawn(async move { listings.cancel_listing(seller, listing_id).await });
    attempts.extend(spawn_settles(rest));

    let mut sold = Decimal::ZERO;
    for result in join_all(attempts).await {
        match result? {
            Ok(record) => sold += record.energy_kwh,
            Err(e) => assert!(
                matches!(e, EngineError::ListingUnavailable { .. }),
                "unexpected error: {}",
                e
            ),
        }
    }
    let cancelled = cancel.await??;
    assert_eq!(cancelled.status, ListingStatus::Cancelled);

    let after = market.current(listing.id).await;
    assert_eq!(after.status, ListingStatus::Cancelled);
    assert_eq!(sold + after.energy_kwh, d("100"));
    // Purchases that won the lease before the cancel are the only ones charged
    let charged: Decimal = {
        let mut total = Decimal::ZERO;
        for buyer in &buyers {
            total += d("1000") - market.balance(*buyer).await;
        }
        total
    };
    assert_eq!(charged, sold * d("5.25"));
    Ok(())
}

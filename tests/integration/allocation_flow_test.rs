mod common;

use anyhow::Result;
use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashSet;
use uuid::Uuid;

use common::{d, north_of_origin, TestMarket, ORIGIN};
use energy_settlement_engine::database::schema::types::{ListingStatus, ProductMode};
use energy_settlement_engine::models::{
    BuyerPreferences, EnergyRequest, Listing, ListingCandidate, RankedListing, ScoreBreakdown,
    SellerReputation,
};
use energy_settlement_engine::services::allocation::plan_allocation;

fn request(buyer_id: Uuid, kwh: &str) -> EnergyRequest {
    EnergyRequest {
        buyer_id,
        energy_kwh: d(kwh),
        location: ORIGIN,
        preferences: BuyerPreferences::default(),
        max_sellers: None,
    }
}

#[tokio::test]
async fn test_plan_spans_two_sellers_and_reports_shortfall() -> Result<()> {
    let market = TestMarket::new();
    let near_cheap = market.listing("50", "4", "5", Some(north_of_origin(2.0))).await;
    let farther = market.listing("20", "5", "5", Some(north_of_origin(5.0))).await;
    let buyer = market.buyer("1000").await;

    let plan = market.engine.find_and_plan(&request(buyer, "80")).await?;

    assert_eq!(plan.legs.len(), 2);
    assert_eq!(plan.legs[0].listing_id, near_cheap.id);
    assert_eq!(plan.legs[0].energy_kwh, d("50"));
    assert_eq!(plan.legs[1].listing_id, farther.id);
    assert_eq!(plan.legs[1].energy_kwh, d("20"));
    assert_eq!(plan.allocated_kwh, d("70"));
    assert_eq!(plan.remaining_kwh, d("10"));
    assert!(!plan.success);
    assert_eq!(plan.summary.total_cost, d("300"));
    assert_eq!(plan.summary.seller_count, 2);

    println!("✅ Greedy plan: 50 + 20 kWh, 10 kWh short");
    Ok(())
}

#[tokio::test]
async fn test_execute_plan_settles_each_leg_once() -> Result<()> {
    let market = TestMarket::new();
    let first = market.listing("50", "4", "5", Some(north_of_origin(2.0))).await;
    let second = market.listing("20", "5", "5", Some(north_of_origin(5.0))).await;
    let buyer = market.buyer("1000").await;

    let plan = market.engine.find_and_plan(&request(buyer, "80")).await?;
    let execution = market.engine.execute_plan(&plan, Some("batch-1")).await?;

    assert!(execution.all_settled());
    assert_eq!(execution.settled_kwh, d("70"));
    assert_eq!(execution.total_charged, d("315.00"));
    assert_eq!(market.balance(buyer).await, d("685.00"));
    assert_eq!(market.current(first.id).await.status, ListingStatus::Sold);
    assert_eq!(market.current(second.id).await.status, ListingStatus::Sold);

    // Re-running the same execution replays every leg
    let again = market.engine.execute_plan(&plan, Some("batch-1")).await?;
    assert!(again.all_settled());
    assert_eq!(market.balance(buyer).await, d("685.00"));
    let ids = |e: &energy_settlement_engine::models::PlanExecution| {
        e.legs.iter().map(|l| l.settlement_id).collect::<Vec<_>>()
    };
    assert_eq!(ids(&execution), ids(&again));
    Ok(())
}

#[tokio::test]
async fn test_execution_continues_past_a_failed_leg() -> Result<()> {
    let market = TestMarket::new();
    let first = market.listing("30", "4", "1", Some(north_of_origin(1.0))).await;
    let second = market.listing("30", "5", "1", Some(north_of_origin(3.0))).await;
    let buyer = market.buyer("1000").await;

    let plan = market.engine.find_and_plan(&request(buyer, "50")).await?;
    assert!(plan.success);
    assert_eq!(plan.legs[0].listing_id, first.id);

    // The seller withdraws between planning and execution
    market.listings.cancel_listing(first.seller_id, first.id).await?;

    let execution = market.engine.execute_plan(&plan, None).await?;
    assert!(!execution.all_settled());
    assert_eq!(execution.legs[0].settlement_id, None);
    assert_eq!(execution.legs[0].error_code.as_deref(), Some("BIZ_5007"));
    assert!(execution.legs[1].settlement_id.is_some());
    assert_eq!(execution.settled_kwh, d("20"));
    assert_eq!(market.current(second.id).await.energy_kwh, d("10"));
    Ok(())
}

#[tokio::test]
async fn test_candidates_respect_radius_ownership_and_location_fallback() -> Result<()> {
    let market = TestMarket::new();
    let buyer = market.buyer("1000").await;

    let nearby = market.listing("10", "5", "1", Some(north_of_origin(4.0))).await;
    let too_far = market.listing("10", "3", "1", Some(north_of_origin(80.0))).await;

    let mut own = market.listing("10", "1", "1", Some(north_of_origin(1.0))).await;
    own.seller_id = buyer;
    market.put(&own).await;

    // No coordinates on the listing, but the seller registered an address
    let registered = market.listing("10", "5", "1", None).await;
    market
        .store
        .set_reputation(SellerReputation {
            seller_id: registered.seller_id,
            average_rating: 4.8,
            completed_transactions: 20,
            cancelled_transactions: 0,
            registered_location: Some(north_of_origin(2.0)),
        })
        .await;

    // No coordinates anywhere
    let nowhere = market.listing("10", "5", "1", None).await;

    let ranked = market.engine.rank_for(&request(buyer, "10")).await?;
    let ids: HashSet<Uuid> = ranked.iter().map(|r| r.listing_id()).collect();

    assert!(ids.contains(&nearby.id));
    assert!(ids.contains(&registered.id));
    assert!(!ids.contains(&too_far.id));
    assert!(!ids.contains(&own.id));
    assert!(!ids.contains(&nowhere.id));

    // Better reputation and closer: the registered-address listing leads
    assert_eq!(ranked[0].listing_id(), registered.id);
    assert!((ranked[0].distance_km - 2.0).abs() < 0.01);
    Ok(())
}

#[tokio::test]
async fn test_price_cap_and_renewable_preference() -> Result<()> {
    let market = TestMarket::new();
    let buyer = market.buyer("1000").await;

    let mut green = market.listing("10", "5", "1", Some(north_of_origin(3.0))).await;
    green.renewable_certified = true;
    market.put(&green).await;
    let plain = market.listing("10", "5", "1", Some(north_of_origin(3.0))).await;
    let pricey = market.listing("10", "9", "1", Some(north_of_origin(1.0))).await;

    let mut req = request(buyer, "10");
    req.preferences = BuyerPreferences {
        max_price_per_kwh: Some(d("6")),
        prefer_renewable: true,
        ..Default::default()
    };

    let ranked = market.engine.rank_for(&req).await?;
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].listing_id(), green.id);
    assert_eq!(ranked[1].listing_id(), plain.id);
    assert_eq!(ranked[0].score.renewable, 10.0);
    assert!(ranked.iter().all(|r| r.listing_id() != pricey.id));
    Ok(())
}

#[tokio::test]
async fn test_ranking_is_stable_across_calls() -> Result<()> {
    let market = TestMarket::new();
    let buyer = market.buyer("1000").await;
    for _ in 0..6 {
        market.listing("10", "5", "1", Some(north_of_origin(3.0))).await;
    }

    let first: Vec<Uuid> = market
        .engine
        .rank_for(&request(buyer, "10"))
        .await?
        .iter()
        .map(|r| r.listing_id())
        .collect();
    let second: Vec<Uuid> = market
        .engine
        .rank_for(&request(buyer, "10"))
        .await?
        .iter()
        .map(|r| r.listing_id())
        .collect();

    assert_eq!(first.len(), 6);
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn test_invalid_preferences_are_rejected() {
    let market = TestMarket::new();
    let buyer = market.buyer("1000").await;
    let mut req = request(buyer, "10");
    req.preferences.max_distance_km = 0.0;

    assert!(market.engine.rank_for(&req).await.is_err());
}

fn candidate(energy: u32, minimum: u32, seller_id: Uuid) -> RankedListing {
    let now = Utc::now();
    RankedListing {
        candidate: ListingCandidate {
            listing: Listing {
                id: Uuid::new_v4(),
                seller_id,
                energy_kwh: Decimal::from(energy),
                price_per_kwh: Decimal::from(5),
                min_purchase_kwh: Decimal::from(minimum),
                renewable_certified: false,
                location: None,
                available_from: now,
                available_to: now,
                status: ListingStatus::Active,
                product_mode: ProductMode::Marketplace,
                created_at: now,
                updated_at: now,
            },
            reputation: SellerReputation::unknown(seller_id),
        },
        distance_km: 1.0,
        score: ScoreBreakdown::default(),
    }
}

proptest! {
    #[test]
    fn prop_plan_never_overallocates(
        listings in prop::collection::vec((0u32..100, 0u32..25, 0usize..4), 0..12),
        need in 0u32..400,
        max_sellers in prop::option::of(1usize..6),
    ) {
        // Four sellers, so several listings often share one
        let sellers: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let ranked: Vec<RankedListing> = listings
            .iter()
            .map(|(energy, minimum, seller)| candidate(*energy, *minimum, sellers[*seller]))
            .collect();
        let buyer = Uuid::new_v4();
        let requested = Decimal::from(need);

        let plan = plan_allocation(buyer, requested, &ranked, max_sellers).unwrap();

        let allocated: Decimal = plan.legs.iter().map(|l| l.energy_kwh).sum();
        prop_assert_eq!(allocated, plan.allocated_kwh);
        prop_assert!(allocated <= requested);
        prop_assert_eq!(plan.success, allocated == requested);
        prop_assert_eq!(plan.remaining_kwh, requested - allocated);

        let distinct: HashSet<Uuid> = plan.legs.iter().map(|l| l.seller_id).collect();
        prop_assert_eq!(distinct.len(), plan.summary.seller_count);
        if let Some(max) = max_sellers {
            prop_assert!(distinct.len() <= max);
        }

        let mut seen = HashSet::new();
        for leg in &plan.legs {
            prop_assert!(seen.insert(leg.listing_id));
            let source = ranked
                .iter()
                .find(|r| r.listing_id() == leg.listing_id)
                .map(|r| &r.candidate.listing)
                .unwrap();
            prop_assert!(leg.energy_kwh > Decimal::ZERO);
            prop_assert!(leg.energy_kwh >= source.min_purchase_kwh);
            prop_assert!(leg.energy_kwh <= source.energy_kwh);
        }
    }
}

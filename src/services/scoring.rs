//! Multi-factor listing scores.
//!
//! | factor      | max  | formula                                       |
//! |-------------|------|-----------------------------------------------|
//! | distance    | 25   | `25 × max(0, 1 − d / max_distance)`           |
//! | price       | 30   | `30 × clamp(1 − (price / mean − 0.5), 0, 1)`  |
//! | rating      | 20   | `20 × rating / 5`                             |
//! | reliability | 15   | `15 × completed / (completed + cancelled)`    |
//! | renewable   | 10   | flat bonus when certified and preferred       |
//!
//! Sellers with no history get half the reliability points. The price factor
//! depends on the mean price of the candidate set being ranked, which is
//! passed in explicitly so a single score can be reproduced in isolation.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;

use crate::models::{BuyerPreferences, GeoPoint, ListingCandidate, RankedListing, ScoreBreakdown};
use crate::services::geo_filter::filter_within_radius;

pub const DISTANCE_WEIGHT: f64 = 25.0;
pub const PRICE_WEIGHT: f64 = 30.0;
pub const RATING_WEIGHT: f64 = 20.0;
pub const RELIABILITY_WEIGHT: f64 = 15.0;
pub const RENEWABLE_BONUS: f64 = 10.0;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

pub fn distance_score(distance_km: f64, max_distance_km: f64) -> f64 {
    if max_distance_km <= 0.0 {
        return 0.0;
    }
    DISTANCE_WEIGHT * (1.0 - distance_km / max_distance_km).max(0.0)
}

/// Listings at half the mean price or cheaper get full marks; at 1.5× the
/// mean or above they get none. A zero mean gives full marks.
pub fn price_score(price_per_kwh: f64, candidate_set_mean_price: f64) -> f64 {
    if candidate_set_mean_price <= 0.0 {
        return PRICE_WEIGHT;
    }
    let relative = price_per_kwh / candidate_set_mean_price;
    PRICE_WEIGHT * (1.0 - (relative - 0.5)).clamp(0.0, 1.0)
}

pub fn rating_score(average_rating: f64) -> f64 {
    RATING_WEIGHT * (average_rating.clamp(0.0, 5.0) / 5.0)
}

pub fn reliability_score(completed: u32, cancelled: u32) -> f64 {
    let total = completed as f64 + cancelled as f64;
    if total == 0.0 {
        return RELIABILITY_WEIGHT / 2.0;
    }
    RELIABILITY_WEIGHT * (completed as f64 / total)
}

pub fn renewable_bonus(certified: bool, preferred: bool) -> f64 {
    if certified && preferred {
        RENEWABLE_BONUS
    } else {
        0.0
    }
}

/// Score one candidate. Pure: the same inputs always give the same breakdown.
pub fn score_candidate(
    candidate: &ListingCandidate,
    distance_km: f64,
    preferences: &BuyerPreferences,
    candidate_set_mean_price: f64,
) -> ScoreBreakdown {
    let listing = &candidate.listing;
    let reputation = &candidate.reputation;

    let distance = round2(distance_score(distance_km, preferences.max_distance_km));
    let price = round2(price_score(
        to_f64(listing.price_per_kwh),
        candidate_set_mean_price,
    ));
    let rating = round2(rating_score(reputation.average_rating));
    let reliability = round2(reliability_score(
        reputation.completed_transactions,
        reputation.cancelled_transactions,
    ));
    let renewable = renewable_bonus(listing.renewable_certified, preferences.prefer_renewable);

    ScoreBreakdown {
        distance,
        price,
        rating,
        reliability,
        renewable,
        total: round2(distance + price + rating + reliability + renewable),
    }
}

/// Mean unit price of a candidate set, 0 when empty
pub fn mean_price(candidates: &[(ListingCandidate, f64)]) -> f64 {
    if candidates.is_empty() {
        return 0.0;
    }
    let sum: Decimal = candidates
        .iter()
        .map(|(c, _)| c.listing.price_per_kwh)
        .sum();
    to_f64(sum) / candidates.len() as f64
}

/// Filter, score and order candidates for a buyer.
///
/// Candidates without any location (neither on the listing nor the seller's
/// registered address), beyond the distance limit, above the price cap or
/// below the rating floor are dropped. The mean price is taken over the
/// survivors. Output is ordered by score, then distance, then price, then id.
pub fn score_and_rank(
    buyer_location: GeoPoint,
    preferences: &BuyerPreferences,
    candidates: Vec<ListingCandidate>,
) -> Vec<RankedListing> {
    let survivors: Vec<(ListingCandidate, f64)> =
        filter_within_radius(buyer_location, preferences.max_distance_km, candidates)
            .into_iter()
            .filter(|(candidate, _)| {
                let within_price = preferences
                    .max_price_per_kwh
                    .map_or(true, |max| candidate.listing.price_per_kwh <= max);
                let rated_enough = preferences
                    .min_seller_rating
                    .map_or(true, |min| candidate.reputation.average_rating >= min);
                within_price && rated_enough
            })
            .collect();

    let mean = mean_price(&survivors);

    let mut ranked: Vec<RankedListing> = survivors
        .into_iter()
        .map(|(candidate, distance_km)| {
            let score = score_candidate(&candidate, distance_km, preferences, mean);
            RankedListing {
                candidate,
                distance_km,
                score,
            }
        })
        .collect();

    ranked.sort_by(compare_ranked);
    ranked
}

fn compare_ranked(a: &RankedListing, b: &RankedListing) -> Ordering {
    b.score
        .total
        .total_cmp(&a.score.total)
        .then_with(|| a.distance_km.total_cmp(&b.distance_km))
        .then_with(|| {
            a.candidate
                .listing
                .price_per_kwh
                .cmp(&b.candidate.listing.price_per_kwh)
        })
        .then_with(|| a.listing_id().cmp(&b.listing_id()))
}

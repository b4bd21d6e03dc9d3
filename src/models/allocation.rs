use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::listing::{GeoPoint, ListingCandidate};
use crate::error::EngineError;

/// Buyer preferences used to filter and score candidate listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BuyerPreferences {
    /// Search radius and distance-score horizon in km
    #[validate(range(exclusive_min = 0.0))]
    pub max_distance_km: f64,
    pub max_price_per_kwh: Option<Decimal>,
    #[serde(default)]
    pub prefer_renewable: bool,
    #[validate(range(min = 0.0, max = 5.0))]
    pub min_seller_rating: Option<f64>,
}

impl Default for BuyerPreferences {
    fn default() -> Self {
        Self {
            max_distance_km: 50.0,
            max_price_per_kwh: None,
            prefer_renewable: false,
            min_seller_rating: None,
        }
    }
}

impl BuyerPreferences {
    pub fn check(&self) -> Result<(), EngineError> {
        self.validate()?;
        if !self.max_distance_km.is_finite() {
            return Err(EngineError::invalid_input("max_distance_km must be finite"));
        }
        Ok(())
    }
}

/// Per-factor breakdown of a candidate's score
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub distance: f64,
    pub price: f64,
    pub rating: f64,
    pub reliability: f64,
    pub renewable: f64,
    pub total: f64,
}

impl ScoreBreakdown {
    pub fn component_sum(&self) -> f64 {
        self.distance + self.price + self.rating + self.reliability + self.renewable
    }
}

/// A candidate that survived filtering, with its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedListing {
    pub candidate: ListingCandidate,
    pub distance_km: f64,
    pub score: ScoreBreakdown,
}

impl RankedListing {
    pub fn listing_id(&self) -> Uuid {
        self.candidate.listing.id
    }

    pub fn seller_id(&self) -> Uuid {
        self.candidate.listing.seller_id
    }
}

/// One seller's contribution to a buyer's request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationLeg {
    pub listing_id: Uuid,
    pub seller_id: Uuid,
    pub buyer_id: Uuid,
    pub energy_kwh: Decimal,
    pub score: f64,
    pub distance_km: f64,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub total_energy_kwh: Decimal,
    pub total_cost: Decimal,
    pub average_price_per_kwh: Decimal,
    /// Buyer-side fee the legs would incur under the default direct-fee rate
    pub estimated_platform_fee: Decimal,
    pub seller_count: usize,
    pub average_distance_km: f64,
}

/// Greedy fulfilment plan. Partial plans are returned with `success = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub buyer_id: Uuid,
    pub requested_kwh: Decimal,
    pub allocated_kwh: Decimal,
    pub remaining_kwh: Decimal,
    pub success: bool,
    pub legs: Vec<AllocationLeg>,
    pub summary: AllocationSummary,
}

/// Buyer request for the combined find → rank → plan flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyRequest {
    pub buyer_id: Uuid,
    pub energy_kwh: Decimal,
    pub location: GeoPoint,
    pub preferences: BuyerPreferences,
    pub max_sellers: Option<usize>,
}

/// Outcome of executing one leg of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegOutcome {
    pub listing_id: Uuid,
    pub energy_kwh: Decimal,
    pub settlement_id: Option<Uuid>,
    pub error_code: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExecution {
    pub settled_kwh: Decimal,
    pub total_charged: Decimal,
    pub legs: Vec<LegOutcome>,
}

impl PlanExecution {
    pub fn all_settled(&self) -> bool {
        self.legs.iter().all(|leg| leg.settlement_id.is_some())
    }
}

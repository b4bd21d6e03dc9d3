use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

use crate::database::schema::types::ListingStatus;
use crate::error::{EngineError, Result};
use crate::models::{AllocationLeg, AllocationPlan, AllocationSummary, RankedListing};
use crate::utils::{metrics, round_money};

/// Greedy multi-seller planner.
///
/// Walks ranked candidates in order and takes as much as each can give, as
/// long as the take meets that listing's minimum purchase. Planning reads a
/// snapshot; every leg is re-validated when it is settled.
#[derive(Debug, Clone)]
pub struct GreedyAllocator {
    /// Buyer-side fee rate used for the plan's fee estimate
    estimated_fee_rate: Decimal,
    currency_scale: u32,
}

impl Default for GreedyAllocator {
    fn default() -> Self {
        Self {
            estimated_fee_rate: Decimal::new(5, 2),
            currency_scale: 2,
        }
    }
}

impl GreedyAllocator {
    pub fn new(estimated_fee_rate: Decimal, currency_scale: u32) -> Self {
        Self {
            estimated_fee_rate,
            currency_scale,
        }
    }

    pub fn plan(
        &self,
        buyer_id: Uuid,
        energy_needed: Decimal,
        ranked: &[RankedListing],
        max_sellers: Option<usize>,
    ) -> Result<AllocationPlan> {
        if energy_needed < Decimal::ZERO {
            return Err(EngineError::invalid_input("energy needed cannot be negative"));
        }

        let mut legs: Vec<AllocationLeg> = Vec::new();
        let mut seen = HashSet::new();
        let mut sellers: HashSet<Uuid> = HashSet::new();
        let mut remaining = energy_needed;

        for candidate in ranked {
            if remaining <= Decimal::ZERO {
                break;
            }

            let listing = &candidate.candidate.listing;
            if listing.seller_id == buyer_id || !seen.insert(listing.id) {
                continue;
            }
            // Further listings from sellers already in the plan stay eligible at the cap
            let new_seller = !sellers.contains(&listing.seller_id);
            if new_seller && max_sellers.is_some_and(|max| sellers.len() >= max) {
                continue;
            }
            if listing.status != ListingStatus::Active || listing.energy_kwh <= Decimal::ZERO {
                continue;
            }
            if listing.energy_kwh < listing.min_purchase_kwh {
                continue;
            }

            let take = remaining.min(listing.energy_kwh);
            if take < listing.min_purchase_kwh {
                debug!(
                    "Skipping listing {}: {} kWh left to allocate is below its minimum {}",
                    listing.id, take, listing.min_purchase_kwh
                );
                continue;
            }

            legs.push(AllocationLeg {
                listing_id: listing.id,
                seller_id: listing.seller_id,
                buyer_id,
                energy_kwh: take,
                score: candidate.score.total,
                distance_km: candidate.distance_km,
                unit_price: listing.price_per_kwh,
                subtotal: round_money(take * listing.price_per_kwh, self.currency_scale),
            });
            sellers.insert(listing.seller_id);
            remaining -= take;
        }

        let allocated: Decimal = legs.iter().map(|leg| leg.energy_kwh).sum();
        let success = remaining <= Decimal::ZERO;
        let summary = self.summarize(&legs);
        metrics::track_allocation_plan(success, legs.len());

        Ok(AllocationPlan {
            buyer_id,
            requested_kwh: energy_needed,
            allocated_kwh: allocated,
            remaining_kwh: remaining.max(Decimal::ZERO),
            success,
            legs,
            summary,
        })
    }

    fn summarize(&self, legs: &[AllocationLeg]) -> AllocationSummary {
        if legs.is_empty() {
            return AllocationSummary::default();
        }

        let total_energy: Decimal = legs.iter().map(|l| l.energy_kwh).sum();
        let total_cost: Decimal = legs.iter().map(|l| l.subtotal).sum();
        let sellers: HashSet<Uuid> = legs.iter().map(|l| l.seller_id).collect();
        let average_distance =
            legs.iter().map(|l| l.distance_km).sum::<f64>() / legs.len() as f64;

        AllocationSummary {
            total_energy_kwh: total_energy,
            total_cost,
            average_price_per_kwh: if total_energy.is_zero() {
                Decimal::ZERO
            } else {
                round_money(total_cost / total_energy, self.currency_scale + 2)
            },
            estimated_platform_fee: round_money(
                total_cost * self.estimated_fee_rate,
                self.currency_scale,
            ),
            seller_count: sellers.len(),
            average_distance_km: (average_distance * 100.0).round() / 100.0,
        }
    }
}

/// Plan with the default fee estimate
pub fn plan_allocation(
    buyer_id: Uuid,
    energy_needed: Decimal,
    ranked: &[RankedListing],
    max_sellers: Option<usize>,
) -> Result<AllocationPlan> {
    GreedyAllocator::default().plan(buyer_id, energy_needed, ranked, max_sellers)
}

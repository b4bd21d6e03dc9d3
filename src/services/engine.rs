use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{
    AllocationPlan, BuyerPreferences, EnergyRequest, GeoPoint, LegOutcome, ListingCandidate,
    PlanExecution, RankedListing, RefundRequest, SettlementRecord, SettlementRequest,
};
use crate::services::allocation::GreedyAllocator;
use crate::services::listing_directory::{GeoScope, ListingDirectory, ListingFilters};
use crate::services::reputation::{attach_reputations, ReputationSource};
use crate::services::scoring;
use crate::services::settlement::SettlementService;

/// Entry point wiring the read path (directory, scoring, allocation) to the
/// settlement core.
#[derive(Clone)]
pub struct MarketplaceEngine {
    directory: Arc<dyn ListingDirectory>,
    reputation: Arc<dyn ReputationSource>,
    allocator: GreedyAllocator,
    settlement: SettlementService,
}

impl MarketplaceEngine {
    pub fn new(
        directory: Arc<dyn ListingDirectory>,
        reputation: Arc<dyn ReputationSource>,
        allocator: GreedyAllocator,
        settlement: SettlementService,
    ) -> Self {
        Self {
            directory,
            reputation,
            allocator,
            settlement,
        }
    }

    pub fn settlement(&self) -> &SettlementService {
        &self.settlement
    }

    pub fn score_and_rank(
        &self,
        buyer_location: GeoPoint,
        preferences: &BuyerPreferences,
        candidates: Vec<ListingCandidate>,
    ) -> Vec<RankedListing> {
        scoring::score_and_rank(buyer_location, preferences, candidates)
    }

    pub fn plan_allocation(
        &self,
        buyer_id: Uuid,
        energy_needed: Decimal,
        ranked: &[RankedListing],
        max_sellers: Option<usize>,
    ) -> Result<AllocationPlan> {
        self.allocator.plan(buyer_id, energy_needed, ranked, max_sellers)
    }

    pub async fn settle(&self, request: SettlementRequest) -> Result<SettlementRecord> {
        self.settlement.settle(request).await
    }

    pub async fn refund(&self, request: RefundRequest) -> Result<SettlementRecord> {
        self.settlement.refund(request).await
    }

    /// Candidates for a buyer: directory query scoped to the search radius,
    /// with seller reputation attached, scored and ordered.
    pub async fn rank_for(&self, request: &EnergyRequest) -> Result<Vec<RankedListing>> {
        request.preferences.check()?;

        let filters = ListingFilters {
            max_price_per_kwh: request.preferences.max_price_per_kwh,
            renewable_only: false,
            exclude_seller: Some(request.buyer_id),
            ..Default::default()
        };
        let scope = GeoScope::new(request.location, request.preferences.max_distance_km);

        let listings = self.directory.find_active_listings(&filters, Some(&scope)).await?;
        let candidates = attach_reputations(self.reputation.as_ref(), listings).await?;
        Ok(self.score_and_rank(request.location, &request.preferences, candidates))
    }

    /// Directory query, ranking and greedy plan in one call
    pub async fn find_and_plan(&self, request: &EnergyRequest) -> Result<AllocationPlan> {
        let ranked = self.rank_for(request).await?;
        let plan = self.plan_allocation(
            request.buyer_id,
            request.energy_kwh,
            &ranked,
            request.max_sellers,
        )?;

        info!(
            "🔍 Planned {} of {} kWh for buyer {} across {} seller(s) from {} candidate(s)",
            plan.allocated_kwh,
            plan.requested_kwh,
            request.buyer_id,
            plan.summary.seller_count,
            ranked.len()
        );
        Ok(plan)
    }

    /// Settle every leg of a plan in order, continuing past failures.
    ///
    /// With a request key, each leg settles under `<key>:<listing id>` so the
    /// whole execution can be retried safely.
    pub async fn execute_plan(
        &self,
        plan: &AllocationPlan,
        idempotency_key: Option<&str>,
    ) -> Result<PlanExecution> {
        if idempotency_key.is_some_and(|key| key.trim().is_empty()) {
            return Err(EngineError::invalid_input("idempotency key cannot be blank"));
        }

        let mut outcomes = Vec::with_capacity(plan.legs.len());
        let mut settled_kwh = Decimal::ZERO;
        let mut total_charged = Decimal::ZERO;

        for leg in &plan.legs {
            let mut request = SettlementRequest::new(leg.listing_id, plan.buyer_id, leg.energy_kwh);
            if let Some(key) = idempotency_key {
                request = request.with_idempotency_key(format!("{}:{}", key, leg.listing_id));
            }

            match self.settlement.settle(request).await {
                Ok(record) => {
                    settled_kwh += record.energy_kwh;
                    total_charged += record.total_price;
                    outcomes.push(LegOutcome {
                        listing_id: leg.listing_id,
                        energy_kwh: leg.energy_kwh,
                        settlement_id: Some(record.id),
                        error_code: None,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("Leg on listing {} failed: {}", leg.listing_id, e);
                    outcomes.push(LegOutcome {
                        listing_id: leg.listing_id,
                        energy_kwh: leg.energy_kwh,
                        settlement_id: None,
                        error_code: serde_json::to_value(e.error_code())
                            .ok()
                            .and_then(|v| v.as_str().map(str::to_string)),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(PlanExecution {
            settled_kwh,
            total_charged,
            legs: outcomes,
        })
    }
}

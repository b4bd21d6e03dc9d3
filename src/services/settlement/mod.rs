pub mod fees;
pub mod types;

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::schema::types::{
    ListingStatus, RevenueType, SettlementKind, SettlementStatus,
};
use crate::database::store::{MarketStore, MarketTx};
use crate::error::{EngineError, Result};
use crate::models::{
    Listing, PlatformRevenueSummary, RefundRequest, RevenueEntry, SettlementRecord,
    SettlementRequest, SettlementStats, TransactionReason,
};
use crate::services::lease::{listing_resource, settlement_resource, LeaseProvider};
use crate::utils::{metrics, round_money, SharedClock};

pub use fees::{SettlementBreakdown, SettlementPolicy};
pub use types::SettlementConfig;

/// Executes purchases and refunds as atomic multi-party money movements.
///
/// Every purchase runs under an exclusive lease on its listing; everything
/// between validation and commit happens inside one unit of work, so a failed
/// settlement leaves the listing and all wallets exactly as they were.
#[derive(Clone)]
pub struct SettlementService {
    store: Arc<dyn MarketStore>,
    leases: Arc<dyn LeaseProvider>,
    clock: SharedClock,
    config: SettlementConfig,
}

impl SettlementService {
    /// Fails with `Configuration` when a fee policy or the currency scale is invalid.
    pub fn with_config(
        store: Arc<dyn MarketStore>,
        leases: Arc<dyn LeaseProvider>,
        clock: SharedClock,
        config: SettlementConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            leases,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Settle one purchase against one listing.
    ///
    /// Replaying an idempotency key the buyer already used returns the
    /// original record without moving any money.
    pub async fn settle(&self, request: SettlementRequest) -> Result<SettlementRecord> {
        let started = Instant::now();
        let result = self.settle_inner(&request).await;

        match &result {
            Ok((record, true)) => {
                metrics::track_settlement_replay();
                debug!("Idempotent replay of settlement {}", record.id);
            }
            Ok((_, false)) => {
                metrics::track_settlement("purchase", "completed", started.elapsed())
            }
            Err(e) => {
                metrics::track_settlement("purchase", e.kind(), started.elapsed());
                e.log("settle");
            }
        }
        result.map(|(record, _)| record)
    }

    async fn settle_inner(&self, request: &SettlementRequest) -> Result<(SettlementRecord, bool)> {
        match request.idempotency_key.as_deref() {
            Some(key) if key.trim().is_empty() => {
                return Err(EngineError::invalid_input("idempotency key cannot be blank"));
            }
            None if self.config.require_idempotency_key => {
                return Err(EngineError::invalid_input("an idempotency key is required"));
            }
            _ => {}
        }

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self.store.find_settlement_by_key(request.buyer_id, key).await? {
                return replay(existing, request).map(|record| (record, true));
            }
        }

        let _lease = self
            .leases
            .acquire(&listing_resource(request.listing_id), self.config.lock_wait())
            .await?;
        let mut tx = self.store.begin(self.config.lock_wait()).await?;
        let listing = tx.lock_listing(request.listing_id).await?;

        // A concurrent retry may have committed while this call waited for the lease.
        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = tx.find_settlement_by_key(request.buyer_id, key).await? {
                drop(tx);
                return replay(existing, request).map(|record| (record, true));
            }
        }

        match self.apply_purchase(tx, &listing, request).await {
            Ok(record) => Ok((record, false)),
            Err(err) => {
                self.record_failure(&listing, request, &err).await;
                Err(err)
            }
        }
    }

    async fn apply_purchase(
        &self,
        mut tx: Box<dyn MarketTx>,
        listing: &Listing,
        request: &SettlementRequest,
    ) -> Result<SettlementRecord> {
        let now = self.clock.now();
        listing.check_purchasable(request.buyer_id, request.energy_kwh, now)?;

        let policy = self.config.policy_for(listing.product_mode);
        let investors = if policy.shares_with_investors() {
            tx.investor_allocations(listing.seller_id).await?
        } else {
            Vec::new()
        };
        let breakdown = policy.compute(
            request.energy_kwh,
            listing.price_per_kwh,
            &investors,
            self.config.currency_scale,
        )?;
        if !breakdown.is_balanced() {
            return Err(EngineError::Internal(format!(
                "{} breakdown does not balance for listing {}",
                policy.name(),
                listing.id
            )));
        }

        let settlement_id = Uuid::new_v4();
        let mut parties = vec![request.buyer_id, listing.seller_id];
        parties.extend(breakdown.investor_shares.iter().map(|s| s.investor_id));
        tx.lock_wallets(&parties).await?;

        tx.debit(
            request.buyer_id,
            breakdown.buyer_total,
            TransactionReason::for_settlement(
                format!("Energy purchase: {} kWh from listing {}", request.energy_kwh, listing.id),
                settlement_id,
            ),
        )
        .await?;

        if breakdown.seller_credit > Decimal::ZERO {
            tx.credit(
                listing.seller_id,
                breakdown.seller_credit,
                TransactionReason::for_settlement(
                    format!("Energy sale: {} kWh on listing {}", request.energy_kwh, listing.id),
                    settlement_id,
                ),
            )
            .await?;
        }

        for share in breakdown.investor_shares.iter().filter(|s| s.amount > Decimal::ZERO) {
            tx.credit(
                share.investor_id,
                share.amount,
                TransactionReason::for_settlement(
                    format!("Investor profit share from host {}", listing.seller_id),
                    settlement_id,
                ),
            )
            .await?;
        }

        let mut updated = listing.clone();
        updated.decrement(request.energy_kwh, now)?;
        tx.save_listing(&updated).await?;

        let record = SettlementRecord {
            id: settlement_id,
            kind: SettlementKind::Purchase,
            status: SettlementStatus::Completed,
            listing_id: listing.id,
            buyer_id: request.buyer_id,
            seller_id: listing.seller_id,
            product_mode: listing.product_mode,
            energy_kwh: request.energy_kwh,
            unit_price: listing.price_per_kwh,
            subtotal: breakdown.subtotal,
            total_price: breakdown.buyer_total,
            platform_fee: breakdown.platform_fee,
            seller_credit: breakdown.seller_credit,
            investor_shares: breakdown.investor_shares.clone(),
            refund_of: None,
            idempotency_key: request.idempotency_key.clone(),
            reason: None,
            created_at: now,
            completed_at: Some(now),
        };
        tx.insert_settlement(&record).await?;

        if breakdown.platform_fee > Decimal::ZERO {
            tx.insert_revenue(&RevenueEntry {
                id: Uuid::new_v4(),
                settlement_id,
                amount: breakdown.platform_fee,
                revenue_type: breakdown.revenue_type,
                description: format!("{} on listing {}", policy.name(), listing.id),
                created_at: now,
            })
            .await?;
        }

        tx.commit().await?;

        info!(
            "📝 Created settlement {}: {} kWh from listing {} (buyer {} paid {}, seller {} received {})",
            settlement_id,
            request.energy_kwh,
            listing.id,
            request.buyer_id,
            record.total_price,
            listing.seller_id,
            record.seller_credit
        );
        if updated.status == ListingStatus::Sold {
            info!("🔋 Listing {} sold out", listing.id);
        }

        Ok(record)
    }

    /// Best-effort audit row for an attempt that failed after the lease was taken.
    /// Written outside the rolled-back unit of work.
    async fn record_failure(&self, listing: &Listing, request: &SettlementRequest, err: &EngineError) {
        let now = self.clock.now();
        let record = SettlementRecord {
            id: Uuid::new_v4(),
            kind: SettlementKind::Purchase,
            status: SettlementStatus::Failed,
            listing_id: listing.id,
            buyer_id: request.buyer_id,
            seller_id: listing.seller_id,
            product_mode: listing.product_mode,
            energy_kwh: request.energy_kwh,
            unit_price: listing.price_per_kwh,
            subtotal: round_money(request.energy_kwh * listing.price_per_kwh, self.config.currency_scale),
            total_price: Decimal::ZERO,
            platform_fee: Decimal::ZERO,
            seller_credit: Decimal::ZERO,
            investor_shares: Vec::new(),
            refund_of: None,
            idempotency_key: None,
            reason: Some(err.to_string()),
            created_at: now,
            completed_at: None,
        };

        if let Err(e) = self.store.record_settlement(&record).await {
            warn!("Failed to record failed settlement attempt on listing {}: {}", listing.id, e);
        }
    }

    /// Refund a completed purchase, fully or partly.
    ///
    /// The seller gives back at most what they were credited; anything above
    /// that comes out of platform revenue. Listing quantity is not restored.
    pub async fn refund(&self, request: RefundRequest) -> Result<SettlementRecord> {
        let started = Instant::now();
        let result = self.refund_inner(&request).await;

        match &result {
            Ok(_) => metrics::track_settlement("refund", "completed", started.elapsed()),
            Err(e) => {
                metrics::track_settlement("refund", e.kind(), started.elapsed());
                e.log("refund");
            }
        }
        result
    }

    async fn refund_inner(&self, request: &RefundRequest) -> Result<SettlementRecord> {
        if request.reason.trim().is_empty() {
            return Err(EngineError::invalid_input("a refund reason is required"));
        }

        let _lease = self
            .leases
            .acquire(&settlement_resource(request.settlement_id), self.config.lock_wait())
            .await?;
        let mut tx = self.store.begin(self.config.lock_wait()).await?;
        let original = tx.lock_settlement(request.settlement_id).await?;

        if original.kind != SettlementKind::Purchase {
            return Err(EngineError::RefundNotAllowed(
                "only purchases can be refunded".to_string(),
            ));
        }
        match original.status {
            SettlementStatus::Completed => {}
            SettlementStatus::Refunded => {
                return Err(EngineError::RefundNotAllowed(format!(
                    "settlement {} was already refunded",
                    original.id
                )));
            }
            other => {
                return Err(EngineError::RefundNotAllowed(format!(
                    "settlement {} is {}",
                    original.id, other
                )));
            }
        }

        let scale = self.config.currency_scale;
        let requested = round_money(request.amount.unwrap_or(original.total_price), scale);
        if requested <= Decimal::ZERO {
            return Err(EngineError::invalid_input("refund amount must be positive"));
        }
        let amount = requested.min(original.total_price);
        if amount < requested {
            debug!(
                "Refund of {} on settlement {} capped at {}",
                requested, original.id, amount
            );
        }
        let from_seller = amount.min(original.seller_credit);
        let from_platform = amount - from_seller;

        let now = self.clock.now();
        let refund_id = Uuid::new_v4();
        tx.lock_wallets(&[original.buyer_id, original.seller_id]).await?;

        tx.credit(
            original.buyer_id,
            amount,
            TransactionReason::for_settlement(
                format!("Refund of settlement {}: {}", original.id, request.reason),
                refund_id,
            ),
        )
        .await?;
        if from_seller > Decimal::ZERO {
            tx.debit(
                original.seller_id,
                from_seller,
                TransactionReason::for_settlement(
                    format!("Refund clawback for settlement {}", original.id),
                    refund_id,
                ),
            )
            .await?;
        }

        let record = SettlementRecord {
            id: refund_id,
            kind: SettlementKind::Refund,
            status: SettlementStatus::Completed,
            listing_id: original.listing_id,
            buyer_id: original.buyer_id,
            seller_id: original.seller_id,
            product_mode: original.product_mode,
            energy_kwh: original.energy_kwh,
            unit_price: original.unit_price,
            subtotal: amount,
            total_price: amount,
            platform_fee: from_platform,
            seller_credit: from_seller,
            investor_shares: Vec::new(),
            refund_of: Some(original.id),
            idempotency_key: None,
            reason: Some(request.reason.clone()),
            created_at: now,
            completed_at: Some(now),
        };
        tx.insert_settlement(&record).await?;
        tx.update_settlement_status(original.id, SettlementStatus::Refunded)
            .await?;

        if from_platform > Decimal::ZERO {
            tx.insert_revenue(&RevenueEntry {
                id: Uuid::new_v4(),
                settlement_id: refund_id,
                amount: -from_platform,
                revenue_type: RevenueType::RefundAdjustment,
                description: format!("Refund of settlement {}", original.id),
                created_at: now,
            })
            .await?;
        }

        tx.commit().await?;

        info!(
            "↩️ Refunded {} to buyer {} for settlement {} (seller {}, platform {})",
            amount, original.buyer_id, original.id, from_seller, from_platform
        );
        Ok(record)
    }

    pub async fn get_settlement(&self, id: Uuid) -> Result<SettlementRecord> {
        self.store
            .get_settlement(id)
            .await?
            .ok_or(EngineError::SettlementNotFound(id))
    }

    pub async fn platform_revenue(&self) -> Result<PlatformRevenueSummary> {
        let entries = self.store.revenue_entries(None).await?;
        Ok(PlatformRevenueSummary::from_entries(&entries))
    }

    pub async fn get_settlement_stats(&self) -> Result<SettlementStats> {
        self.store.settlement_stats().await
    }
}

fn replay(existing: SettlementRecord, request: &SettlementRequest) -> Result<SettlementRecord> {
    if existing.matches_request(request) {
        Ok(existing)
    } else {
        Err(EngineError::IdempotencyConflict(
            existing.idempotency_key.unwrap_or_default(),
        ))
    }
}

use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::database::store::MarketStore;
use crate::error::{EngineError, Result};
use crate::models::{Listing, ListingUpdate, NewListing};
use crate::services::lease::{listing_resource, InProcessLeaseProvider, LeaseProvider};
use crate::utils::{system_clock, SharedClock};

/// Seller-side listing lifecycle.
///
/// Edits and cancellations take the same listing lease as settlement, so a
/// cancellation and an in-flight purchase are strictly ordered.
#[derive(Clone)]
pub struct ListingService {
    store: Arc<dyn MarketStore>,
    leases: Arc<dyn LeaseProvider>,
    clock: SharedClock,
    lock_wait: Duration,
}

impl ListingService {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self::with_config(
            store,
            Arc::new(InProcessLeaseProvider::new()),
            system_clock(),
            Duration::from_secs(2),
        )
    }

    pub fn with_config(
        store: Arc<dyn MarketStore>,
        leases: Arc<dyn LeaseProvider>,
        clock: SharedClock,
        lock_wait: Duration,
    ) -> Self {
        Self {
            store,
            leases,
            clock,
            lock_wait,
        }
    }

    pub async fn create_listing(&self, input: NewListing) -> Result<Listing> {
        input.check()?;

        let listing = input.into_listing(Uuid::new_v4(), self.clock.now());
        let mut tx = self.store.begin(self.lock_wait).await?;
        tx.insert_listing(&listing).await?;
        tx.commit().await?;

        info!(
            "📋 Listing {} created by seller {}: {} kWh at {}/kWh ({})",
            listing.id, listing.seller_id, listing.energy_kwh, listing.price_per_kwh, listing.product_mode
        );
        Ok(listing)
    }

    pub async fn update_listing(
        &self,
        seller_id: Uuid,
        listing_id: Uuid,
        update: ListingUpdate,
    ) -> Result<Listing> {
        self.with_owned_listing(seller_id, listing_id, |listing, now| {
            listing.apply_update(&update, now)
        })
        .await
        .inspect(|listing| info!("✏️ Listing {} updated by seller {}", listing.id, seller_id))
    }

    pub async fn cancel_listing(&self, seller_id: Uuid, listing_id: Uuid) -> Result<Listing> {
        self.with_owned_listing(seller_id, listing_id, |listing, now| listing.cancel(now))
            .await
            .inspect(|listing| info!("🚫 Listing {} cancelled by seller {}", listing.id, seller_id))
    }

    pub async fn get_listing(&self, listing_id: Uuid) -> Result<Listing> {
        self.store
            .get_listing(listing_id)
            .await?
            .ok_or(EngineError::ListingNotFound(listing_id))
    }

    async fn with_owned_listing<F>(&self, seller_id: Uuid, listing_id: Uuid, change: F) -> Result<Listing>
    where
        F: FnOnce(&mut Listing, chrono::DateTime<chrono::Utc>) -> Result<()> + Send,
    {
        let _lease = self
            .leases
            .acquire(&listing_resource(listing_id), self.lock_wait)
            .await?;
        let mut tx = self.store.begin(self.lock_wait).await?;
        let mut listing = tx.lock_listing(listing_id).await?;

        if listing.seller_id != seller_id {
            return Err(EngineError::Forbidden(format!(
                "listing {} belongs to another seller",
                listing_id
            )));
        }

        change(&mut listing, self.clock.now())?;
        tx.save_listing(&listing).await?;
        tx.commit().await?;
        Ok(listing)
    }
}

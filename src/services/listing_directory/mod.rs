pub mod cached;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::schema::types::{ListingStatus, ProductMode};
use crate::error::Result;
use crate::models::{GeoPoint, Listing};
use crate::services::geo_filter::{planar_distance_km, BoundingBox};

pub use cached::CachedListingDirectory;

/// Attribute filters for a directory query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingFilters {
    pub max_price_per_kwh: Option<Decimal>,
    /// Only listings with at least this much energy left
    pub min_energy_kwh: Option<Decimal>,
    #[serde(default)]
    pub renewable_only: bool,
    pub product_mode: Option<ProductMode>,
    /// Typically the buyer, whose own listings are never candidates
    pub exclude_seller: Option<Uuid>,
    pub limit: Option<usize>,
}

/// Geographic scope of a directory query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoScope {
    pub center: GeoPoint,
    pub radius_km: f64,
}

impl GeoScope {
    pub fn new(center: GeoPoint, radius_km: f64) -> Self {
        Self { center, radius_km }
    }

    /// Listings without coordinates stay in scope; scoring resolves them
    /// against the seller's registered address.
    pub fn admits(&self, location: Option<GeoPoint>) -> bool {
        match location {
            None => true,
            Some(point) => {
                BoundingBox::around(self.center, self.radius_km).contains(point)
                    && planar_distance_km(self.center, point) <= self.radius_km
            }
        }
    }
}

/// Read side of the listing store. Results may be stale by up to the cache TTL.
#[async_trait]
pub trait ListingDirectory: Send + Sync {
    /// Active listings whose availability window contains "now"
    async fn find_active_listings(
        &self,
        filters: &ListingFilters,
        scope: Option<&GeoScope>,
    ) -> Result<Vec<Listing>>;
}

/// Whether a listing satisfies a directory query at `now`
pub fn listing_matches(
    listing: &Listing,
    filters: &ListingFilters,
    scope: Option<&GeoScope>,
    now: DateTime<Utc>,
) -> bool {
    if listing.status != ListingStatus::Active || !listing.is_open_at(now) {
        return false;
    }
    if listing.energy_kwh <= Decimal::ZERO {
        return false;
    }
    if let Some(max_price) = filters.max_price_per_kwh {
        if listing.price_per_kwh > max_price {
            return false;
        }
    }
    if let Some(min_energy) = filters.min_energy_kwh {
        if listing.energy_kwh < min_energy {
            return false;
        }
    }
    if filters.renewable_only && !listing.renewable_certified {
        return false;
    }
    if let Some(mode) = filters.product_mode {
        if listing.product_mode != mode {
            return false;
        }
    }
    if filters.exclude_seller == Some(listing.seller_id) {
        return false;
    }
    scope.map_or(true, |scope| scope.admits(listing.location))
}

/// Stable directory ordering: cheapest first, then most energy, then id
pub fn sort_listings(listings: &mut [Listing]) {
    listings.sort_by(|a, b| {
        a.price_per_kwh
            .cmp(&b.price_per_kwh)
            .then_with(|| b.energy_kwh.cmp(&a.energy_kwh))
            .then_with(|| a.id.cmp(&b.id))
    });
}

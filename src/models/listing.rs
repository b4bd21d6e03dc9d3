use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::database::schema::types::{ListingStatus, ProductMode};
use crate::error::EngineError;

/// Latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A seller's offer of energy at a unit price over an availability window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub energy_kwh: Decimal,
    pub price_per_kwh: Decimal,
    pub min_purchase_kwh: Decimal,
    pub renewable_certified: bool,
    pub location: Option<GeoPoint>,
    pub available_from: DateTime<Utc>,
    pub available_to: DateTime<Utc>,
    pub status: ListingStatus,
    pub product_mode: ProductMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    /// Whether `now` falls inside the half-open availability window
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.available_from <= now && now < self.available_to
    }

    /// Checks a purchase of `energy_kwh` by `buyer_id` against the current
    /// listing state. Must be called while holding the listing lease.
    pub fn check_purchasable(
        &self,
        buyer_id: Uuid,
        energy_kwh: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if self.status != ListingStatus::Active {
            return Err(EngineError::unavailable(
                self.id,
                format!("listing is {}", self.status),
            ));
        }
        if now >= self.available_to {
            return Err(EngineError::unavailable(self.id, "availability window has ended"));
        }
        if now < self.available_from {
            return Err(EngineError::unavailable(self.id, "availability window has not opened"));
        }
        if buyer_id == self.seller_id {
            return Err(EngineError::SelfPurchaseForbidden(buyer_id));
        }
        if energy_kwh <= Decimal::ZERO {
            return Err(EngineError::invalid_input("energy quantity must be positive"));
        }
        if energy_kwh < self.min_purchase_kwh {
            return Err(EngineError::BelowMinimumPurchase {
                requested: energy_kwh,
                minimum: self.min_purchase_kwh,
            });
        }
        if energy_kwh > self.energy_kwh {
            return Err(EngineError::InsufficientQuantity {
                requested: energy_kwh,
                available: self.energy_kwh,
            });
        }
        Ok(())
    }

    /// Remove settled energy; flips the listing to sold once it reaches zero.
    pub fn decrement(&mut self, energy_kwh: Decimal, now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.status != ListingStatus::Active {
            return Err(EngineError::unavailable(
                self.id,
                format!("listing is {}", self.status),
            ));
        }
        if energy_kwh > self.energy_kwh {
            return Err(EngineError::InsufficientQuantity {
                requested: energy_kwh,
                available: self.energy_kwh,
            });
        }
        self.energy_kwh -= energy_kwh;
        if self.energy_kwh <= Decimal::ZERO {
            self.energy_kwh = Decimal::ZERO;
            self.status = ListingStatus::Sold;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Seller-initiated cancellation. Terminal.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.status != ListingStatus::Active {
            return Err(EngineError::unavailable(
                self.id,
                format!("cannot cancel a listing that is {}", self.status),
            ));
        }
        self.status = ListingStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    /// Seller edit. Quantity may only go down while the listing is active.
    pub fn apply_update(&mut self, update: &ListingUpdate, now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.status != ListingStatus::Active {
            return Err(EngineError::unavailable(
                self.id,
                format!("cannot edit a listing that is {}", self.status),
            ));
        }

        let mut next = self.clone();
        if let Some(price) = update.price_per_kwh {
            if price <= Decimal::ZERO {
                return Err(EngineError::invalid_input("price_per_kwh must be positive"));
            }
            next.price_per_kwh = price;
        }
        if let Some(energy) = update.energy_kwh {
            if energy <= Decimal::ZERO {
                return Err(EngineError::invalid_input(
                    "energy_kwh must stay positive; cancel the listing to withdraw it",
                ));
            }
            if energy > self.energy_kwh {
                return Err(EngineError::invalid_input(
                    "energy_kwh can only be reduced on an active listing",
                ));
            }
            next.energy_kwh = energy;
        }
        if let Some(min) = update.min_purchase_kwh {
            if min < Decimal::ZERO {
                return Err(EngineError::invalid_input("min_purchase_kwh cannot be negative"));
            }
            next.min_purchase_kwh = min;
        }
        if let Some(to) = update.available_to {
            if to <= next.available_from {
                return Err(EngineError::invalid_input(
                    "available_to must be after available_from",
                ));
            }
            next.available_to = to;
        }

        if next.min_purchase_kwh > next.energy_kwh {
            return Err(EngineError::invalid_input(
                "min_purchase_kwh cannot exceed the remaining energy_kwh",
            ));
        }
        next.updated_at = now;
        *self = next;
        Ok(())
    }
}

/// Seller input for a new listing
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewListing {
    pub seller_id: Uuid,
    pub energy_kwh: Decimal,
    pub price_per_kwh: Decimal,
    #[serde(default)]
    pub min_purchase_kwh: Decimal,
    #[serde(default)]
    pub renewable_certified: bool,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    pub available_from: DateTime<Utc>,
    pub available_to: DateTime<Utc>,
    pub product_mode: ProductMode,
}

impl NewListing {
    /// Field checks the derive cannot express
    pub fn check(&self) -> Result<(), EngineError> {
        self.validate()?;

        if self.energy_kwh <= Decimal::ZERO {
            return Err(EngineError::invalid_input("energy_kwh must be positive"));
        }
        if self.price_per_kwh <= Decimal::ZERO {
            return Err(EngineError::invalid_input("price_per_kwh must be positive"));
        }
        if self.min_purchase_kwh < Decimal::ZERO || self.min_purchase_kwh > self.energy_kwh {
            return Err(EngineError::invalid_input(
                "min_purchase_kwh must be between 0 and energy_kwh",
            ));
        }
        if self.available_from >= self.available_to {
            return Err(EngineError::invalid_input(
                "available_from must be before available_to",
            ));
        }
        if self.latitude.is_some() != self.longitude.is_some() {
            return Err(EngineError::invalid_input(
                "latitude and longitude must be given together",
            ));
        }
        Ok(())
    }

    pub fn location(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        }
    }

    pub fn into_listing(self, id: Uuid, now: DateTime<Utc>) -> Listing {
        let location = self.location();
        Listing {
            id,
            seller_id: self.seller_id,
            energy_kwh: self.energy_kwh,
            price_per_kwh: self.price_per_kwh,
            min_purchase_kwh: self.min_purchase_kwh,
            renewable_certified: self.renewable_certified,
            location,
            available_from: self.available_from,
            available_to: self.available_to,
            status: ListingStatus::Active,
            product_mode: self.product_mode,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Seller edit; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingUpdate {
    pub price_per_kwh: Option<Decimal>,
    pub energy_kwh: Option<Decimal>,
    pub min_purchase_kwh: Option<Decimal>,
    pub available_to: Option<DateTime<Utc>>,
}

/// Seller track record supplied by the reputation collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerReputation {
    pub seller_id: Uuid,
    /// Average rating on a 0–5 scale
    pub average_rating: f64,
    pub completed_transactions: u32,
    pub cancelled_transactions: u32,
    /// Registered address point, used when a listing has no coordinates
    pub registered_location: Option<GeoPoint>,
}

impl SellerReputation {
    /// Neutral reputation for sellers the collaborator knows nothing about
    pub fn unknown(seller_id: Uuid) -> Self {
        Self {
            seller_id,
            average_rating: 0.0,
            completed_transactions: 0,
            cancelled_transactions: 0,
            registered_location: None,
        }
    }
}

/// A listing as served by the directory, with seller metadata attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingCandidate {
    pub listing: Listing,
    pub reputation: SellerReputation,
}

impl ListingCandidate {
    /// Listing point, falling back to the seller's registered address
    pub fn effective_location(&self) -> Option<GeoPoint> {
        self.listing
            .location
            .or(self.reputation.registered_location)
    }
}

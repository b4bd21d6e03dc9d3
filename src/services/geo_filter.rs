//! Radius queries on decimal-degree coordinates.
//!
//! Distances use a flat approximation (`sqrt(dlat² + dlon²) × 111`) rather
//! than great-circle distance. The error grows with latitude and radius; the
//! ranking and the directory index both depend on this exact formula.

use crate::models::GeoPoint;

/// Kilometres per degree used throughout the engine
pub const KM_PER_DEGREE: f64 = 111.0;

pub fn km_to_degrees(km: f64) -> f64 {
    km / KM_PER_DEGREE
}

/// Planar distance between two points in km
pub fn planar_distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let dlat = a.latitude - b.latitude;
    let dlon = a.longitude - b.longitude;
    (dlat * dlat + dlon * dlon).sqrt() * KM_PER_DEGREE
}

/// Axis-aligned box used as a cheap prefilter before exact distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl BoundingBox {
    pub fn around(center: GeoPoint, radius_km: f64) -> Self {
        let delta = km_to_degrees(radius_km);
        Self {
            min_latitude: center.latitude - delta,
            max_latitude: center.latitude + delta,
            min_longitude: center.longitude - delta,
            max_longitude: center.longitude + delta,
        }
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        point.latitude >= self.min_latitude
            && point.latitude <= self.max_latitude
            && point.longitude >= self.min_longitude
            && point.longitude <= self.max_longitude
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Nearest,
    Farthest,
    /// Keep the input order
    Unsorted,
}

/// Anything carrying an optional point
pub trait Located {
    fn location(&self) -> Option<GeoPoint>;
}

impl Located for GeoPoint {
    fn location(&self) -> Option<GeoPoint> {
        Some(*self)
    }
}

/// A candidate without coordinates falls back to the seller's registered address
impl Located for crate::models::ListingCandidate {
    fn location(&self) -> Option<GeoPoint> {
        self.effective_location()
    }
}

/// Items within `radius_km` of `center`, paired with their distance, nearest first.
/// Items without coordinates are dropped.
pub fn filter_within_radius<T: Located>(
    center: GeoPoint,
    radius_km: f64,
    items: Vec<T>,
) -> Vec<(T, f64)> {
    filter_within_radius_sorted(center, radius_km, items, SortOrder::Nearest)
}

pub fn filter_within_radius_sorted<T: Located>(
    center: GeoPoint,
    radius_km: f64,
    items: Vec<T>,
    order: SortOrder,
) -> Vec<(T, f64)> {
    if !(radius_km >= 0.0) {
        return Vec::new();
    }
    let bounds = BoundingBox::around(center, radius_km);

    let mut hits: Vec<(T, f64)> = items
        .into_iter()
        .filter_map(|item| {
            let point = item.location()?;
            if !bounds.contains(point) {
                return None;
            }
            let distance = planar_distance_km(center, point);
            (distance <= radius_km).then_some((item, distance))
        })
        .collect();

    match order {
        SortOrder::Nearest => hits.sort_by(|a, b| a.1.total_cmp(&b.1)),
        SortOrder::Farthest => hits.sort_by(|a, b| b.1.total_cmp(&a.1)),
        SortOrder::Unsorted => {}
    }
    hits
}

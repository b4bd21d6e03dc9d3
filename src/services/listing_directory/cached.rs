use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use super::{GeoScope, ListingDirectory, ListingFilters};
use crate::error::Result;
use crate::models::Listing;
use crate::utils::metrics;

/// Read-through TTL cache in front of another directory.
///
/// Entries are keyed by the query. Staleness is bounded by `ttl`; the
/// settlement path never reads from here.
#[derive(Clone)]
pub struct CachedListingDirectory {
    inner: Arc<dyn ListingDirectory>,
    ttl: Duration,
    entries: Arc<RwLock<HashMap<String, (Instant, Vec<Listing>)>>>,
}

impl CachedListingDirectory {
    pub fn new(inner: Arc<dyn ListingDirectory>) -> Self {
        Self::with_ttl(inner, Duration::from_secs(30))
    }

    pub fn with_ttl(inner: Arc<dyn ListingDirectory>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn cache_key(filters: &ListingFilters, scope: Option<&GeoScope>) -> String {
        format!("{:?}|{:?}", filters, scope)
    }

    /// Drop every cached query, e.g. after a seller edits a listing
    pub async fn invalidate(&self) {
        self.entries.write().await.clear();
        metrics::track_listing_cache_size(0);
    }

    pub async fn cached_queries(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl ListingDirectory for CachedListingDirectory {
    async fn find_active_listings(
        &self,
        filters: &ListingFilters,
        scope: Option<&GeoScope>,
    ) -> Result<Vec<Listing>> {
        let key = Self::cache_key(filters, scope);

        {
            let entries = self.entries.read().await;
            if let Some((loaded_at, listings)) = entries.get(&key) {
                if loaded_at.elapsed() < self.ttl {
                    metrics::track_listing_cache(true);
                    return Ok(listings.clone());
                }
            }
        }

        metrics::track_listing_cache(false);
        let listings = self.inner.find_active_listings(filters, scope).await?;

        let mut entries = self.entries.write().await;
        entries.retain(|_, (loaded_at, _)| loaded_at.elapsed() < self.ttl);
        entries.insert(key, (Instant::now(), listings.clone()));
        metrics::track_listing_cache_size(entries.len());
        debug!("🔄 Listing cache refreshed: {} listings", listings.len());

        Ok(listings)
    }
}

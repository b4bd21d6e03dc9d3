use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Listing, ListingCandidate, SellerReputation};

/// Seller track records, owned by a collaborator outside the engine
#[async_trait]
pub trait ReputationSource: Send + Sync {
    async fn seller_reputation(&self, seller_id: Uuid) -> Result<Option<SellerReputation>>;

    async fn seller_reputations(
        &self,
        seller_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, SellerReputation>> {
        let mut found = HashMap::with_capacity(seller_ids.len());
        for id in seller_ids {
            if found.contains_key(id) {
                continue;
            }
            if let Some(reputation) = self.seller_reputation(*id).await? {
                found.insert(*id, reputation);
            }
        }
        Ok(found)
    }
}

/// Pair each listing with its seller's reputation. Unknown sellers get a
/// neutral record rather than being dropped.
pub async fn attach_reputations(
    source: &dyn ReputationSource,
    listings: Vec<Listing>,
) -> Result<Vec<ListingCandidate>> {
    let mut seller_ids: Vec<Uuid> = listings.iter().map(|l| l.seller_id).collect();
    seller_ids.sort();
    seller_ids.dedup();

    let reputations = source.seller_reputations(&seller_ids).await?;

    Ok(listings
        .into_iter()
        .map(|listing| {
            let reputation = reputations
                .get(&listing.seller_id)
                .cloned()
                .unwrap_or_else(|| SellerReputation::unknown(listing.seller_id));
            ListingCandidate { listing, reputation }
        })
        .collect())
}

// Engine services
// Read path (geo filter, directory, scoring, allocation) and the settlement core

pub mod allocation;
pub mod engine;
pub mod geo_filter;
pub mod lease;
pub mod listing_directory;
pub mod listing_service;
pub mod reputation;
pub mod scoring;
pub mod settlement;
pub mod wallet;

pub use allocation::GreedyAllocator;
pub use engine::MarketplaceEngine;
pub use lease::{InProcessLeaseProvider, LeaseProvider, RedisLeaseProvider};
pub use listing_directory::{CachedListingDirectory, GeoScope, ListingDirectory, ListingFilters};
pub use listing_service::ListingService;
pub use reputation::ReputationSource;
pub use settlement::{SettlementConfig, SettlementPolicy, SettlementService};
pub use wallet::{WalletService, WalletStore};

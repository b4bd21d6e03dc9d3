pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::EngineConfig;
pub use database::{InMemoryMarketStore, MarketStore, PgMarketStore};
pub use error::{EngineError, ErrorCode, Result};
pub use services::{
    GreedyAllocator, ListingService, MarketplaceEngine, SettlementConfig, SettlementPolicy,
    SettlementService, WalletService,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use energy_settlement_engine::config::EngineConfig;
use energy_settlement_engine::database::{self, PgMarketStore};
use energy_settlement_engine::models::{
    BuyerPreferences, EnergyRequest, GeoPoint, RefundRequest, SettlementRequest,
};
use energy_settlement_engine::services::lease::{
    InProcessLeaseProvider, LeaseProvider, RedisLeaseProvider,
};
use energy_settlement_engine::services::listing_directory::{CachedListingDirectory, ListingDirectory};
use energy_settlement_engine::services::{
    GreedyAllocator, ListingService, MarketplaceEngine, SettlementService, WalletService,
};
use energy_settlement_engine::utils::system_clock;

#[derive(Parser, Debug)]
#[command(name = "settlement-engine")]
#[command(version, about = "Energy allocation & settlement engine")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "ENGINE_CONFIG_FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations
    Migrate,

    /// Rank candidate listings for a buyer without planning
    Rank {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Rank candidate listings for a buyer and build an allocation plan
    Plan {
        #[command(flatten)]
        request: RequestArgs,
        /// Settle every leg of the plan
        #[arg(long)]
        execute: bool,
        /// Idempotency key for the execution; legs derive their own keys from it
        #[arg(long)]
        key: Option<String>,
    },

    /// Settle one purchase against one listing
    Settle {
        #[arg(long)]
        listing: Uuid,
        #[arg(long)]
        buyer: Uuid,
        #[arg(long)]
        kwh: Decimal,
        #[arg(long)]
        key: Option<String>,
    },

    /// Refund a completed purchase, fully or partly
    Refund {
        #[arg(long)]
        settlement: Uuid,
        #[arg(long)]
        amount: Option<Decimal>,
        #[arg(long)]
        reason: String,
    },

    /// Cancel an active listing on behalf of its seller
    CancelListing {
        #[arg(long)]
        seller: Uuid,
        #[arg(long)]
        listing: Uuid,
    },

    /// Show a wallet balance and its latest movements
    Balance {
        #[arg(long)]
        owner: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Credit funds to a wallet
    Deposit {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        amount: Decimal,
        #[arg(long, default_value = "deposit")]
        description: String,
    },

    /// Platform revenue and settlement statistics
    Report,
}

#[derive(Args, Debug)]
struct RequestArgs {
    #[arg(long)]
    buyer: Uuid,
    #[arg(long)]
    kwh: Decimal,
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,
    #[arg(long, allow_hyphen_values = true)]
    lng: f64,
    #[arg(long)]
    max_distance_km: Option<f64>,
    #[arg(long)]
    max_price: Option<Decimal>,
    #[arg(long)]
    prefer_renewable: bool,
    #[arg(long)]
    min_rating: Option<f64>,
    #[arg(long)]
    max_sellers: Option<usize>,
}

impl RequestArgs {
    fn into_request(self, config: &EngineConfig) -> EnergyRequest {
        EnergyRequest {
            buyer_id: self.buyer,
            energy_kwh: self.kwh,
            location: GeoPoint::new(self.lat, self.lng),
            preferences: BuyerPreferences {
                max_distance_km: self
                    .max_distance_km
                    .unwrap_or(config.scoring.default_max_distance_km),
                max_price_per_kwh: self.max_price,
                prefer_renewable: self.prefer_renewable,
                min_seller_rating: self.min_rating,
            },
            max_sellers: self.max_sellers,
        }
    }
}

struct Runtime {
    pool: database::DatabasePool,
    engine: MarketplaceEngine,
    listings: ListingService,
    wallets: WalletService,
    config: EngineConfig,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(config: &EngineConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("energy_settlement_engine={0},settlement_engine={0}", config.log_level.as_filter()).into()
    });

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_runtime(config: EngineConfig) -> Result<Runtime> {
    let pool = database::setup_database(
        &config.database.url,
        config.database.max_connections,
        config.database.acquire_timeout(),
    )
    .await?;

    let clock = system_clock();
    let store = Arc::new(
        PgMarketStore::with_clock(pool.clone(), clock.clone()).with_currency(&config.settlement.currency),
    );

    let leases: Arc<dyn LeaseProvider> = match &config.redis.url {
        Some(url) => {
            let provider = RedisLeaseProvider::with_default_config(url)
                .await
                .context("failed to connect to Redis for leases")?;
            info!("🔒 Using Redis leases");
            Arc::new(provider)
        }
        None => {
            warn!("No Redis configured; leases only serialize within this process");
            Arc::new(InProcessLeaseProvider::new())
        }
    };

    let directory: Arc<dyn ListingDirectory> = match config.cache_ttl() {
        Some(ttl) => Arc::new(CachedListingDirectory::with_ttl(store.clone(), ttl)),
        None => store.clone(),
    };

    let settlement = SettlementService::with_config(
        store.clone(),
        leases.clone(),
        clock.clone(),
        config.settlement.clone(),
    )?;
    let estimated_fee = match &config.settlement.marketplace {
        energy_settlement_engine::SettlementPolicy::DirectFee { buyer_fee_rate, .. } => *buyer_fee_rate,
        _ => Decimal::ZERO,
    };
    let allocator = GreedyAllocator::new(estimated_fee, config.settlement.currency_scale);

    Ok(Runtime {
        pool,
        engine: MarketplaceEngine::new(directory, store.clone(), allocator, settlement),
        listings: ListingService::with_config(
            store.clone(),
            leases,
            clock,
            config.settlement.lock_wait(),
        ),
        wallets: WalletService::with_currency(store, config.settlement.currency.clone()),
        config,
    })
}

async fn run(command: Command, runtime: Runtime) -> Result<()> {
    match command {
        Command::Migrate => database::run_migrations(&runtime.pool).await?,
        Command::Rank { request } => {
            let request = request.into_request(&runtime.config);
            print_json(&runtime.engine.rank_for(&request).await?)?;
        }
        Command::Plan {
            request,
            execute,
            key,
        } => {
            let request = request.into_request(&runtime.config);
            let plan = runtime.engine.find_and_plan(&request).await?;
            print_json(&plan)?;

            if execute {
                let execution = runtime.engine.execute_plan(&plan, key.as_deref()).await?;
                print_json(&execution)?;
            }
        }
        Command::Settle {
            listing,
            buyer,
            kwh,
            key,
        } => {
            let mut request = SettlementRequest::new(listing, buyer, kwh);
            if let Some(key) = key {
                request = request.with_idempotency_key(key);
            }
            print_json(&runtime.engine.settle(request).await?)?;
        }
        Command::Refund {
            settlement,
            amount,
            reason,
        } => {
            let record = runtime
                .engine
                .refund(RefundRequest {
                    settlement_id: settlement,
                    amount,
                    reason,
                })
                .await?;
            print_json(&record)?;
        }
        Command::CancelListing { seller, listing } => {
            print_json(&runtime.listings.cancel_listing(seller, listing).await?)?;
        }
        Command::Balance { owner, limit } => {
            print_json(&runtime.wallets.balance(owner).await?)?;
            print_json(&runtime.wallets.history(owner, limit).await?)?;
        }
        Command::Deposit {
            owner,
            amount,
            description,
        } => {
            let tx = runtime
                .wallets
                .deposit(owner, amount, &description, runtime.config.settlement.lock_wait())
                .await?;
            print_json(&tx)?;
        }
        Command::Report => {
            let settlement = runtime.engine.settlement();
            print_json(&settlement.platform_revenue().await?)?;
            print_json(&settlement.get_settlement_stats().await?)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;
    init_tracing(&config);

    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new().install() {
        warn!("Prometheus exporter not installed: {}", e);
    } else {
        info!("Prometheus metrics exporter initialized");
    }

    let runtime = build_runtime(config).await?;
    if let Err(e) = run(cli.command, runtime).await {
        if let Some(engine_err) = e.downcast_ref::<energy_settlement_engine::EngineError>() {
            engine_err.log("cli");
        }
        return Err(e);
    }
    Ok(())
}

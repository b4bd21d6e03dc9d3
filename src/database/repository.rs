//! Postgres-backed market store.
//!
//! Each [`PgTx`] wraps one database transaction. `lock_timeout` is set for
//! the transaction when it begins, so every `SELECT ... FOR UPDATE` waits at
//! most the configured lock wait and then surfaces as `LockContention`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::database::schema::types::SettlementStatus;
use crate::database::store::{MarketStore, MarketTx};
use crate::error::{map_lock_error, EngineError, Result};
use crate::models::{
    BalanceChange, GeoPoint, InvestorAllocation, InvestorShare, Listing, RevenueEntry, SellerReputation,
    SettlementRecord, SettlementStats, Wallet, WalletTransaction,
};
use crate::services::geo_filter::BoundingBox;
use crate::services::lease::{listing_resource, settlement_resource, wallet_resource};
use crate::services::listing_directory::{listing_matches, GeoScope, ListingDirectory, ListingFilters};
use crate::services::reputation::ReputationSource;
use crate::services::wallet::WalletStore;
use crate::utils::{system_clock, SharedClock};

const LISTING_COLUMNS: &str = "id, seller_id, energy_kwh, price_per_kwh, min_purchase_kwh, \
     renewable_certified, latitude, longitude, available_from, available_to, status, \
     product_mode, created_at, updated_at";

const SETTLEMENT_COLUMNS: &str = "id, kind, status, listing_id, buyer_id, seller_id, \
     product_mode, energy_kwh, unit_price, subtotal, total_price, platform_fee, seller_credit, \
     investor_shares, refund_of, idempotency_key, reason, created_at, completed_at";

const WALLET_TX_COLUMNS: &str = "id, owner_id, direction, amount, balance_before, balance_after, \
     reason, settlement_id, created_at";

fn point(latitude: Option<f64>, longitude: Option<f64>) -> Option<GeoPoint> {
    match (latitude, longitude) {
        (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
        _ => None,
    }
}

fn listing_from_row(row: &PgRow) -> Result<Listing> {
    Ok(Listing {
        id: row.try_get("id")?,
        seller_id: row.try_get("seller_id")?,
        energy_kwh: row.try_get("energy_kwh")?,
        price_per_kwh: row.try_get("price_per_kwh")?,
        min_purchase_kwh: row.try_get("min_purchase_kwh")?,
        renewable_certified: row.try_get("renewable_certified")?,
        location: point(row.try_get("latitude")?, row.try_get("longitude")?),
        available_from: row.try_get("available_from")?,
        available_to: row.try_get("available_to")?,
        status: row.try_get("status")?,
        product_mode: row.try_get("product_mode")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn settlement_from_row(row: &PgRow) -> Result<SettlementRecord> {
    let investor_shares: Json<Vec<InvestorShare>> = row.try_get("investor_shares")?;
    Ok(SettlementRecord {
        id: row.try_get("id")?,
        kind: row.try_get("kind")?,
        status: row.try_get("status")?,
        listing_id: row.try_get("listing_id")?,
        buyer_id: row.try_get("buyer_id")?,
        seller_id: row.try_get("seller_id")?,
        product_mode: row.try_get("product_mode")?,
        energy_kwh: row.try_get("energy_kwh")?,
        unit_price: row.try_get("unit_price")?,
        subtotal: row.try_get("subtotal")?,
        total_price: row.try_get("total_price")?,
        platform_fee: row.try_get("platform_fee")?,
        seller_credit: row.try_get("seller_credit")?,
        investor_shares: investor_shares.0,
        refund_of: row.try_get("refund_of")?,
        idempotency_key: row.try_get("idempotency_key")?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn wallet_tx_from_row(row: &PgRow) -> Result<WalletTransaction> {
    Ok(WalletTransaction {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        direction: row.try_get("direction")?,
        amount: row.try_get("amount")?,
        balance_before: row.try_get("balance_before")?,
        balance_after: row.try_get("balance_after")?,
        reason: row.try_get("reason")?,
        settlement_id: row.try_get("settlement_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn revenue_from_row(row: &PgRow) -> Result<RevenueEntry> {
    Ok(RevenueEntry {
        id: row.try_get("id")?,
        settlement_id: row.try_get("settlement_id")?,
        amount: row.try_get("amount")?,
        revenue_type: row.try_get("revenue_type")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn reputation_from_row(row: &PgRow) -> Result<SellerReputation> {
    let completed: i32 = row.try_get("completed_transactions")?;
    let cancelled: i32 = row.try_get("cancelled_transactions")?;
    Ok(SellerReputation {
        seller_id: row.try_get("seller_id")?,
        average_rating: row.try_get("average_rating")?,
        completed_transactions: completed.max(0) as u32,
        cancelled_transactions: cancelled.max(0) as u32,
        registered_location: point(row.try_get("latitude")?, row.try_get("longitude")?),
    })
}

/// Unique violations on the idempotency index become `IdempotencyConflict`
fn map_insert_error(err: sqlx::Error, record: &SettlementRecord) -> EngineError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            if let Some(key) = &record.idempotency_key {
                return EngineError::IdempotencyConflict(key.clone());
            }
        }
    }
    EngineError::Database(err)
}

async fn insert_settlement_with<'e, E>(executor: E, record: &SettlementRecord) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO settlements (
            id, kind, status, listing_id, buyer_id, seller_id, product_mode,
            energy_kwh, unit_price, subtotal, total_price, platform_fee, seller_credit,
            investor_shares, refund_of, idempotency_key, reason, created_at, completed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        "#,
    )
    .bind(record.id)
    .bind(record.kind)
    .bind(record.status)
    .bind(record.listing_id)
    .bind(record.buyer_id)
    .bind(record.seller_id)
    .bind(record.product_mode)
    .bind(record.energy_kwh)
    .bind(record.unit_price)
    .bind(record.subtotal)
    .bind(record.total_price)
    .bind(record.platform_fee)
    .bind(record.seller_credit)
    .bind(Json(&record.investor_shares))
    .bind(record.refund_of)
    .bind(record.idempotency_key.as_deref())
    .bind(record.reason.as_deref())
    .bind(record.created_at)
    .bind(record.completed_at)
    .execute(executor)
    .await
    .map_err(|e| map_insert_error(e, record))?;
    Ok(())
}

#[derive(Clone)]
pub struct PgMarketStore {
    pool: PgPool,
    clock: SharedClock,
    currency: String,
}

impl PgMarketStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, system_clock())
    }

    pub fn with_clock(pool: PgPool, clock: SharedClock) -> Self {
        Self {
            pool,
            clock,
            currency: "INR".to_string(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Register investor capital in a host's installations
    pub async fn add_investor_allocation(&self, allocation: &InvestorAllocation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO investor_allocations (investor_id, host_id, amount)
            VALUES ($1, $2, $3)
            ON CONFLICT (investor_id, host_id) DO UPDATE SET amount = investor_allocations.amount + EXCLUDED.amount
            "#,
        )
        .bind(allocation.investor_id)
        .bind(allocation.host_id)
        .bind(allocation.amount)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MarketStore for PgMarketStore {
    async fn begin(&self, lock_wait: Duration) -> Result<Box<dyn MarketTx>> {
        let mut tx = self.pool.begin().await?;
        // SET LOCAL does not accept bind parameters
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", lock_wait.as_millis().max(1)))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgTx {
            tx,
            lock_wait,
            clock: self.clock.clone(),
            currency: self.currency.clone(),
            balances: HashMap::new(),
        }))
    }

    async fn get_listing(&self, listing_id: Uuid) -> Result<Option<Listing>> {
        let row = sqlx::query(&format!("SELECT {} FROM listings WHERE id = $1", LISTING_COLUMNS))
            .bind(listing_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(listing_from_row).transpose()
    }

    async fn get_settlement(&self, settlement_id: Uuid) -> Result<Option<SettlementRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM settlements WHERE id = $1",
            SETTLEMENT_COLUMNS
        ))
        .bind(settlement_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(settlement_from_row).transpose()
    }

    async fn find_settlement_by_key(
        &self,
        buyer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<SettlementRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM settlements WHERE buyer_id = $1 AND idempotency_key = $2",
            SETTLEMENT_COLUMNS
        ))
        .bind(buyer_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(settlement_from_row).transpose()
    }

    async fn record_settlement(&self, record: &SettlementRecord) -> Result<()> {
        insert_settlement_with(&self.pool, record).await
    }

    async fn wallet(&self, owner_id: Uuid) -> Result<Option<Wallet>> {
        let row = sqlx::query(
            "SELECT owner_id, balance, currency, updated_at FROM wallets WHERE owner_id = $1",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Wallet> {
            Ok(Wallet {
                owner_id: row.try_get("owner_id")?,
                balance: row.try_get("balance")?,
                currency: row.try_get("currency")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn wallet_history(&self, owner_id: Uuid, limit: i64) -> Result<Vec<WalletTransaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM wallet_transactions WHERE owner_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
            WALLET_TX_COLUMNS
        ))
        .bind(owner_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(wallet_tx_from_row).collect()
    }

    async fn revenue_entries(&self, settlement_id: Option<Uuid>) -> Result<Vec<RevenueEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, settlement_id, amount, revenue_type, description, created_at
            FROM platform_revenue
            WHERE $1::uuid IS NULL OR settlement_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(settlement_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(revenue_from_row).collect()
    }

    async fn settlement_stats(&self) -> Result<SettlementStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'completed') AS completed_count,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed_count,
                COUNT(*) FILTER (WHERE status = 'refunded') AS refunded_count,
                COALESCE(SUM(total_price) FILTER (WHERE status IN ('completed', 'refunded')), 0) AS total_settled_value,
                COALESCE(SUM(energy_kwh) FILTER (WHERE status IN ('completed', 'refunded')), 0) AS total_energy_kwh
            FROM settlements
            WHERE kind = 'purchase'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(SettlementStats {
            completed_count: row.try_get("completed_count")?,
            failed_count: row.try_get("failed_count")?,
            refunded_count: row.try_get("refunded_count")?,
            total_settled_value: row.try_get("total_settled_value")?,
            total_energy_kwh: row.try_get("total_energy_kwh")?,
        })
    }
}

#[async_trait]
impl ListingDirectory for PgMarketStore {
    async fn find_active_listings(
        &self,
        filters: &ListingFilters,
        scope: Option<&GeoScope>,
    ) -> Result<Vec<Listing>> {
        let now = self.clock.now();
        let mut builder = sqlx::QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM listings WHERE status = 'active' AND energy_kwh > 0",
            LISTING_COLUMNS
        ));
        builder.push(" AND available_from <= ");
        builder.push_bind(now);
        builder.push(" AND available_to > ");
        builder.push_bind(now);

        if let Some(max_price) = filters.max_price_per_kwh {
            builder.push(" AND price_per_kwh <= ");
            builder.push_bind(max_price);
        }
        if let Some(min_energy) = filters.min_energy_kwh {
            builder.push(" AND energy_kwh >= ");
            builder.push_bind(min_energy);
        }
        if filters.renewable_only {
            builder.push(" AND renewable_certified");
        }
        if let Some(mode) = filters.product_mode {
            builder.push(" AND product_mode = ");
            builder.push_bind(mode);
        }
        if let Some(seller) = filters.exclude_seller {
            builder.push(" AND seller_id <> ");
            builder.push_bind(seller);
        }
        if let Some(scope) = scope {
            // Bounding-box prefilter; the exact radius is checked below
            let bbox = BoundingBox::around(scope.center, scope.radius_km);
            builder.push(" AND (latitude IS NULL OR longitude IS NULL OR (latitude BETWEEN ");
            builder.push_bind(bbox.min_latitude);
            builder.push(" AND ");
            builder.push_bind(bbox.max_latitude);
            builder.push(" AND longitude BETWEEN ");
            builder.push_bind(bbox.min_longitude);
            builder.push(" AND ");
            builder.push_bind(bbox.max_longitude);
            builder.push("))");
        }
        builder.push(" ORDER BY price_per_kwh ASC, energy_kwh DESC, id ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut listings = Vec::with_capacity(rows.len());
        for row in &rows {
            let listing = listing_from_row(row)?;
            if listing_matches(&listing, filters, scope, now) {
                listings.push(listing);
            }
        }
        if let Some(limit) = filters.limit {
            listings.truncate(limit);
        }

        debug!("Directory query returned {} listing(s)", listings.len());
        Ok(listings)
    }
}

#[async_trait]
impl ReputationSource for PgMarketStore {
    async fn seller_reputation(&self, seller_id: Uuid) -> Result<Option<SellerReputation>> {
        let row = sqlx::query(
            r#"
            SELECT seller_id, average_rating, completed_transactions, cancelled_transactions, latitude, longitude
            FROM seller_reputation WHERE seller_id = $1
            "#,
        )
        .bind(seller_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(reputation_from_row).transpose()
    }

    async fn seller_reputations(
        &self,
        seller_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, SellerReputation>> {
        let rows = sqlx::query(
            r#"
            SELECT seller_id, average_rating, completed_transactions, cancelled_transactions, latitude, longitude
            FROM seller_reputation WHERE seller_id = ANY($1)
            "#,
        )
        .bind(seller_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| reputation_from_row(row).map(|r| (r.seller_id, r)))
            .collect()
    }
}

/// One database transaction against [`PgMarketStore`]
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
    lock_wait: Duration,
    clock: SharedClock,
    currency: String,
    /// Balances of wallets locked in this transaction
    balances: HashMap<Uuid, Decimal>,
}

impl PgTx {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[async_trait]
impl WalletStore for PgTx {
    async fn lock_wallets(&mut self, accounts: &[Uuid]) -> Result<()> {
        let mut ordered: Vec<Uuid> = accounts
            .iter()
            .copied()
            .filter(|a| !self.balances.contains_key(a))
            .collect();
        ordered.sort();
        ordered.dedup();
        if ordered.is_empty() {
            return Ok(());
        }

        let resource = ordered
            .first()
            .map(|a| wallet_resource(*a))
            .unwrap_or_default();
        let now = self.now();

        sqlx::query(
            r#"
            INSERT INTO wallets (owner_id, balance, currency, updated_at)
            SELECT owner_id, 0, $2, $3 FROM UNNEST($1::uuid[]) AS owner_id
            ON CONFLICT (owner_id) DO NOTHING
            "#,
        )
        .bind(&ordered)
        .bind(&self.currency)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_lock_error(e, &resource, self.lock_wait))?;

        let rows = sqlx::query(
            "SELECT owner_id, balance FROM wallets WHERE owner_id = ANY($1) ORDER BY owner_id FOR UPDATE",
        )
        .bind(&ordered)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_lock_error(e, &resource, self.lock_wait))?;

        for row in rows {
            self.balances
                .insert(row.try_get("owner_id")?, row.try_get("balance")?);
        }
        Ok(())
    }

    async fn get_balance(&mut self, account: Uuid) -> Result<Decimal> {
        if !self.balances.contains_key(&account) {
            self.lock_wallets(&[account]).await?;
        }
        self.balances
            .get(&account)
            .copied()
            .ok_or_else(|| EngineError::Internal(format!("wallet {} not loaded", account)))
    }

    async fn apply_balance_change(&mut self, change: BalanceChange) -> Result<WalletTransaction> {
        let current = self
            .balances
            .get(&change.owner_id)
            .copied()
            .ok_or_else(|| EngineError::Internal(format!("wallet {} not locked", change.owner_id)))?;
        if current != change.balance_before {
            return Err(EngineError::Internal(format!(
                "stale balance for wallet {}",
                change.owner_id
            )));
        }
        if change.balance_after < Decimal::ZERO {
            return Err(EngineError::InsufficientBalance {
                account: change.owner_id,
                required: change.amount,
                available: change.balance_before,
            });
        }

        let now = self.now();
        sqlx::query("UPDATE wallets SET balance = $2, updated_at = $3 WHERE owner_id = $1")
            .bind(change.owner_id)
            .bind(change.balance_after)
            .bind(now)
            .execute(&mut *self.tx)
            .await?;

        let record = change.into_transaction(Uuid::new_v4(), now);
        sqlx::query(&format!(
            "INSERT INTO wallet_transactions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            WALLET_TX_COLUMNS
        ))
        .bind(record.id)
        .bind(record.owner_id)
        .bind(record.direction)
        .bind(record.amount)
        .bind(record.balance_before)
        .bind(record.balance_after)
        .bind(&record.reason)
        .bind(record.settlement_id)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await?;

        self.balances.insert(record.owner_id, record.balance_after);
        Ok(record)
    }
}

#[async_trait]
impl MarketTx for PgTx {
    async fn lock_listing(&mut self, listing_id: Uuid) -> Result<Listing> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM listings WHERE id = $1 FOR UPDATE",
            LISTING_COLUMNS
        ))
        .bind(listing_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_lock_error(e, &listing_resource(listing_id), self.lock_wait))?;

        match row {
            Some(row) => listing_from_row(&row),
            None => Err(EngineError::ListingNotFound(listing_id)),
        }
    }

    async fn insert_listing(&mut self, listing: &Listing) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO listings ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            LISTING_COLUMNS
        ))
        .bind(listing.id)
        .bind(listing.seller_id)
        .bind(listing.energy_kwh)
        .bind(listing.price_per_kwh)
        .bind(listing.min_purchase_kwh)
        .bind(listing.renewable_certified)
        .bind(listing.location.map(|p| p.latitude))
        .bind(listing.location.map(|p| p.longitude))
        .bind(listing.available_from)
        .bind(listing.available_to)
        .bind(listing.status)
        .bind(listing.product_mode)
        .bind(listing.created_at)
        .bind(listing.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn save_listing(&mut self, listing: &Listing) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE listings
            SET energy_kwh = $2, price_per_kwh = $3, min_purchase_kwh = $4,
                available_to = $5, status = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(listing.id)
        .bind(listing.energy_kwh)
        .bind(listing.price_per_kwh)
        .bind(listing.min_purchase_kwh)
        .bind(listing.available_to)
        .bind(listing.status)
        .bind(listing.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_settlement(&mut self, settlement_id: Uuid) -> Result<SettlementRecord> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM settlements WHERE id = $1 FOR UPDATE",
            SETTLEMENT_COLUMNS
        ))
        .bind(settlement_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_lock_error(e, &settlement_resource(settlement_id), self.lock_wait))?;

        match row {
            Some(row) => settlement_from_row(&row),
            None => Err(EngineError::SettlementNotFound(settlement_id)),
        }
    }

    async fn find_settlement_by_key(
        &mut self,
        buyer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<SettlementRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM settlements WHERE buyer_id = $1 AND idempotency_key = $2",
            SETTLEMENT_COLUMNS
        ))
        .bind(buyer_id)
        .bind(idempotency_key)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(settlement_from_row).transpose()
    }

    async fn insert_settlement(&mut self, record: &SettlementRecord) -> Result<()> {
        insert_settlement_with(&mut *self.tx, record).await
    }

    async fn update_settlement_status(
        &mut self,
        settlement_id: Uuid,
        status: SettlementStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE settlements SET status = $2 WHERE id = $1")
            .bind(settlement_id)
            .bind(status)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::SettlementNotFound(settlement_id));
        }
        Ok(())
    }

    async fn insert_revenue(&mut self, entry: &RevenueEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO platform_revenue (id, settlement_id, amount, revenue_type, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.settlement_id)
        .bind(entry.amount)
        .bind(entry.revenue_type)
        .bind(&entry.description)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn investor_allocations(&mut self, host_id: Uuid) -> Result<Vec<InvestorAllocation>> {
        let rows = sqlx::query(
            "SELECT investor_id, host_id, amount FROM investor_allocations WHERE host_id = $1 ORDER BY investor_id",
        )
        .bind(host_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(|row| -> Result<InvestorAllocation> {
                Ok(InvestorAllocation {
                    investor_id: row.try_get("investor_id")?,
                    host_id: row.try_get("host_id")?,
                    amount: row.try_get("amount")?,
                })
            })
            .collect()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }
}

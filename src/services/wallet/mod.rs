use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::database::schema::types::WalletDirection;
use crate::database::store::MarketStore;
use crate::error::{EngineError, Result};
use crate::models::{BalanceChange, TransactionReason, Wallet, WalletTransaction};
use crate::utils::metrics;

/// Balance access inside a unit of work.
///
/// Implementors provide the three primitives; `credit` and `debit` are built
/// on top of them so every backend enforces the same rules: amounts are
/// positive, balances never go negative, and each movement appends one
/// history row carrying the balance before and after.
#[async_trait]
pub trait WalletStore: Send {
    /// Lock the given wallets for the rest of the unit of work, in id order.
    /// Missing wallets are created with a zero balance.
    async fn lock_wallets(&mut self, accounts: &[Uuid]) -> Result<()>;

    async fn get_balance(&mut self, account: Uuid) -> Result<Decimal>;

    async fn apply_balance_change(&mut self, change: BalanceChange) -> Result<WalletTransaction>;

    async fn credit(
        &mut self,
        account: Uuid,
        amount: Decimal,
        reason: TransactionReason,
    ) -> Result<WalletTransaction> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::invalid_input("credit amount must be positive"));
        }
        let before = self.get_balance(account).await?;
        let tx = self
            .apply_balance_change(BalanceChange {
                owner_id: account,
                direction: WalletDirection::Credit,
                amount,
                balance_before: before,
                balance_after: before + amount,
                reason,
            })
            .await?;
        metrics::track_wallet_movement("credit", decimal_to_f64(amount));
        Ok(tx)
    }

    async fn debit(
        &mut self,
        account: Uuid,
        amount: Decimal,
        reason: TransactionReason,
    ) -> Result<WalletTransaction> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::invalid_input("debit amount must be positive"));
        }
        let before = self.get_balance(account).await?;
        if before < amount {
            return Err(EngineError::InsufficientBalance {
                account,
                required: amount,
                available: before,
            });
        }
        let tx = self
            .apply_balance_change(BalanceChange {
                owner_id: account,
                direction: WalletDirection::Debit,
                amount,
                balance_before: before,
                balance_after: before - amount,
                reason,
            })
            .await?;
        metrics::track_wallet_movement("debit", decimal_to_f64(amount));
        Ok(tx)
    }
}

fn decimal_to_f64(amount: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    amount.to_f64().unwrap_or_default()
}

/// Standalone wallet operations outside the purchase flow
#[derive(Clone)]
pub struct WalletService {
    store: Arc<dyn MarketStore>,
    currency: String,
}

impl WalletService {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self::with_currency(store, "INR")
    }

    pub fn with_currency(store: Arc<dyn MarketStore>, currency: impl Into<String>) -> Self {
        Self {
            store,
            currency: currency.into(),
        }
    }

    /// Current balance; unknown accounts read as an empty wallet
    pub async fn balance(&self, owner_id: Uuid) -> Result<Wallet> {
        match self.store.wallet(owner_id).await? {
            Some(wallet) => Ok(wallet),
            None => Ok(Wallet {
                owner_id,
                balance: Decimal::ZERO,
                currency: self.currency.clone(),
                updated_at: chrono::Utc::now(),
            }),
        }
    }

    /// Most recent history rows first
    pub async fn history(&self, owner_id: Uuid, limit: i64) -> Result<Vec<WalletTransaction>> {
        if limit <= 0 {
            return Err(EngineError::invalid_input("limit must be positive"));
        }
        self.store.wallet_history(owner_id, limit).await
    }

    /// Fund a wallet from outside the marketplace
    pub async fn deposit(
        &self,
        owner_id: Uuid,
        amount: Decimal,
        description: &str,
        lock_wait: Duration,
    ) -> Result<WalletTransaction> {
        let mut tx = self.store.begin(lock_wait).await?;
        tx.lock_wallets(&[owner_id]).await?;
        let record = tx
            .credit(owner_id, amount, TransactionReason::new(description))
            .await?;
        tx.commit().await?;

        info!(
            "💰 Deposited {} {} to wallet {} (balance: {})",
            amount, self.currency, owner_id, record.balance_after
        );
        Ok(record)
    }
}

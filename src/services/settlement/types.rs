use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use super::fees::SettlementPolicy;
use crate::database::schema::types::ProductMode;
use crate::error::{EngineError, Result};

/// Settlement service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Bounded wait for the listing lease and every row lock, in milliseconds
    pub lock_wait_ms: u64,
    /// Decimal places money amounts are rounded to
    pub currency_scale: u32,
    pub currency: String,
    /// Reject purchases that carry no idempotency key
    pub require_idempotency_key: bool,
    /// Policy for listings in marketplace mode
    pub marketplace: SettlementPolicy,
    /// Policy for listings in host-investment mode
    pub host_investment: SettlementPolicy,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            lock_wait_ms: 2_000,
            currency_scale: 2,
            currency: "INR".to_string(),
            require_idempotency_key: false,
            marketplace: SettlementPolicy::default_direct_fee(),
            host_investment: SettlementPolicy::default_revenue_share(),
        }
    }
}

impl SettlementConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// `SETTLEMENT_FEE_RATE` sets both sides of the marketplace fee;
    /// `SETTLEMENT_LOCK_WAIT_MS` the lease wait.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SETTLEMENT_FEE_RATE") {
            if let Ok(rate) = Decimal::from_str(&val) {
                self.marketplace = SettlementPolicy::DirectFee {
                    buyer_fee_rate: rate,
                    seller_fee_rate: rate,
                };
                tracing::info!("Using custom settlement fee rate: {}", rate);
            }
        }

        if let Ok(val) = std::env::var("SETTLEMENT_LOCK_WAIT_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.lock_wait_ms = ms;
            }
        }
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn policy_for(&self, mode: ProductMode) -> &SettlementPolicy {
        match mode {
            ProductMode::Marketplace => &self.marketplace,
            ProductMode::HostInvestment => &self.host_investment,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.lock_wait_ms == 0 {
            return Err(EngineError::Configuration(
                "settlement.lock_wait_ms must be positive".to_string(),
            ));
        }
        if self.currency_scale > 8 {
            return Err(EngineError::Configuration(
                "settlement.currency_scale must be at most 8".to_string(),
            ));
        }
        self.marketplace.validate()?;
        self.host_investment.validate()?;
        Ok(())
    }
}

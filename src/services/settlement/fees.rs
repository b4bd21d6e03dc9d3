use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::database::schema::types::RevenueType;
use crate::error::{EngineError, Result};
use crate::models::{InvestorAllocation, InvestorShare};
use crate::utils::round_money;

/// How a purchase's money is split between buyer, seller, investors and platform.
/// Each product mode is configured with exactly one policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettlementPolicy {
    /// Buyer pays subtotal plus a fee, seller receives subtotal minus a fee
    DirectFee {
        buyer_fee_rate: Decimal,
        seller_fee_rate: Decimal,
    },
    /// Buyer pays the subtotal, which is split between host, platform and
    /// the host's investors
    RevenueShare {
        host_share: Decimal,
        platform_share: Decimal,
        investor_share: Decimal,
    },
}

/// Money movements for one purchase, already rounded to the currency scale
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementBreakdown {
    pub subtotal: Decimal,
    /// Buyer debit
    pub buyer_total: Decimal,
    pub seller_credit: Decimal,
    pub investor_shares: Vec<InvestorShare>,
    /// Everything the platform keeps
    pub platform_fee: Decimal,
    pub revenue_type: RevenueType,
}

impl SettlementBreakdown {
    pub fn investor_total(&self) -> Decimal {
        self.investor_shares.iter().map(|s| s.amount).sum()
    }

    /// buyer debit == seller credit + investor payouts + platform fee, with no
    /// negative component
    pub fn is_balanced(&self) -> bool {
        let non_negative = self.seller_credit >= Decimal::ZERO
            && self.platform_fee >= Decimal::ZERO
            && self.investor_shares.iter().all(|s| s.amount >= Decimal::ZERO);
        non_negative
            && self.buyer_total == self.seller_credit + self.investor_total() + self.platform_fee
    }
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

impl SettlementPolicy {
    /// 5% on both sides
    pub fn default_direct_fee() -> Self {
        SettlementPolicy::DirectFee {
            buyer_fee_rate: dec("0.05"),
            seller_fee_rate: dec("0.05"),
        }
    }

    /// 45% host, 20% platform, 35% investors
    pub fn default_revenue_share() -> Self {
        SettlementPolicy::RevenueShare {
            host_share: dec("0.45"),
            platform_share: dec("0.20"),
            investor_share: dec("0.35"),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SettlementPolicy::DirectFee { .. } => "direct_fee",
            SettlementPolicy::RevenueShare { .. } => "revenue_share",
        }
    }

    pub fn shares_with_investors(&self) -> bool {
        matches!(self, SettlementPolicy::RevenueShare { .. })
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            SettlementPolicy::DirectFee {
                buyer_fee_rate,
                seller_fee_rate,
            } => {
                for rate in [buyer_fee_rate, seller_fee_rate] {
                    if *rate < Decimal::ZERO || *rate >= Decimal::ONE {
                        return Err(EngineError::Configuration(format!(
                            "fee rate {} must be in [0, 1)",
                            rate
                        )));
                    }
                }
                Ok(())
            }
            SettlementPolicy::RevenueShare {
                host_share,
                platform_share,
                investor_share,
            } => {
                for share in [host_share, platform_share, investor_share] {
                    if *share < Decimal::ZERO {
                        return Err(EngineError::Configuration(format!(
                            "revenue share {} cannot be negative",
                            share
                        )));
                    }
                }
                if *host_share + *platform_share + *investor_share != Decimal::ONE {
                    return Err(EngineError::Configuration(
                        "revenue shares must sum to 1".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Split the price of `energy_kwh` at `unit_price`.
    /// `investors` is only consulted by revenue-share policies.
    pub fn compute(
        &self,
        energy_kwh: Decimal,
        unit_price: Decimal,
        investors: &[InvestorAllocation],
        scale: u32,
    ) -> Result<SettlementBreakdown> {
        let subtotal = round_money(energy_kwh * unit_price, scale);
        if subtotal <= Decimal::ZERO {
            return Err(EngineError::invalid_input(
                "purchase value rounds to zero at the currency scale",
            ));
        }

        match self {
            SettlementPolicy::DirectFee {
                buyer_fee_rate,
                seller_fee_rate,
            } => {
                let buyer_fee = round_money(subtotal * *buyer_fee_rate, scale);
                let seller_fee = round_money(subtotal * *seller_fee_rate, scale);
                let buyer_total = subtotal + buyer_fee;
                let seller_credit = subtotal - seller_fee;

                Ok(SettlementBreakdown {
                    subtotal,
                    buyer_total,
                    seller_credit,
                    investor_shares: Vec::new(),
                    platform_fee: buyer_total - seller_credit,
                    revenue_type: RevenueType::PlatformFee,
                })
            }
            SettlementPolicy::RevenueShare {
                platform_share,
                investor_share,
                ..
            } => {
                let pool = round_money(subtotal * *investor_share, scale);
                let investor_shares = split_pool(pool, investors, scale);
                let paid_to_investors: Decimal = investor_shares.iter().map(|s| s.amount).sum();
                // Rounding both shares up can overshoot the subtotal; the platform gives way.
                let platform_fee = round_money(subtotal * *platform_share, scale)
                    .min(subtotal - paid_to_investors);

                // Host receives the remainder, including the pool when no one invested.
                Ok(SettlementBreakdown {
                    subtotal,
                    buyer_total: subtotal,
                    seller_credit: subtotal - platform_fee - paid_to_investors,
                    investor_shares,
                    platform_fee,
                    revenue_type: RevenueType::RevenueShare,
                })
            }
        }
    }
}

/// Pro-rata split of `pool` by invested capital. The last investor absorbs
/// the rounding difference so the shares always add up to `pool`.
fn split_pool(pool: Decimal, investors: &[InvestorAllocation], scale: u32) -> Vec<InvestorShare> {
    let mut capital: Vec<(Uuid, Decimal)> = Vec::new();
    for allocation in investors.iter().filter(|a| a.amount > Decimal::ZERO) {
        match capital.iter_mut().find(|(id, _)| *id == allocation.investor_id) {
            Some((_, total)) => *total += allocation.amount,
            None => capital.push((allocation.investor_id, allocation.amount)),
        }
    }
    capital.sort_by_key(|(id, _)| *id);

    let total_capital: Decimal = capital.iter().map(|(_, amount)| *amount).sum();
    if total_capital <= Decimal::ZERO || pool <= Decimal::ZERO {
        return Vec::new();
    }

    let mut shares = Vec::with_capacity(capital.len());
    let mut distributed = Decimal::ZERO;
    let last = capital.len() - 1;
    for (index, (investor_id, invested)) in capital.into_iter().enumerate() {
        let share = invested / total_capital;
        let amount = if index == last {
            pool - distributed
        } else {
            round_money(pool * share, scale)
        };
        distributed += amount;
        shares.push(InvestorShare {
            investor_id,
            share,
            amount,
        });
    }
    shares
}

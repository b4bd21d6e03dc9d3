pub mod clock;
pub mod metrics;

pub use clock::{system_clock, Clock, FixedClock, SharedClock, SystemClock};

use rust_decimal::{Decimal, RoundingStrategy};

/// Round a money amount to the currency scale, half away from zero
pub fn round_money(amount: Decimal, scale: u32) -> Decimal {
    amount.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

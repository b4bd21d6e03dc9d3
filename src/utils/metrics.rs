use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Track a settlement or refund attempt and its latency
pub fn track_settlement(kind: &str, outcome: &str, duration: Duration) {
    counter!(
        "settlements_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!("settlement_duration_seconds", "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}

/// Track an idempotent replay that returned an existing record
pub fn track_settlement_replay() {
    counter!("settlement_replays_total").increment(1);
}

/// Track a lease that could not be taken within its wait budget
pub fn track_lease_contention(resource_kind: &str) {
    counter!("lease_contention_total", "resource" => resource_kind.to_string()).increment(1);
}

/// Track how long a lease was held
pub fn track_lease_held(resource_kind: &str, held: Duration) {
    histogram!("lease_held_seconds", "resource" => resource_kind.to_string())
        .record(held.as_secs_f64());
}

/// Track allocation plans
pub fn track_allocation_plan(success: bool, legs: usize) {
    counter!("allocation_plans_total", "success" => success.to_string()).increment(1);
    histogram!("allocation_plan_legs").record(legs as f64);
}

/// Track listing directory cache lookups
pub fn track_listing_cache(hit: bool) {
    counter!(
        "listing_cache_total",
        "result" => if hit { "hit" } else { "miss" }
    )
    .increment(1);
}

/// Track listings currently held in the directory cache
pub fn track_listing_cache_size(entries: usize) {
    gauge!("listing_cache_entries").set(entries as f64);
}

/// Track money moved through wallets
pub fn track_wallet_movement(direction: &str, amount: f64) {
    counter!("wallet_movements_total", "direction" => direction.to_string()).increment(1);
    histogram!("wallet_movement_amount", "direction" => direction.to_string()).record(amount);
}

/// Lease resources are keyed "<kind>:<id>"; only the kind is used as a label.
pub fn resource_kind(resource: &str) -> &str {
    resource.split(':').next().unwrap_or(resource)
}

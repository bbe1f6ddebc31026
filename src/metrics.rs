//! Metric helpers for `reportwire`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. Without the
//! `metrics` feature every helper is a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the counter tracking delivered backend requests.
pub const REQUESTS_TOTAL: &str = "reportwire_requests_total";
/// Name of the counter tracking deliveries dropped after retries.
pub const DELIVERY_FAILURES: &str = "reportwire_delivery_failures_total";
/// Name of the counter tracking direct finish fallbacks.
pub const FALLBACKS_TOTAL: &str = "reportwire_fallbacks_total";
/// Name of the gauge tracking suites, cases and steps currently active.
pub const ITEMS_ACTIVE: &str = "reportwire_items_active";

/// Record a delivered request for `operation`.
pub fn inc_requests(operation: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(REQUESTS_TOTAL, "operation" => operation).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = operation;
}

/// Record a delivery that failed after its retry budget.
pub fn inc_delivery_failures() {
    #[cfg(feature = "metrics")]
    counter!(DELIVERY_FAILURES).increment(1);
}

/// Record a direct finish fallback.
pub fn inc_fallbacks() {
    #[cfg(feature = "metrics")]
    counter!(FALLBACKS_TOTAL).increment(1);
}

/// Increment the active items gauge.
pub fn inc_items() {
    #[cfg(feature = "metrics")]
    gauge!(ITEMS_ACTIVE).increment(1.0);
}

/// Decrement the active items gauge.
pub fn dec_items() {
    #[cfg(feature = "metrics")]
    gauge!(ITEMS_ACTIVE).decrement(1.0);
}

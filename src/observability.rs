//! Observability hooks for loyalty operations.
//!
//! Implement [`LoyaltyMetrics`] to feed assignment and accrual events into
//! your monitoring system:
//!
//! ```ignore
//! use redeem_kit::observability::LoyaltyMetrics;
//!
//! struct PrometheusMetrics;
//!
//! impl LoyaltyMetrics for PrometheusMetrics {
//!     fn record_collision(&self, business_id: &str, code: &str) {
//!         // counter!("code_collisions", "business" => business_id).inc();
//!     }
//!     // ... other methods keep their logging defaults
//! }
//!
//! // let service = LoyaltyService::new(store, config)
//! //     .with_metrics(Box::new(PrometheusMetrics));
//! ```
//!
//! The default methods log through the `log` crate. The service itself uses
//! [`NoOpMetrics`] unless told otherwise.

/// Trait for loyalty metrics collection.
pub trait LoyaltyMetrics: Send + Sync {
    /// A customer received a new code.
    fn record_code_assigned(&self, business_id: &str, code: &str, allocations: u32) {
        debug!(
            "Code ASSIGNED: {} in {} after {} allocation(s)",
            code, business_id, allocations
        );
    }

    /// A conditional code write lost to a concurrent writer.
    fn record_collision(&self, business_id: &str, code: &str) {
        warn!("Code COLLISION: {} in {}", code, business_id);
    }

    /// The allocator ran out of attempts.
    fn record_exhausted(&self, business_id: &str, attempts: u32) {
        warn!(
            "Code space EXHAUSTED for {} after {} attempts",
            business_id, attempts
        );
    }

    /// Points were awarded for a transaction.
    fn record_points_awarded(&self, customer_id: &str, points: u64) {
        debug!("Points AWARDED: {} to {}", points, customer_id);
    }

    /// Points were spent on a reward.
    fn record_redemption(&self, customer_id: &str, reward_id: &str, points: u64) {
        debug!(
            "Points REDEEMED: {} by {} for {}",
            points, customer_id, reward_id
        );
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl LoyaltyMetrics for NoOpMetrics {
    fn record_code_assigned(&self, _business_id: &str, _code: &str, _allocations: u32) {}
    fn record_collision(&self, _business_id: &str, _code: &str) {}
    fn record_exhausted(&self, _business_id: &str, _attempts: u32) {}
    fn record_points_awarded(&self, _customer_id: &str, _points: u64) {}
    fn record_redemption(&self, _customer_id: &str, _reward_id: &str, _points: u64) {}
}

/// Metrics that only log, using the trait defaults.
#[derive(Clone, Default)]
pub struct LogMetrics;

impl LoyaltyMetrics for LogMetrics {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_metrics() {
        let metrics = NoOpMetrics;
        metrics.record_code_assigned("biz", "ABC00001", 1);
        metrics.record_collision("biz", "ABC00001");
        metrics.record_points_awarded("cust", 10);
    }

    #[test]
    fn test_log_metrics_defaults() {
        let _ = env_logger::builder().is_test(true).try_init();
        let metrics = LogMetrics;
        metrics.record_exhausted("biz", 100);
        metrics.record_redemption("cust", "reward", 500);
    }
}

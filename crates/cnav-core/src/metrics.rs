//! Metrics seam for the indexing pipeline.
//!
//! The scheduler and merger report through this trait; the default
//! implementation drops everything on the floor.

/// Trait for recording operational metrics.
///
/// Counters used by the pipeline: `jobs_completed`, `jobs_failed`,
/// `jobs_cancelled`, `merges`, `units_removed`, `dirty_batches`.
pub trait Metrics: Send + Sync {
    /// Record a latency measurement for an operation (e.g. "parse", "merge").
    fn record_latency(&self, operation: &str, duration_ms: f64);

    /// Increment a named counter.
    fn increment_counter(&self, name: &str, delta: u64);
}

/// No-op metrics implementation (default).
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn record_latency(&self, _operation: &str, _duration_ms: f64) {}
    fn increment_counter(&self, _name: &str, _delta: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_metrics_accepts_everything() {
        let m = NoopMetrics;
        m.record_latency("parse", 12.5);
        m.increment_counter("jobs_completed", 1);
    }
}

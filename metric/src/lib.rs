//! Minimal metric primitives.
//!
//! Only the two shapes the transaction service actually needs: a
//! monotonic counter (`batch_errors`, `query_fail`, ...) and a duration
//! histogram (the `svc_queue_hist` queue-wait histogram). Real deployments
//! would wire these into a Prometheus/OTel exporter; that wiring is
//! outside this crate's job, same as the rest of the observability
//! surface.

use std::{
    fmt::Debug,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use parking_lot::Mutex;

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct U64Counter {
    value: AtomicU64,
}

impl U64Counter {
    /// Increment the counter by one.
    pub fn inc(&self) {
        self.add(1);
    }

    /// Increment the counter by `delta`.
    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// The counter's current value.
    pub fn fetch(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A histogram of observed durations.
///
/// This is deliberately not bucketed/quantized — it records every sample
/// so tests can assert exact counts and sums. A production exporter would
/// sit in front of this, not replace it.
#[derive(Debug, Default)]
pub struct DurationHistogram {
    samples: Mutex<Vec<Duration>>,
}

impl DurationHistogram {
    /// Record one observation.
    pub fn record(&self, d: Duration) {
        self.samples.lock().push(d);
    }

    /// Number of observations recorded so far.
    pub fn count(&self) -> usize {
        self.samples.lock().len()
    }

    /// Sum of all observations recorded so far.
    pub fn sum(&self) -> Duration {
        self.samples.lock().iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_adds_up() {
        let c = U64Counter::default();
        c.inc();
        c.add(4);
        assert_eq!(c.fetch(), 5);
    }

    #[test]
    fn histogram_records_samples() {
        let h = DurationHistogram::default();
        h.record(Duration::from_millis(1));
        h.record(Duration::from_millis(2));
        assert_eq!(h.count(), 2);
        assert_eq!(h.sum(), Duration::from_millis(3));
    }
}

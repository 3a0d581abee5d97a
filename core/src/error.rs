//! Error taxonomy and operational event counters.
//!
//! Only structural problems surface as errors: a measurement whose dimensions
//! disagree with the configured robot, or driving the estimator without a
//! propagation stage. Everything operational — non-monotonic clocks, stale
//! samples, queue overflow, covariance repairs — is recovered locally and
//! counted, so a supervisor can watch the counters without the filter ever
//! unwinding mid-cycle.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

/// Structural errors that abort the offending operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EstimatorError {
    /// A kinematics measurement does not match the configured number of legs.
    #[error("measurement dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// The estimator was driven without a registered propagation stage.
    #[error("no propagation method registered")]
    MissingPropagation,
}

/// Monotonic counters for recovered operational faults.
///
/// All counters are atomics so the coordinator can increment them while other
/// threads read a snapshot.
#[derive(Debug, Default)]
pub struct EventCounters {
    clock_violations: AtomicU64,
    staleness_clamps: AtomicU64,
    psd_repairs: AtomicU64,
    dimension_rejects: AtomicU64,
}

impl EventCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// A measurement arrived with a non-increasing timestamp and was skipped.
    pub fn count_clock_violation(&self) {
        self.clock_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// An inter-sample gap exceeded the configured maximum and was clamped.
    pub fn count_staleness_clamp(&self) {
        self.staleness_clamps.fetch_add(1, Ordering::Relaxed);
    }

    /// The covariance left the PSD cone beyond tolerance and was repaired.
    pub fn count_psd_repair(&self) {
        self.psd_repairs.fetch_add(1, Ordering::Relaxed);
    }

    /// A measurement was refused for having the wrong dimensions.
    pub fn count_dimension_reject(&self) {
        self.dimension_rejects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            clock_violations: self.clock_violations.load(Ordering::Relaxed),
            staleness_clamps: self.staleness_clamps.load(Ordering::Relaxed),
            psd_repairs: self.psd_repairs.load(Ordering::Relaxed),
            dimension_rejects: self.dimension_rejects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the event counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub clock_violations: u64,
    pub staleness_clamps: u64,
    pub psd_repairs: u64,
    pub dimension_rejects: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let counters = EventCounters::new();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn counters_accumulate() {
        let counters = EventCounters::new();
        counters.count_clock_violation();
        counters.count_clock_violation();
        counters.count_staleness_clamp();
        counters.count_psd_repair();
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.clock_violations, 2);
        assert_eq!(snapshot.staleness_clamps, 1);
        assert_eq!(snapshot.psd_repairs, 1);
        assert_eq!(snapshot.dimension_rejects, 0);
    }

    #[test]
    fn error_messages_name_the_problem() {
        let err = EstimatorError::DimensionMismatch {
            expected: 4,
            got: 2,
        };
        assert!(err.to_string().contains("expected 4"));
        assert!(EstimatorError::MissingPropagation
            .to_string()
            .contains("propagation"));
    }
}

//! Operation metrics for topology, affinity and locality queries.
//!
//! Counters are process-wide atomics. They are cheap enough to keep on
//! unconditionally and are read with [`get_stats`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Operation types for metrics tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Topology discovery.
    Discover,

    /// Thread affinity change.
    Pin,

    /// Current-thread location query.
    Locate,

    /// Working-set query over a page range.
    Audit,
}

/// Locality operation statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LocalityStats {
    /// Number of topology discoveries.
    pub discover_count: u64,

    /// Number of successful thread pins.
    pub pin_count: u64,

    /// Number of location queries.
    pub locate_count: u64,

    /// Number of working-set audits.
    pub audit_count: u64,

    /// Total pages covered by audits.
    pub pages_audited: u64,

    /// Average audit time in microseconds.
    pub avg_audit_time_us: u64,
}

static DISCOVER_COUNT: AtomicU64 = AtomicU64::new(0);
static PIN_COUNT: AtomicU64 = AtomicU64::new(0);
static LOCATE_COUNT: AtomicU64 = AtomicU64::new(0);
static AUDIT_COUNT: AtomicU64 = AtomicU64::new(0);
static PAGES_AUDITED: AtomicU64 = AtomicU64::new(0);
static TOTAL_AUDIT_TIME_US: AtomicU64 = AtomicU64::new(0);

/// Record an operation for metrics tracking.
///
/// # Arguments
///
/// * `op` - The operation type.
/// * `units` - Pages covered for [`Operation::Audit`], ignored otherwise.
/// * `duration` - The duration of the operation.
#[inline]
pub fn record_operation(op: Operation, units: usize, duration: Duration) {
    match op {
        Operation::Discover => {
            DISCOVER_COUNT.fetch_add(1, Ordering::Relaxed);
        }
        Operation::Pin => {
            PIN_COUNT.fetch_add(1, Ordering::Relaxed);
        }
        Operation::Locate => {
            LOCATE_COUNT.fetch_add(1, Ordering::Relaxed);
        }
        Operation::Audit => {
            AUDIT_COUNT.fetch_add(1, Ordering::Relaxed);
            PAGES_AUDITED.fetch_add(units as u64, Ordering::Relaxed);
            TOTAL_AUDIT_TIME_US.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        }
    }
}

/// Get the current statistics.
#[inline]
pub fn get_stats() -> LocalityStats {
    let audit_count = AUDIT_COUNT.load(Ordering::Relaxed);

    let avg_audit_time_us = if audit_count > 0 {
        TOTAL_AUDIT_TIME_US.load(Ordering::Relaxed) / audit_count
    } else {
        0
    };

    LocalityStats {
        discover_count: DISCOVER_COUNT.load(Ordering::Relaxed),
        pin_count: PIN_COUNT.load(Ordering::Relaxed),
        locate_count: LOCATE_COUNT.load(Ordering::Relaxed),
        audit_count,
        pages_audited: PAGES_AUDITED.load(Ordering::Relaxed),
        avg_audit_time_us,
    }
}

/// Reset all statistics.
#[inline]
pub fn reset_stats() {
    DISCOVER_COUNT.store(0, Ordering::Relaxed);
    PIN_COUNT.store(0, Ordering::Relaxed);
    LOCATE_COUNT.store(0, Ordering::Relaxed);
    AUDIT_COUNT.store(0, Ordering::Relaxed);
    PAGES_AUDITED.store(0, Ordering::Relaxed);
    TOTAL_AUDIT_TIME_US.store(0, Ordering::Relaxed);
}

/// Measure the duration of a fallible operation and record it if it succeeds.
///
/// # Arguments
///
/// * `op` - The operation type.
/// * `units` - Pages covered for [`Operation::Audit`].
/// * `f` - The function to measure.
///
/// # Returns
///
/// The result of the function.
#[inline]
pub fn measure<F, T, E>(op: Operation, units: usize, f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
{
    let start = Instant::now();
    let result = f();

    if result.is_ok() {
        record_operation(op, units, start.elapsed());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are global and other tests run concurrently, so only
    // monotonic growth is asserted here.
    #[test]
    fn test_measure_records_success_only() {
        let before = get_stats();

        let ok: Result<u32, ()> = measure(Operation::Audit, 16, || Ok(7));
        assert_eq!(ok, Ok(7));
        let err: Result<u32, ()> = measure(Operation::Audit, 1_000_000, || Err(()));
        assert!(err.is_err());

        let after = get_stats();
        assert!(after.audit_count >= before.audit_count + 1);
        assert!(after.pages_audited >= before.pages_audited + 16);
    }
}

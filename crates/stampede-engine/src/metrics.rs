use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

/// Per-product counters. Granularity is per product because the product lock
/// is the contention domain; node-level detail lives in the logs.
#[derive(Default)]
pub struct ProductMetrics {
    /// Successful reservations.
    pub reserved: AtomicU64,
    /// Units successfully reserved.
    pub units: AtomicU64,
    /// Reservations refused for lack of stock.
    pub insufficient: AtomicU64,
    /// Reservations that gave up busy (lock contention or lost validity).
    pub busy: AtomicU64,
    /// Individual lock acquisition attempts that found the lock taken.
    pub lock_contention: AtomicU64,
    /// Compensating increments issued.
    pub compensations: AtomicU64,
    /// Reservations that ended `Inconsistent`.
    pub inconsistencies: AtomicU64,
}

impl ProductMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reserved: self.reserved.load(Ordering::Relaxed),
            units: self.units.load(Ordering::Relaxed),
            insufficient: self.insufficient.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            lock_contention: self.lock_contention.load(Ordering::Relaxed),
            compensations: self.compensations.load(Ordering::Relaxed),
            inconsistencies: self.inconsistencies.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of one product's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub reserved: u64,
    pub units: u64,
    pub insufficient: u64,
    pub busy: u64,
    pub lock_contention: u64,
    pub compensations: u64,
    pub inconsistencies: u64,
}

/// Registry of per-product metrics, shared across in-flight reservations.
#[derive(Default)]
pub struct Metrics {
    per_product: DashMap<u64, Arc<ProductMetrics>>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    /// Counters for one product, created on first touch.
    pub fn product(&self, product_id: u64) -> Arc<ProductMetrics> {
        Arc::clone(
            &self
                .per_product
                .entry(product_id)
                .or_default(),
        )
    }

    pub fn snapshot(&self, product_id: u64) -> MetricsSnapshot {
        self.product(product_id).snapshot()
    }
}

/// Relaxed increment; counters are monotonic and read only for reporting.
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Relaxed add for unit counts.
pub(crate) fn add(counter: &AtomicU64, value: u64) {
    counter.fetch_add(value, Ordering::Relaxed);
}

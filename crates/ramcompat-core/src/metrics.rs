//! Atomic counters for routing and tagging observability.
//!
//! All counters use relaxed ordering. They are diagnostic, not synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-context operation counters.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Requests served by the primary pool.
    pub primary_acquires: AtomicU64,
    /// Requests served by the supplemental allocator (any reason).
    pub supplemental_acquires: AtomicU64,
    /// Zero-size requests sent straight to the supplemental allocator.
    pub zero_size_routes: AtomicU64,
    /// `RangeFail` replies from the primary pool.
    pub range_fallbacks: AtomicU64,
    pub primary_releases: AtomicU64,
    pub supplemental_releases: AtomicU64,
    pub resizes: AtomicU64,
    pub size_queries: AtomicU64,
    /// Tags materialized by a factory and stored.
    pub tags_created: AtomicU64,
    /// Lookups answered from an existing tag.
    pub tag_hits: AtomicU64,
    /// Factory results discarded because another thread stored first.
    pub tag_races_lost: AtomicU64,
    pub factory_failures: AtomicU64,
    pub tags_released: AtomicU64,
}

impl RouterMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            primary_acquires: AtomicU64::new(0),
            supplemental_acquires: AtomicU64::new(0),
            zero_size_routes: AtomicU64::new(0),
            range_fallbacks: AtomicU64::new(0),
            primary_releases: AtomicU64::new(0),
            supplemental_releases: AtomicU64::new(0),
            resizes: AtomicU64::new(0),
            size_queries: AtomicU64::new(0),
            tags_created: AtomicU64::new(0),
            tag_hits: AtomicU64::new(0),
            tag_races_lost: AtomicU64::new(0),
            factory_failures: AtomicU64::new(0),
            tags_released: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            primary_acquires: Self::get(&self.primary_acquires),
            supplemental_acquires: Self::get(&self.supplemental_acquires),
            zero_size_routes: Self::get(&self.zero_size_routes),
            range_fallbacks: Self::get(&self.range_fallbacks),
            primary_releases: Self::get(&self.primary_releases),
            supplemental_releases: Self::get(&self.supplemental_releases),
            resizes: Self::get(&self.resizes),
            size_queries: Self::get(&self.size_queries),
            tags_created: Self::get(&self.tags_created),
            tag_hits: Self::get(&self.tag_hits),
            tag_races_lost: Self::get(&self.tag_races_lost),
            factory_failures: Self::get(&self.factory_failures),
            tags_released: Self::get(&self.tags_released),
        }
    }
}

/// Point-in-time copy of [`RouterMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub primary_acquires: u64,
    pub supplemental_acquires: u64,
    pub zero_size_routes: u64,
    pub range_fallbacks: u64,
    pub primary_releases: u64,
    pub supplemental_releases: u64,
    pub resizes: u64,
    pub size_queries: u64,
    pub tags_created: u64,
    pub tag_hits: u64,
    pub tag_races_lost: u64,
    pub factory_failures: u64,
    pub tags_released: u64,
}

impl MetricsSnapshot {
    /// Fraction of non-empty acquisitions served by the primary pool.
    #[must_use]
    pub fn primary_ratio(&self) -> f64 {
        let total = (self.primary_acquires + self.supplemental_acquires)
            .saturating_sub(self.zero_size_routes);
        if total == 0 {
            0.0
        } else {
            self.primary_acquires as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_metrics_are_zero() {
        assert_eq!(RouterMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn inc_and_snapshot() {
        let m = RouterMetrics::new();
        RouterMetrics::inc(&m.primary_acquires);
        RouterMetrics::inc(&m.primary_acquires);
        RouterMetrics::inc(&m.primary_acquires);
        RouterMetrics::inc(&m.supplemental_acquires);
        let s = m.snapshot();
        assert_eq!(s.primary_acquires, 3);
        assert_eq!(s.supplemental_acquires, 1);
        assert!((s.primary_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_serializes() {
        let json = serde_json::to_string(&MetricsSnapshot::default()).unwrap();
        assert!(json.contains("\"tag_races_lost\":0"));
    }
}

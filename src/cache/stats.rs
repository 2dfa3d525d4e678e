//! Per-cache counters and the read-only status view.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Operation counters. Recording is a no-op while disabled.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    enabled: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    removals: AtomicU64,
    expirations: AtomicU64,
}

impl CacheStatistics {
    pub fn new(enabled: bool) -> Self {
        let stats = Self::default();
        stats.enabled.store(enabled, Ordering::Relaxed);
        stats
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn add(&self, counter: &AtomicU64, n: u64) {
        if n > 0 && self.is_enabled() {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn record_hits(&self, n: u64) {
        self.add(&self.hits, n);
    }

    pub fn record_misses(&self, n: u64) {
        self.add(&self.misses, n);
    }

    pub fn record_puts(&self, n: u64) {
        self.add(&self.puts, n);
    }

    pub fn record_removals(&self, n: u64) {
        self.add(&self.removals, n);
    }

    pub fn record_expirations(&self, n: u64) {
        self.add(&self.expirations, n);
    }

    /// Reset every counter to zero.
    pub fn clear(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.puts,
            &self.removals,
            &self.expirations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let gets = hits + misses;

        StatisticsSnapshot {
            hits,
            misses,
            puts: self.puts.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            hit_ratio: if gets == 0 {
                0.0
            } else {
                hits as f64 / gets as f64
            },
        }
    }
}

/// Point-in-time copy of [`CacheStatistics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub removals: u64,
    pub expirations: u64,
    pub hit_ratio: f64,
}

/// Read-only management view of one cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub name: String,
    pub key_type: &'static str,
    pub value_type: &'static str,
    pub closed: bool,
    pub expiry_policy: String,
    pub read_through: bool,
    pub write_through: bool,
    pub listeners: usize,
    /// `None` while statistics are disabled.
    pub statistics: Option<StatisticsSnapshot>,
}

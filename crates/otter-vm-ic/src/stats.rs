//! IC statistics

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the IC runtime
///
/// Hit and miss counters are always kept. Per-handler counts are only
/// recorded when handler statistics are enabled in the config.
#[derive(Debug, Default)]
pub struct IcStats {
    /// Accesses served by cached feedback
    pub hits: AtomicU64,
    /// Accesses that went through the miss path
    pub misses: AtomicU64,
    /// Accesses that took the generic path without touching feedback
    pub slow: AtomicU64,
    /// Feedback state changes
    pub transitions: AtomicU64,
    handlers: DashMap<&'static str, u64, FxBuildHasher>,
}

impl IcStats {
    /// Create empty stats
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_slow(&self) {
        self.slow.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transition(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler(&self, kind: &'static str) {
        *self.handlers.entry(kind).or_insert(0) += 1;
    }

    /// How often a handler kind was computed
    pub fn handler_count(&self, kind: &str) -> u64 {
        self.handlers.get(kind).map_or(0, |c| *c)
    }

    /// Reset every counter
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.slow.store(0, Ordering::Relaxed);
        self.transitions.store(0, Ordering::Relaxed);
        self.handlers.clear();
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> IcStatsSnapshot {
        IcStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            slow: self.slow.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            handlers: self.handlers.iter().map(|e| (e.key().to_string(), *e.value())).collect(),
        }
    }
}

/// A point-in-time snapshot of IC statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IcStatsSnapshot {
    /// Feedback hits
    pub hits: u64,
    /// Misses
    pub misses: u64,
    /// Generic-path accesses
    pub slow: u64,
    /// State changes
    pub transitions: u64,
    /// Handler kind counts
    pub handlers: BTreeMap<String, u64>,
}

impl IcStatsSnapshot {
    /// Fraction of accesses served by feedback (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

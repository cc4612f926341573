//! Cache statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing how requests were served
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    pending_hits: AtomicU64,
    live_hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    load_failures: AtomicU64,
    decode_failures: AtomicU64,
}

impl CacheStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pending_hit(&self) {
        self.pending_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_live_hit(&self) {
        self.live_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests served from the cached table
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Requests coalesced onto an in-flight load
    pub fn pending_hits(&self) -> u64 {
        self.pending_hits.load(Ordering::Relaxed)
    }

    /// Requests served from a live but evicted entry
    pub fn live_hits(&self) -> u64 {
        self.live_hits.load(Ordering::Relaxed)
    }

    /// Requests that invoked the loader
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries committed into the cached table
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Entries removed to satisfy the budgets
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Loaders that failed to produce a handle
    pub fn load_failures(&self) -> u64 {
        self.load_failures.load(Ordering::Relaxed)
    }

    /// Tracked loads whose handle reported an error
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Share of requests that avoided the loader (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() + self.pending_hits() + self.live_hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.pending_hits,
            &self.live_hits,
            &self.misses,
            &self.inserts,
            &self.evictions,
            &self.load_failures,
            &self.decode_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

//! Global atomic counters for workflow observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event, e.g. when a CLI command or service shuts down.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters. No allocations, no locking.
pub struct Metrics {
    workflows_started: AtomicU64,
    guard_blocks: AtomicU64,
    interrupts_raised: AtomicU64,
    units_failed: AtomicU64,
    citations_merged: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            workflows_started: AtomicU64::new(0),
            guard_blocks: AtomicU64::new(0),
            interrupts_raised: AtomicU64::new(0),
            units_failed: AtomicU64::new(0),
            citations_merged: AtomicU64::new(0),
        }
    }

    pub fn inc_workflows_started(&self) {
        self.workflows_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "workflows_started", "counter incremented");
    }

    /// Increment the guard-blocks counter by one. Counts every blocking stage,
    /// including failed and timed-out guards.
    pub fn inc_guard_blocks(&self) {
        self.guard_blocks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "guard_blocks", "counter incremented");
    }

    pub fn inc_interrupts_raised(&self) {
        self.interrupts_raised.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "interrupts_raised", "counter incremented");
    }

    pub fn inc_units_failed(&self) {
        self.units_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "units_failed", "counter incremented");
    }

    /// Add `n` to the citations-merged counter.
    pub fn add_citations_merged(&self, n: u64) {
        self.citations_merged.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "citations_merged", n, "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            workflows_started = self.workflows_started(),
            guard_blocks = self.guard_blocks(),
            interrupts_raised = self.interrupts_raised(),
            units_failed = self.units_failed(),
            citations_merged = self.citations_merged(),
        );
    }

    pub fn workflows_started(&self) -> u64 {
        self.workflows_started.load(Ordering::Relaxed)
    }

    pub fn guard_blocks(&self) -> u64 {
        self.guard_blocks.load(Ordering::Relaxed)
    }

    pub fn interrupts_raised(&self) -> u64 {
        self.interrupts_raised.load(Ordering::Relaxed)
    }

    pub fn units_failed(&self) -> u64 {
        self.units_failed.load(Ordering::Relaxed)
    }

    pub fn citations_merged(&self) -> u64 {
        self.citations_merged.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.workflows_started.store(0, Ordering::Relaxed);
        self.guard_blocks.store(0, Ordering::Relaxed);
        self.interrupts_raised.store(0, Ordering::Relaxed);
        self.units_failed.store(0, Ordering::Relaxed);
        self.citations_merged.store(0, Ordering::Relaxed);
    }
}

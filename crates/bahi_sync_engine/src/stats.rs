//! Engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal atomic counters shared by the broker and the feed manager.
#[derive(Debug, Default)]
pub(crate) struct StatsInner {
    optimistic_applied: AtomicU64,
    confirmed: AtomicU64,
    rolled_back: AtomicU64,
    retries: AtomicU64,
    echoes_suppressed: AtomicU64,
    external_delivered: AtomicU64,
}

impl StatsInner {
    pub(crate) fn inc_optimistic_applied(&self) {
        self.optimistic_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_confirmed(&self) {
        self.confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_rolled_back(&self) {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_echoes_suppressed(&self) {
        self.echoes_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_external_delivered(&self) {
        self.external_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EngineStats {
        EngineStats {
            optimistic_applied: self.optimistic_applied.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            echoes_suppressed: self.echoes_suppressed.load(Ordering::Relaxed),
            external_delivered: self.external_delivered.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of engine activity counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Mutations applied optimistically to the local view.
    pub optimistic_applied: u64,
    /// Mutations confirmed by the remote store.
    pub confirmed: u64,
    /// Mutations rolled back after failure.
    pub rolled_back: u64,
    /// Remote dispatch retries.
    pub retries: u64,
    /// Feed events suppressed as echoes of local mutations.
    pub echoes_suppressed: u64,
    /// External-device events delivered to subscribers.
    pub external_delivered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let inner = StatsInner::default();
        inner.inc_optimistic_applied();
        inner.inc_optimistic_applied();
        inner.inc_confirmed();
        inner.inc_retries();

        let snapshot = inner.snapshot();
        assert_eq!(snapshot.optimistic_applied, 2);
        assert_eq!(snapshot.confirmed, 1);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.rolled_back, 0);
    }
}

//! Session counters exposed to operational tooling.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Process-wide counters, owned by the [`Registry`](crate::Registry) and
/// shared with every session it creates.
#[derive(Debug, Default)]
pub struct Stats {
    starting: AtomicUsize,
    active: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub starting: usize,
    pub active: usize,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn session_starting(&self) {
        self.starting.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_activated(&self) {
        self.starting.fetch_sub(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn starting_finished(&self) {
        self.starting.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn active_finished(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            starting: self.starting.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "starting: {}, active: {}", self.starting, self.active)
    }
}

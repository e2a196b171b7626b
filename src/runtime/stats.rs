//! Server-wide counters, updated from the accept loop and workers.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Live counters shared between the accept loop and all workers.
#[derive(Debug, Default)]
pub struct ServerStats {
    accepted: AtomicU64,
    active: AtomicUsize,
    closed: AtomicU64,
    packets: AtomicU64,
    unsupported: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_accept(&self) -> usize {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn record_close(&self) -> usize {
        self.closed.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub(crate) fn record_packet(&self) {
        self.packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unsupported(&self) {
        self.unsupported.fetch_add(1, Ordering::Relaxed);
    }

    /// Connections currently tracked.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active.load(Ordering::SeqCst),
            closed: self.closed.load(Ordering::Relaxed),
            packets: self.packets.load(Ordering::Relaxed),
            unsupported: self.unsupported.load(Ordering::Relaxed),
        }
    }
}

/// Server statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub active: usize,
    pub closed: u64,
    pub packets: u64,
    pub unsupported: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_close_tracks_active() {
        let stats = ServerStats::new();
        assert_eq!(stats.record_accept(), 1);
        assert_eq!(stats.record_accept(), 2);
        assert_eq!(stats.record_close(), 1);
        stats.record_packet();
        stats.record_unsupported();

        let snap = stats.snapshot();
        assert_eq!(snap.accepted, 2);
        assert_eq!(snap.active, 1);
        assert_eq!(snap.closed, 1);
        assert_eq!(snap.packets, 1);
        assert_eq!(snap.unsupported, 1);
    }
}

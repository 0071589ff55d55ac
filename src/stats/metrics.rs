//! Counters for relay traffic

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Relay-level counters, shared by the accept loop, viewer tasks and
/// broadcasters
#[derive(Debug)]
pub struct RelayStats {
    started_at: Instant,
    accepted: AtomicU64,
    rejected: AtomicU64,
    removed: AtomicU64,
    messages_queued: AtomicU64,
    messages_dropped: AtomicU64,
    bytes_queued: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            removed: AtomicU64::new(0),
            messages_queued: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            bytes_queued: AtomicU64::new(0),
        }
    }

    pub fn on_accept(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Connection refused because of the viewer limit
    pub fn on_reject(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_remove(&self) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_queued(&self, bytes: usize) {
        self.messages_queued.fetch_add(1, Ordering::Relaxed);
        self.bytes_queued.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Message skipped for a viewer whose queue was full
    pub fn on_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            uptime: self.started_at.elapsed(),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            messages_queued: self.messages_queued.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            bytes_queued: self.bytes_queued.load(Ordering::Relaxed),
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayStatsSnapshot {
    pub uptime: Duration,
    pub accepted: u64,
    pub rejected: u64,
    pub removed: u64,
    pub messages_queued: u64,
    pub messages_dropped: u64,
    pub bytes_queued: u64,
}

impl RelayStatsSnapshot {
    /// Fraction of fan-out attempts skipped for slow viewers
    pub fn drop_ratio(&self) -> f64 {
        let total = self.messages_queued + self.messages_dropped;
        if total == 0 {
            0.0
        } else {
            self.messages_dropped as f64 / total as f64
        }
    }
}

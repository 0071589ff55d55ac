//! Viewer registry
//!
//! Both relays keep their viewers here. Each viewer owns a bounded outbound
//! queue drained by its own writer task, so fan-out is a loop of `try_send`
//! calls that never waits on a socket:
//!
//! - queue has room: message queued
//! - queue full: message skipped for that viewer only
//! - queue closed (writer task gone): viewer removed

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};

use crate::stats::RelayStats;

/// Identifies one viewer connection within a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(pub u64);

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

/// A registered viewer
#[derive(Debug)]
struct ViewerEntry<M> {
    tx: mpsc::Sender<M>,
    peer_addr: SocketAddr,
    connected_at: Instant,
}

/// Summary of one fan-out pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Viewers the message was queued for
    pub delivered: usize,
    /// Viewers skipped because their queue was full
    pub dropped: usize,
    /// Viewers removed because their writer had exited
    pub removed: usize,
}

/// Information about a connected viewer
#[derive(Debug, Clone)]
pub struct ViewerInfo {
    pub id: ViewerId,
    pub peer_addr: SocketAddr,
    pub connected_for: std::time::Duration,
}

/// Set of live viewers for one relay
pub struct ViewerRegistry<M> {
    viewers: RwLock<HashMap<ViewerId, ViewerEntry<M>>>,
    next_id: AtomicU64,
    stats: Arc<RelayStats>,
}

impl<M: Clone> ViewerRegistry<M> {
    pub fn new(stats: Arc<RelayStats>) -> Self {
        Self {
            viewers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stats,
        }
    }

    /// Allocate an id for a new connection
    pub fn next_id(&self) -> ViewerId {
        ViewerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Add a viewer; returns the viewer count afterwards
    pub async fn register(
        &self,
        id: ViewerId,
        peer_addr: SocketAddr,
        tx: mpsc::Sender<M>,
    ) -> usize {
        let mut viewers = self.viewers.write().await;
        viewers.insert(
            id,
            ViewerEntry {
                tx,
                peer_addr,
                connected_at: Instant::now(),
            },
        );

        tracing::debug!(
            viewer = %id,
            peer = %peer_addr,
            viewers = viewers.len(),
            "Viewer registered"
        );
        viewers.len()
    }

    /// Remove a viewer; returns the count afterwards, or `None` if it was
    /// already gone
    pub async fn remove(&self, id: ViewerId) -> Option<usize> {
        let mut viewers = self.viewers.write().await;
        let entry = viewers.remove(&id)?;
        self.stats.on_remove();

        tracing::debug!(
            viewer = %id,
            peer = %entry.peer_addr,
            connected_secs = entry.connected_at.elapsed().as_secs(),
            viewers = viewers.len(),
            "Viewer removed"
        );
        Some(viewers.len())
    }

    pub async fn count(&self) -> usize {
        self.viewers.read().await.len()
    }

    pub async fn contains(&self, id: ViewerId) -> bool {
        self.viewers.read().await.contains_key(&id)
    }

    pub async fn list(&self) -> Vec<ViewerInfo> {
        let mut list: Vec<_> = self
            .viewers
            .read()
            .await
            .iter()
            .map(|(id, entry)| ViewerInfo {
                id: *id,
                peer_addr: entry.peer_addr,
                connected_for: entry.connected_at.elapsed(),
            })
            .collect();
        list.sort_by_key(|info| info.id);
        list
    }

    /// Queue `msg` for every viewer without waiting on any of them
    ///
    /// `size` is only used for byte accounting.
    pub async fn fan_out(&self, msg: M, size: usize) -> FanOut {
        let mut result = FanOut::default();
        let mut closed = Vec::new();

        {
            let viewers = self.viewers.read().await;
            for (id, entry) in viewers.iter() {
                match entry.tx.try_send(msg.clone()) {
                    Ok(()) => {
                        result.delivered += 1;
                        self.stats.on_queued(size);
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        result.dropped += 1;
                        self.stats.on_dropped();
                        tracing::trace!(viewer = %id, "Viewer queue full, message skipped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        for id in closed {
            if self.remove(id).await.is_some() {
                result.removed += 1;
            }
        }

        result
    }

    /// Queue `msg` for a single viewer
    ///
    /// Returns `false` when the viewer is unknown, gone, or backed up.
    pub async fn send_to(&self, id: ViewerId, msg: M, size: usize) -> bool {
        let outcome = {
            let viewers = self.viewers.read().await;
            match viewers.get(&id) {
                Some(entry) => entry.tx.try_send(msg),
                None => return false,
            }
        };

        match outcome {
            Ok(()) => {
                self.stats.on_queued(size);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.on_dropped();
                tracing::warn!(viewer = %id, "Viewer queue full, direct message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.remove(id).await;
                false
            }
        }
    }

    /// Drop every viewer; their queues close and writer tasks exit
    pub async fn clear(&self) -> usize {
        let mut viewers = self.viewers.write().await;
        let count = viewers.len();
        viewers.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn registry() -> ViewerRegistry<u32> {
        ViewerRegistry::new(Arc::new(RelayStats::new()))
    }

    #[tokio::test]
    async fn test_register_and_remove() {
        let reg = registry();
        let (tx, _rx) = mpsc::channel(4);
        let id = reg.next_id();

        assert_eq!(reg.register(id, peer(), tx).await, 1);
        assert!(reg.contains(id).await);
        assert_eq!(reg.remove(id).await, Some(0));
        assert_eq!(reg.remove(id).await, None);
        assert_eq!(reg.stats().snapshot().removed, 1);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let reg = registry();
        let a = reg.next_id();
        let b = reg.next_id();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "viewer-1");
    }

    #[tokio::test]
    async fn test_fan_out_isolates_slow_and_dead_viewers() {
        let reg = registry();

        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (dead_tx, dead_rx) = mpsc::channel(8);
        drop(dead_rx);

        let fast = reg.next_id();
        let slow = reg.next_id();
        let dead = reg.next_id();
        reg.register(fast, peer(), fast_tx).await;
        reg.register(slow, peer(), slow_tx).await;
        reg.register(dead, peer(), dead_tx).await;

        let first = reg.fan_out(1, 10).await;
        assert_eq!(first, FanOut { delivered: 2, dropped: 0, removed: 1 });
        assert!(!reg.contains(dead).await);

        let second = reg.fan_out(2, 10).await;
        assert_eq!(second, FanOut { delivered: 1, dropped: 1, removed: 0 });

        assert_eq!(fast_rx.recv().await, Some(1));
        assert_eq!(fast_rx.recv().await, Some(2));
        assert_eq!(slow_rx.recv().await, Some(1));
        assert!(slow_rx.try_recv().is_err());
        assert!(reg.contains(slow).await);
    }

    #[tokio::test]
    async fn test_send_to() {
        let reg = registry();
        let (tx, mut rx) = mpsc::channel(1);
        let id = reg.next_id();
        reg.register(id, peer(), tx).await;

        assert!(reg.send_to(id, 7, 1).await);
        assert!(!reg.send_to(id, 8, 1).await); // full
        assert!(!reg.send_to(ViewerId(999), 9, 1).await);
        assert_eq!(rx.recv().await, Some(7));

        drop(rx);
        assert!(!reg.send_to(id, 10, 1).await);
        assert!(!reg.contains(id).await);
    }

    #[tokio::test]
    async fn test_clear_closes_queues() {
        let reg = registry();
        let (tx, mut rx) = mpsc::channel(1);
        let id = reg.next_id();
        reg.register(id, peer(), tx).await;

        assert_eq!(reg.clear().await, 1);
        assert_eq!(reg.count().await, 0);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let reg = registry();
        let mut keep = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = mpsc::channel(1);
            keep.push(rx);
            let id = reg.next_id();
            reg.register(id, peer(), tx).await;
        }

        let ids: Vec<u64> = reg.list().await.iter().map(|v| v.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}

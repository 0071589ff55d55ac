//! MJPEG video relay
//!
//! A bare TCP listener that speaks just enough HTTP for browsers and media
//! players: every connection immediately receives a
//! `multipart/x-mixed-replace` response head, whatever it asked for, and
//! then one part per broadcast frame until either side hangs up.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use super::viewers::{FanOut, ViewerRegistry};
use super::{admit, configure_socket, RelayOptions};
use crate::codec::EncodedFrame;
use crate::error::{Error, Result};
use crate::protocol::multipart::{encode_part, RESPONSE_HEAD};
use crate::stats::{RelayStats, RelayStatsSnapshot};

struct Running {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    accept_task: JoinHandle<()>,
}

/// MJPEG-over-HTTP server
pub struct MjpegServer {
    options: RelayOptions,
    viewers: Arc<ViewerRegistry<Bytes>>,
    running: Mutex<Option<Running>>,
    active: AtomicBool,
}

impl MjpegServer {
    pub fn new(options: RelayOptions) -> Self {
        Self {
            options,
            viewers: Arc::new(ViewerRegistry::new(Arc::new(RelayStats::new()))),
            running: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    /// Bind `addr` and start accepting viewers
    ///
    /// Returns the bound address. Calling `start` while already running
    /// leaves the existing listener in place and returns its address.
    pub async fn start(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(ref r) = *running {
            tracing::debug!(addr = %r.local_addr, "MJPEG server already running");
            return Ok(r.local_addr);
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "MJPEG server listening");

        let (shutdown, shutdown_rx) = oneshot::channel();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.viewers),
            self.options.clone(),
            self.options.semaphore(),
            shutdown_rx,
        ));

        self.active.store(true, Ordering::Release);
        *running = Some(Running {
            local_addr,
            shutdown,
            accept_task,
        });

        Ok(local_addr)
    }

    /// Close the listener and every viewer socket
    ///
    /// Idempotent. Frames broadcast afterwards are discarded.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        self.active.store(false, Ordering::Release);
        let _ = running.shutdown.send(());
        if let Err(e) = running.accept_task.await {
            tracing::error!(error = %e, "MJPEG accept task failed");
        }
        // The accept loop only returns once its connection tasks have
        // finished, so the registry cannot be repopulated past this point.
        let dropped = self.viewers.clear().await;

        tracing::info!(addr = %running.local_addr, viewers = dropped, "MJPEG server stopped");
    }

    /// Queue one multipart part for every viewer
    ///
    /// Never waits on a viewer socket. Viewers whose queue is full skip
    /// this frame; viewers whose connection has ended are removed.
    pub async fn broadcast_frame(&self, frame: &EncodedFrame) -> FanOut {
        if !self.active.load(Ordering::Acquire) {
            return FanOut::default();
        }

        let part = encode_part(frame);
        let size = part.len();
        let result = self.viewers.fan_out(part, size).await;

        tracing::trace!(
            bytes = frame.len(),
            delivered = result.delivered,
            dropped = result.dropped,
            removed = result.removed,
            "Frame broadcast"
        );
        result
    }

    pub async fn viewer_count(&self) -> usize {
        self.viewers.count().await
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.viewers.stats().snapshot()
    }
}

async fn accept_loop(
    listener: TcpListener,
    viewers: Arc<ViewerRegistry<Bytes>>,
    options: RelayOptions,
    limit: Option<Arc<Semaphore>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (socket, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept video connection");
                        continue;
                    }
                };

                let Some(permit) = admit(&limit) else {
                    viewers.stats().on_reject();
                    tracing::warn!(peer = %peer_addr, "Video connection rejected: limit reached");
                    continue;
                };

                if let Err(e) = configure_socket(&socket, &options) {
                    tracing::error!(error = %e, "Failed to configure socket");
                    continue;
                }

                viewers.stats().on_accept();
                let viewers = Arc::clone(&viewers);
                let depth = options.queue_depth;
                connections.spawn(async move {
                    let _permit = permit;
                    serve_viewer(socket, peer_addr, viewers, depth).await;
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    connections.shutdown().await;
}

/// Write the response head, then stream queued parts until the viewer goes
/// away or its queue is closed
async fn serve_viewer(
    socket: TcpStream,
    peer_addr: SocketAddr,
    viewers: Arc<ViewerRegistry<Bytes>>,
    depth: usize,
) {
    let id = viewers.next_id();
    let (mut reader, mut writer) = socket.into_split();

    if let Err(e) = writer.write_all(RESPONSE_HEAD).await {
        tracing::debug!(
            viewer = %id,
            peer = %peer_addr,
            error = %e,
            "Failed to write response head"
        );
        return;
    }

    let (tx, mut rx) = mpsc::channel::<Bytes>(depth);
    let count = viewers.register(id, peer_addr, tx).await;
    tracing::info!(viewer = %id, peer = %peer_addr, viewers = count, "Video viewer connected");

    // Request bytes are read and discarded; EOF or a read error means the
    // viewer hung up.
    let mut scratch = [0u8; 1024];
    let reason = loop {
        tokio::select! {
            part = rx.recv() => match part {
                Some(part) => {
                    if let Err(e) = writer.write_all(&part).await {
                        break format!("write failed: {e}");
                    }
                }
                None => break "relay closed".to_string(),
            },
            read = reader.read(&mut scratch) => match read {
                Ok(0) => break "peer closed".to_string(),
                Ok(_) => {}
                Err(e) => break format!("read failed: {e}"),
            },
        }
    };

    viewers.remove(id).await;
    tracing::info!(viewer = %id, peer = %peer_addr, reason = %reason, "Video viewer disconnected");
}

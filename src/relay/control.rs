//! WebSocket audio/control relay
//!
//! One endpoint carries both directions of the control protocol:
//!
//! - server → viewer: binary frames with raw PCM audio, text frames with
//!   JSON status/error/ipAddress replies
//! - viewer → server: text frames with JSON commands
//!
//! Connection lifecycle and inbound commands are reported as
//! [`ControlEvent`]s on a bounded channel supplied to `start`; the consumer
//! decides what to do with them and answers through
//! [`ControlServer::send_to`]. When that channel is full, only the
//! connection trying to report waits; it stops reading its socket until
//! there is room.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::Message;

use super::viewers::{FanOut, ViewerId, ViewerRegistry};
use super::{admit, configure_socket, RelayOptions};
use crate::error::{Error, Result};
use crate::platform::AddressLookup;
use crate::protocol::Reply;
use crate::stats::{RelayStats, RelayStatsSnapshot};

/// WebSocket upgrade must complete within this time
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for a close frame to go out when a viewer is dropped
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Something that happened on the control relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// A viewer completed the WebSocket handshake
    Connected { viewer: ViewerId, viewers: usize },
    /// A viewer went away
    Disconnected { viewer: ViewerId, viewers: usize },
    /// A viewer sent a text frame
    Message { viewer: ViewerId, text: String },
}

struct Running {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    accept_task: JoinHandle<()>,
}

/// Shared with every connection task
struct Shared {
    viewers: Arc<ViewerRegistry<Message>>,
    address: Arc<dyn AddressLookup>,
    events: mpsc::Sender<ControlEvent>,
    queue_depth: usize,
}

/// WebSocket audio/control server
pub struct ControlServer {
    options: RelayOptions,
    address: Arc<dyn AddressLookup>,
    viewers: Arc<ViewerRegistry<Message>>,
    running: Mutex<Option<Running>>,
    active: AtomicBool,
}

impl ControlServer {
    pub fn new(options: RelayOptions, address: Arc<dyn AddressLookup>) -> Self {
        Self {
            options,
            address,
            viewers: Arc::new(ViewerRegistry::new(Arc::new(RelayStats::new()))),
            running: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    /// Bind `addr` and start accepting viewers, reporting to `events`
    ///
    /// Calling `start` while already running keeps the existing listener
    /// and event channel and returns the bound address.
    pub async fn start(
        &self,
        addr: SocketAddr,
        events: mpsc::Sender<ControlEvent>,
    ) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(ref r) = *running {
            tracing::debug!(addr = %r.local_addr, "Control server already running");
            return Ok(r.local_addr);
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Control server listening");

        let shared = Arc::new(Shared {
            viewers: Arc::clone(&self.viewers),
            address: Arc::clone(&self.address),
            events,
            queue_depth: self.options.queue_depth,
        });
        let (shutdown, shutdown_rx) = oneshot::channel();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            shared,
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

    /// Close the listener and every viewer connection; idempotent
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        self.active.store(false, Ordering::Release);
        let _ = running.shutdown.send(());
        if let Err(e) = running.accept_task.await {
            tracing::error!(error = %e, "Control accept task failed");
        }
        // Every connection task has finished by now, so nothing can
        // register after this.
        let dropped = self.viewers.clear().await;

        tracing::info!(addr = %running.local_addr, viewers = dropped, "Control server stopped");
    }

    /// Queue an audio chunk as a binary frame for every viewer
    pub async fn broadcast_audio(&self, chunk: Bytes) -> FanOut {
        if !self.active.load(Ordering::Acquire) {
            return FanOut::default();
        }

        let size = chunk.len();
        self.viewers.fan_out(Message::binary(chunk), size).await
    }

    /// Queue a text frame for one viewer
    ///
    /// Returns `false` if the viewer is gone or backed up.
    pub async fn send_to(&self, viewer: ViewerId, text: impl Into<String>) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }

        let text = text.into();
        let size = text.len();
        self.viewers.send_to(viewer, Message::text(text), size).await
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
    shared: Arc<Shared>,
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
                        tracing::error!(error = %e, "Failed to accept control connection");
                        continue;
                    }
                };

                let Some(permit) = admit(&limit) else {
                    shared.viewers.stats().on_reject();
                    tracing::warn!(peer = %peer_addr, "Control connection rejected: limit reached");
                    continue;
                };

                if let Err(e) = configure_socket(&socket, &options) {
                    tracing::error!(error = %e, "Failed to configure socket");
                    continue;
                }

                shared.viewers.stats().on_accept();
                let shared = Arc::clone(&shared);
                connections.spawn(async move {
                    let _permit = permit;
                    serve_viewer(socket, peer_addr, shared).await;
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    connections.shutdown().await;
}

async fn serve_viewer(socket: TcpStream, peer_addr: SocketAddr, shared: Arc<Shared>) {
    let ws = match tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        tokio_tungstenite::accept_async(socket),
    )
    .await
    {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            tracing::debug!(peer = %peer_addr, error = %e, "WebSocket handshake failed");
            return;
        }
        Err(_) => {
            tracing::debug!(peer = %peer_addr, "WebSocket handshake timed out");
            return;
        }
    };

    let id = shared.viewers.next_id();
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Message>(shared.queue_depth);

    // The address report is queued before registration so it is always the
    // first frame the viewer sees.
    let hello = Reply::ip_address(shared.address.local_address()).to_json();
    let _ = tx.try_send(Message::text(hello));

    let count = shared.viewers.register(id, peer_addr, tx).await;
    tracing::info!(viewer = %id, peer = %peer_addr, viewers = count, "Control viewer connected");
    let _ = shared
        .events
        .send(ControlEvent::Connected {
            viewer: id,
            viewers: count,
        })
        .await;

    let reason = loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(msg) => {
                    if let Err(e) = sink.send(msg).await {
                        break format!("write failed: {e}");
                    }
                }
                None => {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                    break "relay closed".to_string();
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!(viewer = %id, len = text.len(), "Control message received");
                    let event = ControlEvent::Message {
                        viewer: id,
                        text: text.as_str().to_owned(),
                    };
                    if shared.events.send(event).await.is_err() {
                        break "event consumer gone".to_string();
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::trace!(viewer = %id, len = data.len(), "Ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => break "peer closed".to_string(),
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("read failed: {e}"),
            },
        }
    };

    shared.viewers.remove(id).await;
    let count = shared.viewers.count().await;
    tracing::info!(
        viewer = %id,
        peer = %peer_addr,
        reason = %reason,
        viewers = count,
        "Control viewer disconnected"
    );
    let _ = shared
        .events
        .send(ControlEvent::Disconnected {
            viewer: id,
            viewers: count,
        })
        .await;
}

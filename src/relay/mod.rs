//! Viewer-facing relays
//!
//! ```text
//!   FrameEncoder ──► MjpegServer::broadcast_frame ──┐
//!                                                    ├─► ViewerRegistry::fan_out
//!   AudioSink ─────► ControlServer::broadcast_audio ─┘        │ try_send
//!                                                              ▼
//!                                           per-viewer queue ─► writer task ─► socket
//! ```
//!
//! Each relay runs one accept task. Every accepted connection gets its own
//! task, and those tasks live in a `JoinSet` owned by the accept task, so
//! aborting the accept task on `stop` also tears down every viewer.

pub mod control;
pub mod video;
pub mod viewers;

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::MonitorConfig;

pub use control::{ControlEvent, ControlServer};
pub use video::MjpegServer;
pub use viewers::{FanOut, ViewerId, ViewerInfo, ViewerRegistry};

/// Connection handling options shared by both relays
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Maximum concurrent viewers (0 = unlimited)
    pub max_viewers: usize,
    /// Enable TCP_NODELAY on accepted sockets
    pub tcp_nodelay: bool,
    /// Outbound messages buffered per viewer
    pub queue_depth: usize,
}

impl RelayOptions {
    pub fn video(config: &MonitorConfig) -> Self {
        Self {
            max_viewers: config.max_viewers,
            tcp_nodelay: config.tcp_nodelay,
            queue_depth: config.video_queue_depth.max(1),
        }
    }

    pub fn control(config: &MonitorConfig) -> Self {
        Self {
            max_viewers: config.max_viewers,
            tcp_nodelay: config.tcp_nodelay,
            queue_depth: config.control_queue_depth.max(1),
        }
    }

    fn semaphore(&self) -> Option<Arc<Semaphore>> {
        (self.max_viewers > 0).then(|| Arc::new(Semaphore::new(self.max_viewers)))
    }
}

/// Admission for one accepted socket
///
/// Returns `None` when the viewer limit is reached. `Some(None)` means no
/// limit is configured.
fn admit(limit: &Option<Arc<Semaphore>>) -> Option<Option<OwnedSemaphorePermit>> {
    match limit {
        Some(sem) => sem.clone().try_acquire_owned().ok().map(Some),
        None => Some(None),
    }
}

fn configure_socket(socket: &TcpStream, options: &RelayOptions) -> std::io::Result<()> {
    if options.tcp_nodelay {
        socket.set_nodelay(true)?;
    }
    Ok(())
}

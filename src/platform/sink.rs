//! Sinks handed to capture sources
//!
//! Video uses a single-slot `watch` channel: a newer frame replaces one the
//! encoder has not picked up yet, so a slow encoder never builds a backlog.
//! Audio uses a small bounded queue; chunks are dropped when it is full.

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::codec::RawFrame;

/// Latest-frame slot written by a camera source
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: watch::Sender<Option<RawFrame>>,
}

impl FrameSink {
    /// Create a sink and the receiver the encoder reads from
    pub fn channel() -> (Self, watch::Receiver<Option<RawFrame>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }

    /// Publish a frame, replacing any frame not yet encoded
    pub fn emit(&self, frame: RawFrame) {
        self.tx.send_replace(Some(frame));
    }

    /// Whether the encoder side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Bounded PCM chunk queue written by a microphone source
#[derive(Debug, Clone)]
pub struct AudioSink {
    tx: mpsc::Sender<Bytes>,
}

impl AudioSink {
    /// Create a sink with room for `depth` chunks
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx }, rx)
    }

    /// Queue a chunk without blocking the capture loop
    ///
    /// Returns `false` once the relay side has gone away.
    pub fn emit(&self, chunk: Bytes) -> bool {
        match self.tx.try_send(chunk) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!("Audio queue full, chunk dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

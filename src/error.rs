//! Error types
//!
//! A single error enum covers the whole relay. Per-viewer and per-command
//! failures are absorbed where they happen; only bind failures reach the
//! caller of `start`.

use std::net::SocketAddr;

use crate::platform::Capability;

/// Errors produced by the relay
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Inbound command was not valid JSON or lacked a `type` field
    #[error("Invalid JSON command: {0}")]
    MalformedCommand(String),

    /// A required capture capability (permission) is not granted
    #[error("{} permission not granted.", .0.permission_name())]
    CapabilityDenied(Capability),

    /// A viewer read or write failed
    #[error("transport failure: {0}")]
    Transport(String),

    /// Capture buffer layout is not 3-plane YUV 4:2:0
    #[error("unsupported frame format: {0}")]
    UnsupportedFrameFormat(String),

    /// Listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A capture source refused to start
    #[error("capture source busy: {0}")]
    CaptureBusy(String),

    /// The supervisor task is no longer running
    #[error("capture supervisor is not running")]
    SupervisorGone,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JPEG encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

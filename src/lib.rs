//! monitor-relay: real-time camera and microphone relay for local-network viewers
//!
//! A device's camera is served as MJPEG over plain HTTP, and its microphone
//! as raw PCM over a WebSocket that also carries JSON control commands.
//! Capture runs only while someone is watching: the supervisor starts it on
//! request and tears it down when viewers leave, go quiet, or the local
//! network disappears.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use monitor_relay::platform::synthetic::{SyntheticCamera, SyntheticMicrophone};
//! use monitor_relay::platform::{CapabilitySet, FixedAddress, NetworkMonitor};
//! use monitor_relay::{CaptureDevices, MonitorConfig, MonitorService, Platform};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = MonitorService::new(
//!         MonitorConfig::default(),
//!         CaptureDevices::new(SyntheticCamera::default(), SyntheticMicrophone::new()),
//!         Platform {
//!             capabilities: Arc::new(CapabilitySet::all()),
//!             network: Arc::new(NetworkMonitor::new(true)),
//!             address: Arc::new(FixedAddress::new("192.168.1.20")),
//!         },
//!     );
//!
//!     let addrs = service.start().await?;
//!     println!("video on {}, control on {}", addrs.video, addrs.control);
//!
//!     tokio::signal::ctrl_c().await?;
//!     service.stop().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod platform;
pub mod protocol;
pub mod relay;
pub mod service;
pub mod stats;
pub mod supervisor;

/// Microphone sample rate in Hz; chunks are 16-bit little-endian mono
pub const AUDIO_SAMPLE_RATE: u32 = 16_000;

pub use codec::{EncodedFrame, FrameEncoder, RawFrame};
pub use config::MonitorConfig;
pub use dispatch::CommandDispatcher;
pub use error::{Error, Result};
pub use relay::{ControlEvent, ControlServer, MjpegServer, ViewerId};
pub use service::{BoundAddrs, MonitorService, Platform, ServiceStatus};
pub use supervisor::{CaptureDevices, CaptureStatus, Supervisor, SupervisorHandle, Transition};

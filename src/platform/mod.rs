//! Collaborator contracts
//!
//! The relay does not talk to capture hardware, permission systems or the
//! network stack directly. Everything platform-specific sits behind the
//! traits in this module:
//!
//! - [`CameraSource`] / [`MicrophoneSource`]: capture devices, fed sinks to
//!   emit into
//! - [`Capabilities`]: whether capture permissions are granted
//! - [`NetworkPresence`]: whether a usable local-network transport exists
//! - [`AddressLookup`]: the address viewers should use to reach us
//!
//! Simple in-process implementations are provided for the last three, and
//! [`synthetic`] has test-pattern capture sources.

pub mod sink;
pub mod synthetic;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::watch;

use crate::error::Result;

pub use sink::{AudioSink, FrameSink};

/// Camera lens direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    #[default]
    Back,
}

impl Facing {
    /// Parse a facing value from a command parameter
    ///
    /// Anything other than `"front"` or `"back"` yields `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "front" => Some(Facing::Front),
            "back" => Some(Facing::Back),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Facing::Front => "front",
            Facing::Back => "back",
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capture capability that may need a permission grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Camera,
    Microphone,
}

impl Capability {
    /// Human-readable permission name used in error replies
    pub fn permission_name(&self) -> &'static str {
        match self {
            Capability::Camera => "Camera",
            Capability::Microphone => "Record audio",
        }
    }
}

/// Camera capture source
///
/// `start` must begin emitting frames into `sink` from its own thread.
/// Calling `stop` must release the device; the supervisor always calls
/// `stop` before binding a different facing. Both calls run on tokio's
/// blocking pool, so they may wait on hardware or join capture threads.
pub trait CameraSource: Send + 'static {
    fn start(&mut self, facing: Facing, sink: FrameSink) -> Result<()>;
    fn stop(&mut self);
}

/// Microphone capture source producing 16 kHz mono PCM chunks
///
/// Like [`CameraSource`], `start` and `stop` run on the blocking pool.
pub trait MicrophoneSource: Send + 'static {
    fn start(&mut self, sink: AudioSink) -> Result<()>;
    fn stop(&mut self);
}

/// Permission/capability check
pub trait Capabilities: Send + Sync + 'static {
    fn has_capability(&self, kind: Capability) -> bool;
}

/// Local-network presence
pub trait NetworkPresence: Send + Sync + 'static {
    /// Whether a usable local-network transport is currently available
    fn is_local_network_connected(&self) -> bool;

    /// Subscribe to presence changes
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Local address lookup
pub trait AddressLookup: Send + Sync + 'static {
    fn local_address(&self) -> Option<String>;
}

impl<F> AddressLookup for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn local_address(&self) -> Option<String> {
        self()
    }
}

/// Address lookup that always reports the same value
#[derive(Debug, Clone, Default)]
pub struct FixedAddress(pub Option<String>);

impl FixedAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(Some(addr.into()))
    }
}

impl AddressLookup for FixedAddress {
    fn local_address(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Capability set that can be granted or revoked at runtime
#[derive(Debug)]
pub struct CapabilitySet {
    camera: AtomicBool,
    microphone: AtomicBool,
}

impl CapabilitySet {
    pub fn new(camera: bool, microphone: bool) -> Self {
        Self {
            camera: AtomicBool::new(camera),
            microphone: AtomicBool::new(microphone),
        }
    }

    /// Every capability granted
    pub fn all() -> Self {
        Self::new(true, true)
    }

    pub fn set(&self, kind: Capability, granted: bool) {
        self.flag(kind).store(granted, Ordering::Relaxed);
    }

    fn flag(&self, kind: Capability) -> &AtomicBool {
        match kind {
            Capability::Camera => &self.camera,
            Capability::Microphone => &self.microphone,
        }
    }
}

impl Capabilities for CapabilitySet {
    fn has_capability(&self, kind: Capability) -> bool {
        self.flag(kind).load(Ordering::Relaxed)
    }
}

/// Network presence driven by whoever owns the platform connectivity hooks
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    pub fn new(connected: bool) -> Self {
        let (tx, _) = watch::channel(connected);
        Self { tx }
    }

    /// Record a connectivity change; subscribers are only woken on change
    pub fn set_connected(&self, connected: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });

        if changed {
            tracing::info!(connected, "Local network presence changed");
        }
    }
}

impl NetworkPresence for NetworkMonitor {
    fn is_local_network_connected(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_parse() {
        assert_eq!(Facing::parse("front"), Some(Facing::Front));
        assert_eq!(Facing::parse("back"), Some(Facing::Back));
        assert_eq!(Facing::parse("FRONT"), None);
        assert_eq!(Facing::parse(""), None);
        assert_eq!(Facing::default(), Facing::Back);
    }

    #[test]
    fn test_capability_set_toggle() {
        let caps = CapabilitySet::new(true, false);
        assert!(caps.has_capability(Capability::Camera));
        assert!(!caps.has_capability(Capability::Microphone));

        caps.set(Capability::Camera, false);
        caps.set(Capability::Microphone, true);
        assert!(!caps.has_capability(Capability::Camera));
        assert!(caps.has_capability(Capability::Microphone));
    }

    #[test]
    fn test_address_lookup_closure() {
        let lookup = || Some("10.0.0.7".to_string());
        assert_eq!(lookup.local_address().as_deref(), Some("10.0.0.7"));
        assert_eq!(FixedAddress::default().local_address(), None);
    }

    #[tokio::test]
    async fn test_network_monitor_notifies_on_change_only() {
        let monitor = NetworkMonitor::new(true);
        let mut rx = monitor.subscribe();

        monitor.set_connected(true);
        assert!(!rx.has_changed().unwrap());

        monitor.set_connected(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
        assert!(!monitor.is_local_network_connected());
    }
}

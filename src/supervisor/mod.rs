//! Capture supervision
//!
//! Decides when the camera and microphone run. Capture starts only on
//! request, and only while the local network is up and at least one
//! control viewer is attached. It stops when asked to, when the network
//! goes away, when the last viewer has been gone for the grace window, or
//! when attached viewers stay silent past the liveness window.
//!
//! A single deadline covers both idle cases:
//!
//! ```text
//!   viewers → 0        pending = NoViewers @ now + grace
//!   viewers ↑ / command pending = Silent    @ last_activity + liveness
//!   deadline reached   stop camera + microphone (Silent also zeroes viewers)
//! ```

pub mod actor;
pub mod state;

pub use actor::{CaptureDevices, CaptureSinks, Supervisor, SupervisorHandle};
pub use state::{
    CameraState, CaptureState, CaptureStatus, IdlePolicy, IdleReason, IdleTimer, MicState,
    Transition,
};

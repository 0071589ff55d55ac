//! Capture state machine
//!
//! Pure bookkeeping for the supervisor: which devices are active, how many
//! viewers are attached, and when capture should be torn down for lack of
//! viewers or lack of activity. Device calls are made by the actor; this
//! module only decides.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::MonitorConfig;
use crate::platform::Facing;

/// Camera binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraState {
    Unbound,
    Bound(Facing),
}

/// Microphone state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MicState {
    Off,
    On,
}

/// Outcome of a capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State changed
    Applied,
    /// Already in the requested state
    Unchanged,
    /// Refused because there is no network or no viewer; not an error
    Gated,
}

/// Why capture is scheduled to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IdleReason {
    /// The last viewer left
    NoViewers,
    /// Viewers are attached but nothing has been heard from them
    Silent,
}

/// The single pending stop deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleTimer {
    pub deadline: Instant,
    pub reason: IdleReason,
}

/// Idle supervision windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    /// Delay between the viewer count reaching zero and capture stopping
    pub grace: Duration,
    /// Longest silence tolerated while viewers are attached
    pub liveness: Duration,
}

impl IdlePolicy {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            grace: config.idle_grace,
            liveness: config.liveness_window,
        }
    }
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

/// Everything the supervisor knows about capture
#[derive(Debug, Clone)]
pub struct CaptureState {
    pub camera: CameraState,
    /// Last requested facing, used for the next bind
    pub facing: Facing,
    pub microphone: MicState,
    /// Connected control viewers
    pub viewers: usize,
    pub network_connected: bool,
    pub last_activity: Instant,
    pub pending_stop: Option<IdleTimer>,
}

impl CaptureState {
    pub fn new(now: Instant, network_connected: bool) -> Self {
        Self {
            camera: CameraState::Unbound,
            facing: Facing::default(),
            microphone: MicState::Off,
            viewers: 0,
            network_connected,
            last_activity: now,
            pending_stop: None,
        }
    }

    /// Capture may start only with a network and at least one viewer
    pub fn capture_allowed(&self) -> bool {
        self.network_connected && self.viewers > 0
    }

    pub fn is_capturing(&self) -> bool {
        self.camera != CameraState::Unbound || self.microphone == MicState::On
    }

    /// Record a new viewer count and re-arm the idle timer
    ///
    /// A rising count counts as activity.
    pub fn set_viewers(&mut self, count: usize, now: Instant, policy: &IdlePolicy) {
        let previous = self.viewers;
        self.viewers = count;

        if count == 0 {
            if previous > 0 || self.pending_stop.is_none() {
                self.pending_stop = Some(IdleTimer {
                    deadline: now + policy.grace,
                    reason: IdleReason::NoViewers,
                });
            }
        } else {
            if count > previous {
                self.last_activity = now;
            }
            self.arm_silent(policy);
        }
    }

    /// Record viewer activity
    pub fn touch(&mut self, now: Instant, policy: &IdlePolicy) {
        self.last_activity = now;
        if self.viewers > 0 {
            self.arm_silent(policy);
        }
    }

    fn arm_silent(&mut self, policy: &IdlePolicy) {
        self.pending_stop = Some(IdleTimer {
            deadline: self.last_activity + policy.liveness,
            reason: IdleReason::Silent,
        });
    }

    /// Take the pending timer if its deadline has passed
    ///
    /// A `Silent` expiry resets the viewer count to zero. Either way the
    /// caller must stop both devices.
    pub fn expire(&mut self, now: Instant) -> Option<IdleReason> {
        let timer = self.pending_stop.filter(|t| t.deadline <= now)?;
        self.pending_stop = None;
        if timer.reason == IdleReason::Silent {
            self.viewers = 0;
        }
        Some(timer.reason)
    }

    pub fn status(&self, now: Instant) -> CaptureStatus {
        CaptureStatus {
            camera: self.camera,
            facing: self.facing,
            microphone: self.microphone,
            viewers: self.viewers,
            network_connected: self.network_connected,
            idle_reason: self.pending_stop.map(|t| t.reason),
            idle_in: self
                .pending_stop
                .map(|t| t.deadline.saturating_duration_since(now)),
        }
    }
}

/// Point-in-time view of the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStatus {
    pub camera: CameraState,
    pub facing: Facing,
    pub microphone: MicState,
    pub viewers: usize,
    pub network_connected: bool,
    pub idle_reason: Option<IdleReason>,
    pub idle_in: Option<Duration>,
}

impl CaptureStatus {
    pub fn camera_facing(&self) -> Option<Facing> {
        match self.camera {
            CameraState::Bound(facing) => Some(facing),
            CameraState::Unbound => None,
        }
    }
}

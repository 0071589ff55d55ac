//! Service wiring
//!
//! [`MonitorService`] owns both relays and, while running, the capture
//! supervisor plus three background tasks:
//!
//! - frame pipeline: latest raw frame → JPEG on the blocking pool → video
//!   relay
//! - audio forwarder: microphone chunks → control relay binary frames
//! - coordinator: control relay events → viewer count / command dispatch →
//!   replies

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::codec::{FrameEncoder, RawFrame};
use crate::config::MonitorConfig;
use crate::dispatch::CommandDispatcher;
use crate::error::{Error, Result};
use crate::platform::{AddressLookup, AudioSink, Capabilities, FrameSink, NetworkPresence};
use crate::relay::{ControlEvent, ControlServer, MjpegServer, RelayOptions};
use crate::stats::RelayStatsSnapshot;
use crate::supervisor::{
    CaptureDevices, CaptureSinks, CaptureStatus, IdlePolicy, Supervisor, SupervisorHandle,
};

/// Platform services the relay depends on, besides the capture devices
#[derive(Clone)]
pub struct Platform {
    pub capabilities: Arc<dyn Capabilities>,
    pub network: Arc<dyn NetworkPresence>,
    pub address: Arc<dyn AddressLookup>,
}

/// Addresses the relays are listening on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundAddrs {
    pub video: SocketAddr,
    pub control: SocketAddr,
}

/// Snapshot of the whole service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub addrs: Option<BoundAddrs>,
    pub video_viewers: usize,
    pub control_viewers: usize,
    pub capture: Option<CaptureStatus>,
    pub video: RelayStatsSnapshot,
    pub control: RelayStatsSnapshot,
}

struct Running {
    addrs: BoundAddrs,
    supervisor: Supervisor,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    /// Capture devices, parked here while the supervisor is not running
    devices: Option<CaptureDevices>,
    running: Option<Running>,
}

/// The camera/microphone relay service
pub struct MonitorService {
    config: MonitorConfig,
    platform: Platform,
    video: Arc<MjpegServer>,
    control: Arc<ControlServer>,
    inner: Mutex<Inner>,
}

impl MonitorService {
    pub fn new(config: MonitorConfig, devices: CaptureDevices, platform: Platform) -> Self {
        let video = Arc::new(MjpegServer::new(RelayOptions::video(&config)));
        let control = Arc::new(ControlServer::new(
            RelayOptions::control(&config),
            Arc::clone(&platform.address),
        ));

        Self {
            config,
            platform,
            video,
            control,
            inner: Mutex::new(Inner {
                devices: Some(devices),
                running: None,
            }),
        }
    }

    /// Bind both endpoints and start supervising capture
    ///
    /// Returns the bound addresses. Calling `start` while running returns
    /// the current addresses and changes nothing. If either endpoint fails
    /// to bind, nothing is left running.
    pub async fn start(&self) -> Result<BoundAddrs> {
        let mut inner = self.inner.lock().await;
        if let Some(running) = &inner.running {
            return Ok(running.addrs);
        }

        let video_addr = self.video.start(self.config.video_addr).await?;

        let (events_tx, events_rx) = mpsc::channel(self.config.event_queue_depth);
        let control_addr = match self.control.start(self.config.control_addr, events_tx).await {
            Ok(addr) => addr,
            Err(e) => {
                self.video.stop().await;
                return Err(e);
            }
        };

        let Some(devices) = inner.devices.take() else {
            self.control.stop().await;
            self.video.stop().await;
            return Err(Error::CaptureBusy("capture devices unavailable".into()));
        };

        let (frames, frame_rx) = FrameSink::channel();
        let (audio, audio_rx) = AudioSink::channel(self.config.audio_queue_depth);
        let supervisor = Supervisor::spawn(
            devices,
            CaptureSinks { frames, audio },
            self.platform.network.subscribe(),
            IdlePolicy::from_config(&self.config),
        );

        let dispatcher = CommandDispatcher::new(
            supervisor.handle(),
            Arc::clone(&self.platform.capabilities),
            Arc::clone(&self.platform.address),
        );

        let tasks = vec![
            tokio::spawn(frame_pipeline(
                frame_rx,
                FrameEncoder::new(self.config.jpeg_quality),
                Arc::clone(&self.video),
            )),
            tokio::spawn(audio_forwarder(audio_rx, Arc::clone(&self.control))),
            tokio::spawn(coordinator(
                events_rx,
                dispatcher,
                supervisor.handle(),
                Arc::clone(&self.control),
            )),
        ];

        let addrs = BoundAddrs {
            video: video_addr,
            control: control_addr,
        };
        tracing::info!(video = %addrs.video, control = %addrs.control, "Monitor service started");

        inner.running = Some(Running {
            addrs,
            supervisor,
            tasks,
        });
        Ok(addrs)
    }

    /// Release capture, close both endpoints and end background tasks
    ///
    /// Idempotent. The capture devices are kept for the next `start`.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        let Some(running) = inner.running.take() else {
            return;
        };

        match running.supervisor.shutdown().await {
            Ok(devices) => inner.devices = Some(devices),
            Err(e) => tracing::error!(error = %e, "Capture devices lost during shutdown"),
        }

        self.control.stop().await;
        self.video.stop().await;

        for task in &running.tasks {
            task.abort();
        }
        for task in running.tasks {
            let _ = task.await;
        }

        tracing::info!("Monitor service stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running.is_some()
    }

    /// Handle to the running supervisor, if any
    pub async fn supervisor(&self) -> Option<SupervisorHandle> {
        self.inner
            .lock()
            .await
            .running
            .as_ref()
            .map(|r| r.supervisor.handle())
    }

    pub async fn status(&self) -> ServiceStatus {
        let (addrs, supervisor) = {
            let inner = self.inner.lock().await;
            match &inner.running {
                Some(r) => (Some(r.addrs), Some(r.supervisor.handle())),
                None => (None, None),
            }
        };

        let capture = match supervisor {
            Some(handle) => handle.status().await.ok(),
            None => None,
        };

        ServiceStatus {
            addrs,
            video_viewers: self.video.viewer_count().await,
            control_viewers: self.control.viewer_count().await,
            capture,
            video: self.video.stats(),
            control: self.control.stats(),
        }
    }
}

/// Encode the newest raw frame whenever one arrives
///
/// Frames that arrive while an encode is in flight replace each other, so
/// the encoder always works on the most recent capture.
async fn frame_pipeline(
    mut frames: watch::Receiver<Option<RawFrame>>,
    mut encoder: FrameEncoder,
    video: Arc<MjpegServer>,
) {
    while frames.changed().await.is_ok() {
        let Some(frame) = frames.borrow_and_update().clone() else {
            continue;
        };
        if video.viewer_count().await == 0 {
            continue;
        }

        let encoded = tokio::task::spawn_blocking(move || {
            let result = encoder.encode(&frame);
            (encoder, result)
        })
        .await;

        let result = match encoded {
            Ok((returned, result)) => {
                encoder = returned;
                result
            }
            Err(e) => {
                tracing::error!(error = %e, "Frame encoder task failed");
                return;
            }
        };

        match result {
            Ok(jpeg) => {
                video.broadcast_frame(&jpeg).await;
            }
            Err(Error::UnsupportedFrameFormat(reason)) => {
                tracing::debug!(reason = %reason, "Dropping unsupported frame");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode frame");
            }
        }
    }
}

async fn audio_forwarder(mut chunks: mpsc::Receiver<Bytes>, control: Arc<ControlServer>) {
    while let Some(chunk) = chunks.recv().await {
        control.broadcast_audio(chunk).await;
    }
}

/// Apply control relay events to the supervisor and answer commands
///
/// The event queue is bounded; while this falls behind, each connection
/// waits on its own next event instead of the queue growing.
async fn coordinator(
    mut events: mpsc::Receiver<ControlEvent>,
    dispatcher: CommandDispatcher,
    supervisor: SupervisorHandle,
    control: Arc<ControlServer>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ControlEvent::Connected { .. } | ControlEvent::Disconnected { .. } => {
                // Events from different connections can arrive out of
                // order; the registry count is authoritative.
                let viewers = control.viewer_count().await;
                if let Err(e) = supervisor.viewers_changed(viewers).await {
                    tracing::warn!(error = %e, "Failed to report viewer count");
                }
            }
            ControlEvent::Message { viewer, text } => {
                let Some(reply) = dispatcher.handle(viewer, &text).await else {
                    continue;
                };
                if !control.send_to(viewer, reply.to_json()).await {
                    tracing::debug!(viewer = %viewer, "Reply not delivered");
                }
            }
        }
    }
}

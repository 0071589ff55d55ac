//! Supervisor task
//!
//! One task owns the capture devices and the [`CaptureState`]. Everything
//! else talks to it through a cloneable [`SupervisorHandle`]; each request
//! carries a oneshot for the reply, so callers observe their change applied
//! before they continue.
//!
//! Device start and stop calls may block on hardware, so they run on the
//! blocking pool while the task waits for them.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use super::state::{
    CameraState, CaptureState, CaptureStatus, IdlePolicy, IdleReason, MicState, Transition,
};
use crate::error::{Error, Result};
use crate::platform::{AudioSink, CameraSource, Facing, FrameSink, MicrophoneSource};

const REQUEST_QUEUE_DEPTH: usize = 64;

/// Capture hardware owned by the supervisor while it runs
pub struct CaptureDevices {
    pub camera: Box<dyn CameraSource>,
    pub microphone: Box<dyn MicrophoneSource>,
}

impl CaptureDevices {
    pub fn new(camera: impl CameraSource, microphone: impl MicrophoneSource) -> Self {
        Self {
            camera: Box::new(camera),
            microphone: Box::new(microphone),
        }
    }
}

/// Where the devices deliver their output
#[derive(Debug, Clone)]
pub struct CaptureSinks {
    pub frames: FrameSink,
    pub audio: AudioSink,
}

enum Request {
    StartCamera(oneshot::Sender<Result<Transition>>),
    SwitchCamera(Facing, oneshot::Sender<Result<Transition>>),
    StartMicrophone(oneshot::Sender<Result<Transition>>),
    StopMicrophone(oneshot::Sender<Transition>),
    StopCapture(oneshot::Sender<Transition>),
    Touch(oneshot::Sender<()>),
    ViewersChanged(usize, oneshot::Sender<()>),
    Status(oneshot::Sender<CaptureStatus>),
    Shutdown,
}

/// Cloneable handle to the supervisor task
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<Request>,
}

impl SupervisorHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| Error::SupervisorGone)?;
        rx.await.map_err(|_| Error::SupervisorGone)
    }

    /// Bind the camera at the current facing
    pub async fn start_camera(&self) -> Result<Transition> {
        self.call(Request::StartCamera).await?
    }

    /// Record a new facing and rebind if capture is allowed
    pub async fn switch_camera(&self, facing: Facing) -> Result<Transition> {
        self.call(|reply| Request::SwitchCamera(facing, reply)).await?
    }

    pub async fn start_microphone(&self) -> Result<Transition> {
        self.call(Request::StartMicrophone).await?
    }

    pub async fn stop_microphone(&self) -> Result<Transition> {
        self.call(Request::StopMicrophone).await
    }

    /// Release both the camera and the microphone
    pub async fn stop_capture(&self) -> Result<Transition> {
        self.call(Request::StopCapture).await
    }

    /// Refresh the last-activity timestamp
    pub async fn touch(&self) -> Result<()> {
        self.call(Request::Touch).await
    }

    /// Report the current control-viewer count
    pub async fn viewers_changed(&self, count: usize) -> Result<()> {
        self.call(|reply| Request::ViewersChanged(count, reply)).await
    }

    pub async fn status(&self) -> Result<CaptureStatus> {
        self.call(Request::Status).await
    }
}

/// A running supervisor task
pub struct Supervisor {
    handle: SupervisorHandle,
    task: JoinHandle<Option<CaptureDevices>>,
}

impl Supervisor {
    /// Spawn the supervisor task
    ///
    /// The initial network state is read from `network`; later changes are
    /// picked up as they are published.
    pub fn spawn(
        devices: CaptureDevices,
        sinks: CaptureSinks,
        network: watch::Receiver<bool>,
        policy: IdlePolicy,
    ) -> Self {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let connected = *network.borrow();
        let actor = Actor {
            state: CaptureState::new(Instant::now(), connected),
            camera: Some(devices.camera),
            microphone: Some(devices.microphone),
            sinks,
            policy,
        };

        tracing::info!(
            network_connected = connected,
            grace_ms = policy.grace.as_millis() as u64,
            liveness_ms = policy.liveness.as_millis() as u64,
            "Capture supervisor started"
        );

        Self {
            handle: SupervisorHandle { tx },
            task: tokio::spawn(actor.run(rx, network)),
        }
    }

    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    /// Stop both devices, end the task and hand the devices back
    ///
    /// Fails with [`Error::SupervisorGone`] if the task died or a device
    /// was lost to a panic along the way.
    pub async fn shutdown(self) -> Result<CaptureDevices> {
        let _ = self.handle.tx.send(Request::Shutdown).await;
        match self.task.await {
            Ok(Some(devices)) => Ok(devices),
            Ok(None) => {
                tracing::error!("Capture device lost while supervised");
                Err(Error::SupervisorGone)
            }
            Err(e) => {
                tracing::error!(error = %e, "Capture supervisor task failed");
                Err(Error::SupervisorGone)
            }
        }
    }
}

/// Run a device call on the blocking pool
///
/// The device moves into the blocking task and back into `slot` when the
/// call returns. A panicking call loses the device; `slot` stays empty and
/// `None` is returned.
async fn on_blocking<D, T, F>(slot: &mut Option<Box<D>>, call: F) -> Option<T>
where
    D: ?Sized + Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut D) -> T + Send + 'static,
{
    let mut device = slot.take()?;
    let joined = tokio::task::spawn_blocking(move || {
        let out = call(&mut *device);
        (device, out)
    })
    .await;

    match joined {
        Ok((device, out)) => {
            *slot = Some(device);
            Some(out)
        }
        Err(e) => {
            tracing::error!(error = %e, "Capture device call failed");
            None
        }
    }
}

struct Actor {
    state: CaptureState,
    camera: Option<Box<dyn CameraSource>>,
    microphone: Option<Box<dyn MicrophoneSource>>,
    sinks: CaptureSinks,
    policy: IdlePolicy,
}

impl Actor {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut network: watch::Receiver<bool>,
    ) -> Option<CaptureDevices> {
        let mut network_open = true;

        loop {
            let deadline = self.state.pending_stop.map(|t| t.deadline);

            tokio::select! {
                biased;

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire_idle(Instant::now()).await;
                }
                changed = network.changed(), if network_open => match changed {
                    Ok(()) => {
                        let connected = *network.borrow_and_update();
                        self.on_network(connected).await;
                    }
                    Err(_) => network_open = false,
                },
                request = requests.recv() => {
                    // An overdue stop always lands before the request it
                    // raced with.
                    self.expire_idle(Instant::now()).await;
                    match request {
                        Some(Request::Shutdown) | None => break,
                        Some(request) => self.handle(request).await,
                    }
                }
            }
        }

        self.release().await;
        tracing::info!("Capture supervisor stopped");
        let (camera, microphone) = (self.camera?, self.microphone?);
        Some(CaptureDevices { camera, microphone })
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::StartCamera(reply) => {
                let _ = reply.send(self.start_camera().await);
            }
            Request::SwitchCamera(facing, reply) => {
                let _ = reply.send(self.switch_camera(facing).await);
            }
            Request::StartMicrophone(reply) => {
                let _ = reply.send(self.start_microphone().await);
            }
            Request::StopMicrophone(reply) => {
                let _ = reply.send(self.stop_microphone().await);
            }
            Request::StopCapture(reply) => {
                let _ = reply.send(self.release().await);
            }
            Request::Touch(reply) => {
                self.state.touch(Instant::now(), &self.policy);
                let _ = reply.send(());
            }
            Request::ViewersChanged(count, reply) => {
                self.state.set_viewers(count, Instant::now(), &self.policy);
                tracing::debug!(viewers = count, "Viewer count changed");
                let _ = reply.send(());
            }
            Request::Status(reply) => {
                let _ = reply.send(self.state.status(Instant::now()));
            }
            Request::Shutdown => {}
        }
    }

    async fn start_camera(&mut self) -> Result<Transition> {
        if !self.state.capture_allowed() {
            tracing::debug!(
                viewers = self.state.viewers,
                network_connected = self.state.network_connected,
                "Camera start gated"
            );
            return Ok(Transition::Gated);
        }
        if self.state.camera != CameraState::Unbound {
            return Ok(Transition::Unchanged);
        }
        self.bind_camera(self.state.facing).await?;
        Ok(Transition::Applied)
    }

    async fn switch_camera(&mut self, facing: Facing) -> Result<Transition> {
        if self.state.camera == CameraState::Bound(facing) {
            return Ok(Transition::Unchanged);
        }

        self.state.facing = facing;
        if !self.state.capture_allowed() {
            tracing::debug!(facing = %facing, "Facing recorded, capture not allowed");
            return Ok(Transition::Gated);
        }

        self.unbind_camera().await;
        self.bind_camera(facing).await?;
        Ok(Transition::Applied)
    }

    async fn start_microphone(&mut self) -> Result<Transition> {
        if !self.state.capture_allowed() {
            tracing::debug!(viewers = self.state.viewers, "Microphone start gated");
            return Ok(Transition::Gated);
        }
        if self.state.microphone == MicState::On {
            return Ok(Transition::Unchanged);
        }

        let sink = self.sinks.audio.clone();
        on_blocking(&mut self.microphone, move |mic| mic.start(sink))
            .await
            .unwrap_or_else(|| Err(Error::CaptureBusy("microphone unavailable".into())))?;
        self.state.microphone = MicState::On;
        tracing::info!("Microphone started");
        Ok(Transition::Applied)
    }

    async fn stop_microphone(&mut self) -> Transition {
        if self.state.microphone == MicState::Off {
            return Transition::Unchanged;
        }

        on_blocking(&mut self.microphone, |mic| mic.stop()).await;
        self.state.microphone = MicState::Off;
        tracing::info!("Microphone stopped");
        Transition::Applied
    }

    async fn bind_camera(&mut self, facing: Facing) -> Result<()> {
        let sink = self.sinks.frames.clone();
        on_blocking(&mut self.camera, move |camera| camera.start(facing, sink))
            .await
            .unwrap_or_else(|| Err(Error::CaptureBusy("camera unavailable".into())))?;
        self.state.camera = CameraState::Bound(facing);
        tracing::info!(facing = %facing, "Camera bound");
        Ok(())
    }

    async fn unbind_camera(&mut self) -> bool {
        if self.state.camera == CameraState::Unbound {
            return false;
        }

        on_blocking(&mut self.camera, |camera| camera.stop()).await;
        self.state.camera = CameraState::Unbound;
        tracing::info!("Camera unbound");
        true
    }

    /// Stop both devices
    async fn release(&mut self) -> Transition {
        let camera = self.unbind_camera().await;
        let microphone = self.stop_microphone().await == Transition::Applied;
        if camera || microphone {
            Transition::Applied
        } else {
            Transition::Unchanged
        }
    }

    async fn expire_idle(&mut self, now: Instant) {
        let Some(reason) = self.state.expire(now) else {
            return;
        };

        match reason {
            IdleReason::NoViewers => {
                tracing::info!("No viewers for the grace window, stopping capture");
            }
            IdleReason::Silent => {
                tracing::warn!("No viewer activity within the liveness window, resetting viewers");
            }
        }
        self.release().await;
    }

    async fn on_network(&mut self, connected: bool) {
        if self.state.network_connected == connected {
            return;
        }

        self.state.network_connected = connected;
        if connected {
            tracing::info!("Local network restored");
        } else {
            tracing::warn!("Local network lost, stopping capture");
            self.release().await;
        }
    }
}

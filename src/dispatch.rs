//! Command dispatch
//!
//! Turns a control text frame into supervisor calls and at most one reply.
//! Nothing here fails outward: parse errors, missing permissions and
//! device failures all become `error` replies for the viewer that sent the
//! command.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::platform::{AddressLookup, Capabilities, Capability};
use crate::protocol::{Command, CommandKind, Reply};
use crate::relay::ViewerId;
use crate::supervisor::SupervisorHandle;

/// Routes viewer commands to the capture supervisor
#[derive(Clone)]
pub struct CommandDispatcher {
    supervisor: SupervisorHandle,
    capabilities: Arc<dyn Capabilities>,
    address: Arc<dyn AddressLookup>,
}

impl CommandDispatcher {
    pub fn new(
        supervisor: SupervisorHandle,
        capabilities: Arc<dyn Capabilities>,
        address: Arc<dyn AddressLookup>,
    ) -> Self {
        Self {
            supervisor,
            capabilities,
            address,
        }
    }

    /// Handle one text frame from `viewer`
    ///
    /// Any inbound frame counts as viewer activity, whether or not it
    /// parses. Returns the reply to send back, if any.
    pub async fn handle(&self, viewer: ViewerId, raw: &str) -> Option<Reply> {
        if let Err(e) = self.supervisor.touch().await {
            tracing::warn!(viewer = %viewer, error = %e, "Failed to record activity");
        }

        let command = match Command::parse(raw) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!(viewer = %viewer, error = %e, "Rejected control message");
                return Some(Reply::from(&e));
            }
        };

        tracing::debug!(viewer = %viewer, command = %command.kind, "Dispatching command");
        match self.dispatch(&command).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    viewer = %viewer,
                    command = %command.kind,
                    error = %e,
                    "Command failed"
                );
                Some(Reply::from(&e))
            }
        }
    }

    async fn dispatch(&self, command: &Command) -> Result<Option<Reply>> {
        let reply = match &command.kind {
            CommandKind::Start => {
                self.supervisor.start_camera().await?;
                Reply::status("Monitoring started")
            }
            CommandKind::Stop => {
                self.supervisor.stop_capture().await?;
                Reply::status("Monitoring stopped")
            }
            CommandKind::SwitchCamera => {
                self.require(Capability::Camera)?;
                let facing = command.facing();
                self.supervisor.switch_camera(facing).await?;
                Reply::status(format!("Camera switched to {facing}"))
            }
            CommandKind::AudioOn => {
                self.require(Capability::Microphone)?;
                self.supervisor.start_microphone().await?;
                Reply::status("Audio monitoring started")
            }
            CommandKind::AudioOff => {
                self.require(Capability::Microphone)?;
                self.supervisor.stop_microphone().await?;
                Reply::status("Audio monitoring stopped")
            }
            CommandKind::Ping => return Ok(None),
            CommandKind::GetIp => Reply::ip_address(self.address.local_address()),
            CommandKind::Unknown(name) => Reply::error(format!("Unknown command: {name}")),
        };

        Ok(Some(reply))
    }

    fn require(&self, kind: Capability) -> Result<()> {
        if self.capabilities.has_capability(kind) {
            Ok(())
        } else {
            Err(Error::CapabilityDenied(kind))
        }
    }
}

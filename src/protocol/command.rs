//! Control channel messages
//!
//! Viewers send commands as JSON text frames:
//!
//! ```json
//! {"type": "switchCamera", "data": {"facing": "front"}}
//! ```
//!
//! and receive replies of the form
//! `{"type": "status"|"error"|"ipAddress", "message"?: ..., "ip"?: ...}`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::platform::Facing;

/// Command discriminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Start,
    Stop,
    SwitchCamera,
    AudioOn,
    AudioOff,
    Ping,
    GetIp,
    Unknown(String),
}

impl CommandKind {
    pub fn parse(name: &str) -> Self {
        match name {
            "start" | "startMonitoring" => CommandKind::Start,
            "stop" | "stopMonitoring" => CommandKind::Stop,
            "switchCamera" => CommandKind::SwitchCamera,
            "audioOn" => CommandKind::AudioOn,
            "audioOff" => CommandKind::AudioOff,
            "ping" => CommandKind::Ping,
            "getIp" => CommandKind::GetIp,
            other => CommandKind::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
            CommandKind::SwitchCamera => "switchCamera",
            CommandKind::AudioOn => "audioOn",
            CommandKind::AudioOff => "audioOff",
            CommandKind::Ping => "ping",
            CommandKind::GetIp => "getIp",
            CommandKind::Unknown(name) => name,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
struct WireCommand {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<HashMap<String, String>>,
}

/// A decoded control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub data: HashMap<String, String>,
}

impl Command {
    /// Decode a command from a text frame
    ///
    /// Fails with `MalformedCommand` if the text is not JSON or has no
    /// string `type` field.
    pub fn parse(text: &str) -> Result<Self> {
        let wire: WireCommand =
            serde_json::from_str(text).map_err(|e| Error::MalformedCommand(e.to_string()))?;

        Ok(Self {
            kind: CommandKind::parse(&wire.kind),
            data: wire.data.unwrap_or_default(),
        })
    }

    /// Look up a string parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Requested camera facing, defaulting to back when absent or
    /// unrecognized
    pub fn facing(&self) -> Facing {
        self.param("facing")
            .and_then(Facing::parse)
            .unwrap_or_default()
    }
}

/// Message sent back to a control viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Reply {
    Status {
        message: String,
    },
    Error {
        message: String,
    },
    IpAddress {
        #[serde(skip_serializing_if = "Option::is_none")]
        ip: Option<String>,
    },
}

impl Reply {
    pub fn status(message: impl Into<String>) -> Self {
        Reply::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            message: message.into(),
        }
    }

    pub fn ip_address(ip: Option<String>) -> Self {
        Reply::IpAddress { ip }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error { .. })
    }

    /// Serialize for a text frame
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize reply");
                r#"{"type":"error","message":"internal error"}"#.to_string()
            }
        }
    }
}

impl From<&Error> for Reply {
    fn from(err: &Error) -> Self {
        Reply::error(err.to_string())
    }
}

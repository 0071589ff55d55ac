//! Wire formats
//!
//! - [`multipart`]: the MJPEG response head and per-frame parts
//! - [`command`]: JSON commands and replies on the control channel

pub mod command;
pub mod multipart;

pub use command::{Command, CommandKind, Reply};
pub use multipart::{encode_part, BOUNDARY, RESPONSE_HEAD};

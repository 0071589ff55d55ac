//! Frame codec
//!
//! Turns planar YUV capture buffers into JPEG stills for the MJPEG relay.
//!
//! ```text
//!   RawFrame (Y, U, V planes, arbitrary strides)
//!        │ validate: 3 planes, 4:2:0, planes cover the frame
//!        ▼
//!   NV21 buffer (Y | VUVU...)      ← reused across calls
//!        │ BT.601 full range
//!        ▼
//!   RGB8 buffer                    ← reused across calls
//!        │ image::codecs::jpeg
//!        ▼
//!   EncodedFrame (Bytes)
//! ```

pub mod frame;
pub mod jpeg;

pub use frame::{EncodedFrame, PixelFormat, Plane, RawFrame, JPEG_CONTENT_TYPE};
pub use jpeg::FrameEncoder;

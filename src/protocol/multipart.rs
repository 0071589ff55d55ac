//! MJPEG multipart framing
//!
//! The video endpoint answers every connection with the same response head
//! and then streams parts forever:
//!
//! ```text
//! HTTP/1.1 200 OK
//! Content-Type: multipart/x-mixed-replace; boundary=--BOUNDARY
//!
//! --BOUNDARY
//! Content-Type: image/jpeg
//! Content-Length: <n>
//!
//! <n bytes>
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::EncodedFrame;

/// Boundary token declared in the response head and written before each part
pub const BOUNDARY: &str = "--BOUNDARY";

/// Response head written to every video viewer on accept
pub const RESPONSE_HEAD: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=--BOUNDARY\r\n\r\n";

/// Format one multipart part carrying `frame`
///
/// The result is shared by every viewer's queue.
pub fn encode_part(frame: &EncodedFrame) -> Bytes {
    let head = format!(
        "{BOUNDARY}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        frame.content_type(),
        frame.len()
    );

    let mut buf = BytesMut::with_capacity(head.len() + frame.len() + 2);
    buf.put_slice(head.as_bytes());
    buf.put_slice(&frame.data);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

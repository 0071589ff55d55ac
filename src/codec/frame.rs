//! Raw and encoded frame types

use bytes::Bytes;

use crate::error::{Error, Result};

/// JPEG is the only output format the video relay carries
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Largest dimension the JPEG encoder accepts
pub const MAX_DIMENSION: u32 = u16::MAX as u32;

/// Pixel layout reported by the capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Three planes, chroma subsampled 2x2 (YUV_420_888 style)
    Yuv420,
    /// Anything else, carrying the platform's format code
    Other(u32),
}

/// One color plane of a raw capture buffer
#[derive(Debug, Clone)]
pub struct Plane {
    /// Plane bytes, starting at the first sample
    pub data: Bytes,
    /// Bytes between the starts of consecutive rows
    pub row_stride: usize,
    /// Bytes between consecutive samples within a row
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: impl Into<Bytes>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data: data.into(),
            row_stride,
            pixel_stride,
        }
    }

    /// A tightly packed plane (`row_stride == width`, `pixel_stride == 1`)
    pub fn packed(data: impl Into<Bytes>, width: usize) -> Self {
        Self::new(data, width, 1)
    }

    /// Sample at (`row`, `col`); caller must have validated the plane
    #[inline]
    pub(crate) fn sample(&self, row: usize, col: usize) -> u8 {
        self.data[row * self.row_stride + col * self.pixel_stride]
    }

    /// Check that `cols` x `rows` samples are addressable
    fn check(&self, name: &str, cols: usize, rows: usize) -> Result<()> {
        if self.pixel_stride == 0 {
            return Err(Error::UnsupportedFrameFormat(format!(
                "{name} plane has zero pixel stride"
            )));
        }

        let row_span = (cols - 1)
            .checked_mul(self.pixel_stride)
            .and_then(|n| n.checked_add(1));
        let needed = row_span.and_then(|span| {
            if self.row_stride < span {
                return None;
            }
            (rows - 1)
                .checked_mul(self.row_stride)
                .and_then(|n| n.checked_add(span))
        });

        match needed {
            Some(needed) if needed <= self.data.len() => Ok(()),
            Some(needed) => Err(Error::UnsupportedFrameFormat(format!(
                "{name} plane holds {} bytes, {needed} required",
                self.data.len()
            ))),
            None => Err(Error::UnsupportedFrameFormat(format!(
                "{name} plane strides ({}, {}) do not fit {cols}x{rows}",
                self.row_stride, self.pixel_stride
            ))),
        }
    }
}

/// A capture-time video buffer
///
/// Planes are ordered Y, U, V. Chroma planes cover `ceil(w/2) x ceil(h/2)`
/// samples. Cloning is cheap; plane data is reference counted.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
}

impl RawFrame {
    /// Build a YUV 4:2:0 frame from its three planes
    pub fn yuv420(width: u32, height: u32, y: Plane, u: Plane, v: Plane) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Yuv420,
            planes: vec![y, u, v],
        }
    }

    /// Chroma plane dimensions in samples
    pub fn chroma_size(&self) -> (usize, usize) {
        (
            (self.width as usize).div_ceil(2),
            (self.height as usize).div_ceil(2),
        )
    }

    /// Verify the frame is a 3-plane 4:2:0 layout whose planes cover the
    /// declared dimensions
    pub fn validate(&self) -> Result<()> {
        if self.format != PixelFormat::Yuv420 {
            return Err(Error::UnsupportedFrameFormat(format!(
                "expected YUV 4:2:0, got {:?}",
                self.format
            )));
        }
        if self.planes.len() != 3 {
            return Err(Error::UnsupportedFrameFormat(format!(
                "expected 3 planes, got {}",
                self.planes.len()
            )));
        }
        if self.width == 0
            || self.height == 0
            || self.width > MAX_DIMENSION
            || self.height > MAX_DIMENSION
        {
            return Err(Error::UnsupportedFrameFormat(format!(
                "invalid dimensions {}x{}",
                self.width, self.height
            )));
        }

        let (cw, ch) = self.chroma_size();
        self.planes[0].check("Y", self.width as usize, self.height as usize)?;
        self.planes[1].check("U", cw, ch)?;
        self.planes[2].check("V", cw, ch)?;

        Ok(())
    }
}

/// A compressed still image ready for the video relay
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

impl EncodedFrame {
    pub fn content_type(&self) -> &'static str {
        JPEG_CONTENT_TYPE
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A packed single-color frame
    pub(crate) fn solid_frame(width: u32, height: u32, y: u8, u: u8, v: u8) -> RawFrame {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        RawFrame::yuv420(
            width,
            height,
            Plane::packed(vec![y; w * h], w),
            Plane::packed(vec![u; cw * ch], cw),
            Plane::packed(vec![v; cw * ch], cw),
        )
    }

    #[test]
    fn test_valid_frame() {
        assert!(solid_frame(16, 8, 128, 128, 128).validate().is_ok());
        assert!(solid_frame(5, 3, 128, 128, 128).validate().is_ok());
        assert_eq!(solid_frame(5, 3, 0, 0, 0).chroma_size(), (3, 2));
    }

    #[test]
    fn test_rejects_other_format() {
        let mut frame = solid_frame(4, 4, 0, 0, 0);
        frame.format = PixelFormat::Other(0x11);

        assert!(matches!(
            frame.validate(),
            Err(Error::UnsupportedFrameFormat(_))
        ));
    }

    #[test]
    fn test_rejects_wrong_plane_count() {
        let mut frame = solid_frame(4, 4, 0, 0, 0);
        frame.planes.pop();

        assert!(matches!(
            frame.validate(),
            Err(Error::UnsupportedFrameFormat(_))
        ));
    }

    #[test]
    fn test_rejects_zero_dimensions() {
        let frame = RawFrame::yuv420(
            0,
            4,
            Plane::packed(Vec::new(), 0),
            Plane::packed(Vec::new(), 0),
            Plane::packed(Vec::new(), 0),
        );

        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_rejects_short_plane() {
        let mut frame = solid_frame(8, 8, 0, 0, 0);
        frame.planes[0] = Plane::packed(vec![0u8; 63], 8);

        assert!(matches!(
            frame.validate(),
            Err(Error::UnsupportedFrameFormat(_))
        ));
    }

    #[test]
    fn test_rejects_row_stride_narrower_than_row() {
        let mut frame = solid_frame(8, 8, 0, 0, 0);
        // 4 chroma samples at pixel stride 2 need 7 bytes per row
        frame.planes[1] = Plane::new(vec![0u8; 64], 6, 2);

        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_accepts_padded_strides() {
        // Last row need not carry padding
        let y = Plane::new(vec![0u8; 3 * 12 + 8], 12, 1);
        let u = Plane::new(vec![0u8; 16 + 7], 16, 2);
        let v = Plane::new(vec![0u8; 16 + 7], 16, 2);
        let frame = RawFrame::yuv420(8, 4, y, u, v);

        assert!(frame.validate().is_ok());
    }

    #[test]
    fn test_encoded_frame_content_type() {
        let frame = EncodedFrame {
            data: Bytes::from_static(&[0xFF, 0xD8]),
            width: 1,
            height: 1,
        };
        assert_eq!(frame.content_type(), "image/jpeg");
        assert_eq!(frame.len(), 2);
        assert!(!frame.is_empty());
    }
}

//! YUV 4:2:0 to JPEG conversion
//!
//! Frames pass through two intermediate buffers owned by the encoder:
//!
//! 1. NV21: full-resolution luma followed by one interleaved chroma region
//!    with V before U for every 2x2 block
//! 2. RGB8: full-range BT.601 conversion of the NV21 buffer
//!
//! The RGB buffer is then compressed with `image`'s baseline JPEG encoder.
//! Both buffers are resized to the current frame, so the first call and a
//! call after a resolution change behave the same as any other.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use super::frame::{EncodedFrame, RawFrame};
use crate::config::DEFAULT_JPEG_QUALITY;
use crate::error::Result;

/// Converts raw capture frames into JPEG stills
#[derive(Debug)]
pub struct FrameEncoder {
    quality: u8,
    nv21: Vec<u8>,
    rgb: Vec<u8>,
    /// Size of the previous output, used to pre-size the next one
    last_len: usize,
}

impl FrameEncoder {
    /// Create an encoder with the given JPEG quality (clamped to 1..=100)
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            nv21: Vec::new(),
            rgb: Vec::new(),
            last_len: 0,
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode one frame
    ///
    /// Fails with `UnsupportedFrameFormat` when the frame is not a 3-plane
    /// 4:2:0 layout covering its declared size.
    pub fn encode(&mut self, frame: &RawFrame) -> Result<EncodedFrame> {
        frame.validate()?;

        self.fill_nv21(frame);
        self.fill_rgb(frame.width as usize, frame.height as usize);

        let mut out = Vec::with_capacity(self.last_len.max(4096));
        JpegEncoder::new_with_quality(&mut out, self.quality).encode(
            &self.rgb,
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )?;
        self.last_len = out.len();

        Ok(EncodedFrame {
            data: Bytes::from(out),
            width: frame.width,
            height: frame.height,
        })
    }

    /// The NV21 buffer produced by the most recent `encode`
    pub fn nv21(&self) -> &[u8] {
        &self.nv21
    }

    fn fill_nv21(&mut self, frame: &RawFrame) {
        let (w, h) = (frame.width as usize, frame.height as usize);
        let (cw, ch) = frame.chroma_size();

        self.nv21.resize(w * h + 2 * cw * ch, 0);
        let (luma, chroma) = self.nv21.split_at_mut(w * h);

        let y = &frame.planes[0];
        if y.row_stride == w && y.pixel_stride == 1 {
            luma.copy_from_slice(&y.data[..w * h]);
        } else if y.pixel_stride == 1 {
            for (row, dst) in luma.chunks_exact_mut(w).enumerate() {
                let start = row * y.row_stride;
                dst.copy_from_slice(&y.data[start..start + w]);
            }
        } else {
            for (row, dst) in luma.chunks_exact_mut(w).enumerate() {
                for (col, px) in dst.iter_mut().enumerate() {
                    *px = y.sample(row, col);
                }
            }
        }

        let (u, v) = (&frame.planes[1], &frame.planes[2]);
        for (row, dst) in chroma.chunks_exact_mut(2 * cw).enumerate() {
            for (col, pair) in dst.chunks_exact_mut(2).enumerate() {
                pair[0] = v.sample(row, col);
                pair[1] = u.sample(row, col);
            }
        }
    }

    fn fill_rgb(&mut self, width: usize, height: usize) {
        let cw = width.div_ceil(2);
        let (luma, chroma) = self.nv21.split_at(width * height);

        self.rgb.resize(width * height * 3, 0);
        for (row, dst) in self.rgb.chunks_exact_mut(width * 3).enumerate() {
            let chroma_row = &chroma[(row / 2) * cw * 2..];
            for (col, px) in dst.chunks_exact_mut(3).enumerate() {
                let c = (col / 2) * 2;
                px.copy_from_slice(&yuv_to_rgb(
                    luma[row * width + col],
                    chroma_row[c + 1],
                    chroma_row[c],
                ));
            }
        }
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

/// Full-range BT.601 (JFIF) in 16.16 fixed point
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as i32;
    let u = u as i32 - 128;
    let v = v as i32 - 128;

    let r = y + ((91_881 * v + 32_768) >> 16);
    let g = y - ((22_554 * u + 46_802 * v + 32_768) >> 16);
    let b = y + ((116_130 * u + 32_768) >> 16);

    [clamp(r), clamp(g), clamp(b)]
}

#[inline]
fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::frame::tests::solid_frame;
    use crate::codec::frame::{PixelFormat, Plane};
    use crate::error::Error;

    fn decode(frame: &EncodedFrame) -> image::RgbImage {
        image::load_from_memory_with_format(&frame.data, image::ImageFormat::Jpeg)
            .expect("valid JPEG")
            .to_rgb8()
    }

    /// A packed frame with a horizontal luma ramp and varying chroma
    fn gradient_planes(width: usize, height: usize) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));
        let y = (0..width * height)
            .map(|i| ((i % width) * 255 / width.max(1)) as u8)
            .collect();
        let u = (0..cw * ch).map(|i| (64 + i * 3 % 128) as u8).collect();
        let v = (0..cw * ch).map(|i| (192 - i * 5 % 128) as u8).collect();
        (y, u, v)
    }

    /// Copy a packed plane into a padded buffer with the given strides
    fn spread(
        packed: &[u8],
        cols: usize,
        rows: usize,
        row_stride: usize,
        pixel_stride: usize,
    ) -> Vec<u8> {
        let mut out = vec![0xEE; rows * row_stride];
        for row in 0..rows {
            for col in 0..cols {
                out[row * row_stride + col * pixel_stride] = packed[row * cols + col];
            }
        }
        out
    }

    #[test]
    fn test_yuv_to_rgb_reference_colors() {
        assert_eq!(yuv_to_rgb(128, 128, 128), [128, 128, 128]);
        assert_eq!(yuv_to_rgb(0, 128, 128), [0, 0, 0]);
        assert_eq!(yuv_to_rgb(255, 128, 128), [255, 255, 255]);

        let [r, g, b] = yuv_to_rgb(76, 85, 255);
        assert!(r >= 250 && g <= 4 && b <= 4, "got {r},{g},{b}");
    }

    #[test]
    fn test_nv21_places_v_before_u() {
        let frame = RawFrame::yuv420(
            4,
            2,
            Plane::packed(vec![1, 2, 3, 4, 5, 6, 7, 8], 4),
            Plane::packed(vec![0x11, 0x12], 2),
            Plane::packed(vec![0x21, 0x22], 2),
        );
        let mut encoder = FrameEncoder::default();
        encoder.encode(&frame).unwrap();

        assert_eq!(
            encoder.nv21(),
            &[1, 2, 3, 4, 5, 6, 7, 8, 0x21, 0x11, 0x22, 0x12]
        );
    }

    #[test]
    fn test_encode_dimensions() {
        let mut encoder = FrameEncoder::default();
        let encoded = encoder.encode(&solid_frame(64, 48, 128, 128, 128)).unwrap();

        assert_eq!(&encoded.data[..2], &[0xFF, 0xD8]);
        assert_eq!(encoded.width, 64);
        assert_eq!(encoded.height, 48);

        let decoded = decode(&encoded);
        assert_eq!(decoded.dimensions(), (64, 48));
    }

    #[test]
    fn test_encode_odd_dimensions() {
        let mut encoder = FrameEncoder::default();
        let encoded = encoder.encode(&solid_frame(15, 9, 90, 128, 128)).unwrap();

        assert_eq!(decode(&encoded).dimensions(), (15, 9));
    }

    #[test]
    fn test_known_color_is_not_swapped() {
        // Y=76, U=85, V=255 is pure red; swapping U and V gives blue
        let mut encoder = FrameEncoder::new(95);
        let decoded = decode(&encoder.encode(&solid_frame(16, 16, 76, 85, 255)).unwrap());

        let [r, g, b] = decoded.get_pixel(8, 8).0;
        assert!(r > 200, "red channel too low: {r},{g},{b}");
        assert!(g < 60, "green channel too high: {r},{g},{b}");
        assert!(b < 60, "blue channel too high: {r},{g},{b}");
    }

    #[test]
    fn test_padded_strides_match_packed() {
        let (w, h) = (20usize, 10usize);
        let (cw, ch) = (w / 2, h / 2);
        let (y, u, v) = gradient_planes(w, h);

        let packed = RawFrame::yuv420(
            w as u32,
            h as u32,
            Plane::packed(y.clone(), w),
            Plane::packed(u.clone(), cw),
            Plane::packed(v.clone(), cw),
        );
        let padded = RawFrame::yuv420(
            w as u32,
            h as u32,
            Plane::new(spread(&y, w, h, 32, 1), 32, 1),
            Plane::new(spread(&u, cw, ch, 24, 2), 24, 2),
            Plane::new(spread(&v, cw, ch, 24, 2), 24, 2),
        );

        let mut encoder = FrameEncoder::default();
        let a = encoder.encode(&packed).unwrap();
        let packed_nv21 = encoder.nv21().to_vec();
        let b = encoder.encode(&padded).unwrap();

        assert_eq!(packed_nv21, encoder.nv21());
        assert_eq!(a.data, b.data);
        assert_eq!(decode(&a), decode(&b));
    }

    #[test]
    fn test_luma_pixel_stride() {
        let (w, h) = (6usize, 4usize);
        let (y, u, v) = gradient_planes(w, h);

        let packed = RawFrame::yuv420(
            w as u32,
            h as u32,
            Plane::packed(y.clone(), w),
            Plane::packed(u.clone(), 3),
            Plane::packed(v.clone(), 3),
        );
        let strided = RawFrame::yuv420(
            w as u32,
            h as u32,
            Plane::new(spread(&y, w, h, 12, 2), 12, 2),
            Plane::packed(u, 3),
            Plane::packed(v, 3),
        );

        let mut a = FrameEncoder::default();
        let mut b = FrameEncoder::default();
        assert_eq!(
            a.encode(&packed).unwrap().data,
            b.encode(&strided).unwrap().data
        );
    }

    #[test]
    fn test_buffer_reuse_across_sizes() {
        let big = solid_frame(32, 32, 50, 100, 150);
        let small = solid_frame(8, 8, 200, 60, 90);

        let mut fresh = FrameEncoder::default();
        let expected = fresh.encode(&big).unwrap();

        let mut reused = FrameEncoder::default();
        reused.encode(&big).unwrap();
        reused.encode(&small).unwrap();
        let again = reused.encode(&big).unwrap();

        assert_eq!(expected.data, again.data);
    }

    #[test]
    fn test_unsupported_format_is_error() {
        let mut frame = solid_frame(8, 8, 0, 0, 0);
        frame.format = PixelFormat::Other(0x23);

        let mut encoder = FrameEncoder::default();
        assert!(matches!(
            encoder.encode(&frame),
            Err(Error::UnsupportedFrameFormat(_))
        ));

        // Encoder remains usable
        assert!(encoder.encode(&solid_frame(8, 8, 0, 128, 128)).is_ok());
    }

    #[test]
    fn test_quality_clamped() {
        assert_eq!(FrameEncoder::new(0).quality(), 1);
        assert_eq!(FrameEncoder::new(250).quality(), 100);
    }
}

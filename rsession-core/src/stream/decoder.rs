//! Frame decoder: wire payload → displayable RGBA8 image.

use std::io::Cursor;

use image::{ImageFormat, ImageReader, Limits};

use crate::error::SessionError;
use crate::stream::types::{DecodedFrame, EncodedFrame, FrameCodec, PixelFormat};

/// Largest image a peer may announce, in pixels.
pub const MAX_FRAME_PIXELS: u64 = 8192 * 8192;

/// Stateless; every frame is a complete image.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a payload straight off `rs.framebuffer`.
    pub fn decode_payload(&self, payload: &[u8]) -> Result<DecodedFrame, SessionError> {
        let frame = EncodedFrame::from_bytes(payload)?;
        self.decode(&frame)
    }

    /// Output never grows past the size the frame header announces.
    pub fn decode(&self, frame: &EncodedFrame) -> Result<DecodedFrame, SessionError> {
        let pixels = u64::from(frame.width) * u64::from(frame.height);
        if pixels == 0 || pixels > MAX_FRAME_PIXELS {
            return Err(SessionError::Decode(format!(
                "frame size {}x{} out of range",
                frame.width, frame.height
            )));
        }

        let rgba = match frame.codec {
            FrameCodec::Jpeg => {
                let mut limits = Limits::default();
                limits.max_image_width = Some(frame.width);
                limits.max_image_height = Some(frame.height);
                let mut reader =
                    ImageReader::with_format(Cursor::new(&frame.data), ImageFormat::Jpeg);
                reader.limits(limits);
                let img = reader
                    .decode()
                    .map_err(|e| SessionError::Decode(format!("jpeg: {e}")))?;
                if img.width() != frame.width || img.height() != frame.height {
                    return Err(SessionError::Decode(format!(
                        "jpeg is {}x{}, header says {}x{}",
                        img.width(),
                        img.height(),
                        frame.width,
                        frame.height
                    )));
                }
                img.to_rgba8().into_raw()
            }
            FrameCodec::Zstd => {
                // Bounded by the MAX_FRAME_PIXELS check above.
                let expected = pixels as usize * frame.format.bytes_per_pixel();
                let packed = zstd::bulk::decompress(&frame.data, expected)
                    .map_err(|e| SessionError::Decode(format!("zstd: {e}")))?;
                to_rgba(&packed, frame.width, frame.height, frame.format)?
            }
        };

        Ok(DecodedFrame {
            index: frame.index,
            width: frame.width,
            height: frame.height,
            source_width: frame.source_width,
            source_height: frame.source_height,
            rgba,
        })
    }
}

fn to_rgba(
    packed: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>, SessionError> {
    let bpp = format.bytes_per_pixel();
    let expected = width as usize * height as usize * bpp;
    if packed.len() != expected {
        return Err(SessionError::Decode(format!(
            "pixel data is {} bytes, expected {expected}",
            packed.len()
        )));
    }

    let mut out = Vec::with_capacity(width as usize * height as usize * 4);
    for px in packed.chunks_exact(bpp) {
        match format {
            PixelFormat::Rgb8 => out.extend_from_slice(&[px[0], px[1], px[2], 255]),
            PixelFormat::Rgba8 => out.extend_from_slice(px),
            PixelFormat::Bgra8 => out.extend_from_slice(&[px[2], px[1], px[0], px[3]]),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::encoder::{FrameEncoder, JpegFrameEncoder, QualityStep, ZstdFrameEncoder};
    use crate::stream::types::RawFrame;

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> RawFrame {
        let data = (0..w * h).flat_map(|_| rgb).collect();
        RawFrame::packed(w, h, PixelFormat::Rgb8, data)
    }

    #[test]
    fn zstd_frame_decodes_to_exact_rgba() {
        let raw = solid(8, 4, [10, 20, 30]);
        let frame = ZstdFrameEncoder
            .encode(&raw, QualityStep::new(90, 1))
            .unwrap()
            .into_frame(3, 0, &raw);
        let bytes = frame.to_bytes().unwrap();

        let decoded = FrameDecoder::new().decode_payload(&bytes).unwrap();
        assert_eq!(decoded.index, 3);
        assert_eq!(decoded.rgba.len(), 8 * 4 * 4);
        assert_eq!(&decoded.rgba[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn jpeg_frame_decodes_to_requested_size() {
        let raw = solid(32, 16, [200, 100, 50]);
        let frame = JpegFrameEncoder
            .encode(&raw, QualityStep::new(90, 2))
            .unwrap()
            .into_frame(0, 0, &raw);
        let decoded = FrameDecoder::new().decode(&frame).unwrap();
        assert_eq!((decoded.width, decoded.height), (16, 8));
        assert_eq!((decoded.source_width, decoded.source_height), (32, 16));
        // Lossy, but a flat colour survives closely.
        assert!(decoded.rgba[0].abs_diff(200) < 8);
    }

    #[test]
    fn corrupt_payload_is_a_decode_error() {
        let err = FrameDecoder::new().decode_payload(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, SessionError::Decode(_)));

        let raw = solid(4, 4, [0, 0, 0]);
        let mut frame = ZstdFrameEncoder
            .encode(&raw, QualityStep::new(90, 1))
            .unwrap()
            .into_frame(0, 0, &raw);
        frame.width = 5;
        assert!(FrameDecoder::new().decode(&frame).is_err());
    }

    #[test]
    fn zstd_body_larger_than_header_is_rejected() {
        let inflated = vec![0u8; 16 * 1024 * 1024];
        let data = zstd::encode_all(inflated.as_slice(), 3).unwrap();
        let frame = EncodedFrame {
            index: 0,
            capture_us: 0,
            source_width: 1,
            source_height: 1,
            width: 1,
            height: 1,
            format: PixelFormat::Rgba8,
            codec: FrameCodec::Zstd,
            quality: 100,
            data,
        };
        let err = FrameDecoder::new().decode(&frame).unwrap_err();
        assert!(matches!(err, SessionError::Decode(ref msg) if msg.starts_with("zstd")), "{err}");
    }

    #[test]
    fn oversized_header_is_rejected_before_decoding() {
        let raw = solid(4, 4, [0, 0, 0]);
        let mut frame = ZstdFrameEncoder
            .encode(&raw, QualityStep::new(90, 1))
            .unwrap()
            .into_frame(0, 0, &raw);
        frame.width = 100_000;
        frame.height = 100_000;
        let err = FrameDecoder::new().decode(&frame).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");

        frame.width = 0;
        assert!(FrameDecoder::new().decode(&frame).is_err());
    }

    #[test]
    fn jpeg_larger_than_header_is_rejected() {
        let raw = solid(32, 16, [200, 100, 50]);
        let mut frame = JpegFrameEncoder
            .encode(&raw, QualityStep::new(90, 1))
            .unwrap()
            .into_frame(0, 0, &raw);
        frame.width = 8;
        frame.height = 8;
        assert!(FrameDecoder::new().decode(&frame).is_err());
    }
}

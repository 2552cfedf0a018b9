//! Still-image frame encoders.
//!
//! Quality and resolution are chosen by the scheduler and passed in on
//! every call as a [`QualityStep`]; encoders keep no per-stream state,
//! so the same input and step always produce the same bytes.

use std::io::Cursor;
use std::sync::Arc;

use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;

use crate::error::SessionError;
use crate::flags::Capabilities;
use crate::stream::types::{EncodedFrame, FrameCodec, PixelFormat, RawFrame};

// ── QualityStep ──────────────────────────────────────────────────

/// One rung of the quality ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QualityStep {
    /// Codec quality, 1..=100.
    pub quality: u8,
    /// Keep every `downscale`-th pixel in each direction (1 = full size).
    pub downscale: u32,
}

impl QualityStep {
    pub const fn new(quality: u8, downscale: u32) -> Self {
        Self { quality, downscale }
    }
}

/// Best first, worst last.
pub fn default_ladder() -> Vec<QualityStep> {
    vec![
        QualityStep::new(95, 1),
        QualityStep::new(80, 1),
        QualityStep::new(65, 1),
        QualityStep::new(50, 1),
        QualityStep::new(50, 2),
        QualityStep::new(35, 2),
        QualityStep::new(25, 4),
    ]
}

/// Index of the full-resolution rung whose quality is closest to `quality`.
pub fn closest_step(ladder: &[QualityStep], quality: u8) -> usize {
    ladder
        .iter()
        .enumerate()
        .min_by_key(|(_, step)| (step.downscale, step.quality.abs_diff(quality)))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

// ── EncodedImage ─────────────────────────────────────────────────

/// Encoder output before it is stamped with stream metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub codec: FrameCodec,
    pub quality: u8,
    pub data: Vec<u8>,
}

impl EncodedImage {
    pub fn into_frame(self, index: u64, capture_us: u64, source: &RawFrame) -> EncodedFrame {
        EncodedFrame {
            index,
            capture_us,
            source_width: source.width,
            source_height: source.height,
            width: self.width,
            height: self.height,
            format: self.format,
            codec: self.codec,
            quality: self.quality,
            data: self.data,
        }
    }
}

// ── FrameEncoder ─────────────────────────────────────────────────

pub trait FrameEncoder: Send + Sync {
    fn codec(&self) -> FrameCodec;

    /// Compress `frame` at `target`. Fails only on malformed input.
    fn encode(&self, frame: &RawFrame, target: QualityStep) -> Result<EncodedImage, SessionError>;
}

/// Pick the encoder for a negotiated capability set: JPEG when both
/// sides support it, zstd otherwise.
pub fn encoder_for(capabilities: Capabilities) -> Arc<dyn FrameEncoder> {
    if capabilities.contains(Capabilities::JPEG) {
        Arc::new(JpegFrameEncoder)
    } else {
        Arc::new(ZstdFrameEncoder)
    }
}

/// Lossy JPEG via the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegFrameEncoder;

impl FrameEncoder for JpegFrameEncoder {
    fn codec(&self) -> FrameCodec {
        FrameCodec::Jpeg
    }

    fn encode(&self, frame: &RawFrame, target: QualityStep) -> Result<EncodedImage, SessionError> {
        frame.validate()?;
        let quality = target.quality.clamp(1, 100);
        let (width, height, rgb) = frame.to_rgb8(target.downscale);

        let mut out = Cursor::new(Vec::with_capacity(rgb.len() / 8));
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode(&rgb, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| SessionError::Encode(format!("jpeg: {e}")))?;

        Ok(EncodedImage {
            width,
            height,
            format: PixelFormat::Rgb8,
            codec: FrameCodec::Jpeg,
            quality,
            data: out.into_inner(),
        })
    }
}

/// Lossless zstd over packed RGB8. Quality trades speed for size.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdFrameEncoder;

impl ZstdFrameEncoder {
    /// High quality favours speed (level 1); low quality compresses harder.
    pub fn level_for(quality: u8) -> i32 {
        let q = quality.clamp(1, 100) as i32;
        1 + (100 - q) * 8 / 100
    }
}

impl FrameEncoder for ZstdFrameEncoder {
    fn codec(&self) -> FrameCodec {
        FrameCodec::Zstd
    }

    fn encode(&self, frame: &RawFrame, target: QualityStep) -> Result<EncodedImage, SessionError> {
        frame.validate()?;
        let quality = target.quality.clamp(1, 100);
        let (width, height, rgb) = frame.to_rgb8(target.downscale);
        let data = zstd::encode_all(rgb.as_slice(), Self::level_for(quality))
            .map_err(|e| SessionError::Encode(format!("zstd: {e}")))?;

        Ok(EncodedImage {
            width,
            height,
            format: PixelFormat::Rgb8,
            codec: FrameCodec::Zstd,
            quality,
            data,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> RawFrame {
        let mut data = Vec::with_capacity((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                let (r, g, b) = ((x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8);
                data.extend_from_slice(&[r, g, b, 255]);
            }
        }
        RawFrame::packed(w, h, PixelFormat::Bgra8, data)
    }

    #[test]
    fn jpeg_1080p_is_smaller_than_raw() {
        let frame = gradient(1920, 1080);
        let image = JpegFrameEncoder.encode(&frame, QualityStep::new(80, 1)).unwrap();
        assert!(!image.data.is_empty());
        assert!(image.data.len() < frame.byte_len());
        assert_eq!((image.width, image.height), (1920, 1080));
    }

    #[test]
    fn empty_capture_is_an_encode_error() {
        let empty = RawFrame::packed(0, 0, PixelFormat::Bgra8, Vec::new());
        for encoder in [&JpegFrameEncoder as &dyn FrameEncoder, &ZstdFrameEncoder] {
            assert!(matches!(
                encoder.encode(&empty, QualityStep::new(80, 1)),
                Err(SessionError::Encode(_))
            ));
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        let frame = gradient(64, 48);
        let a = JpegFrameEncoder.encode(&frame, QualityStep::new(60, 1)).unwrap();
        let b = JpegFrameEncoder.encode(&frame, QualityStep::new(60, 1)).unwrap();
        assert_eq!(a, b);
        let a = ZstdFrameEncoder.encode(&frame, QualityStep::new(60, 2)).unwrap();
        let b = ZstdFrameEncoder.encode(&frame, QualityStep::new(60, 2)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn downscale_shrinks_output_resolution() {
        let frame = gradient(64, 48);
        let image = ZstdFrameEncoder.encode(&frame, QualityStep::new(50, 4)).unwrap();
        assert_eq!((image.width, image.height), (16, 12));
    }

    #[test]
    fn closest_step_prefers_full_resolution() {
        let ladder = default_ladder();
        assert_eq!(ladder[closest_step(&ladder, 80)], QualityStep::new(80, 1));
        assert_eq!(ladder[closest_step(&ladder, 100)], QualityStep::new(95, 1));
        assert_eq!(ladder[closest_step(&ladder, 1)].downscale, 1);
    }

    #[test]
    fn codec_choice_follows_capabilities() {
        assert_eq!(encoder_for(Capabilities::default()).codec(), FrameCodec::Jpeg);
        assert_eq!(encoder_for(Capabilities::ZSTD).codec(), FrameCodec::Zstd);
    }

    #[test]
    fn zstd_levels_span_fast_to_small() {
        assert_eq!(ZstdFrameEncoder::level_for(100), 1);
        assert!(ZstdFrameEncoder::level_for(10) > ZstdFrameEncoder::level_for(90));
    }
}

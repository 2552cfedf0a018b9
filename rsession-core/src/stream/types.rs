//! Shared types for the capture → display pipeline.
//!
//! [`RawFrame`] is the in-process capture handed over by the rendering
//! collaborator. [`EncodedFrame`] is the serialisable payload carried on
//! `rs.framebuffer`.

use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of raw captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha (typical GPU readback).
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// An uncompressed framebuffer capture.
///
/// `data` holds `height` rows of `stride` bytes. `stride` may exceed
/// `width * bytes_per_pixel` when the producer pads rows.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Row pitch in bytes.
    pub stride: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    /// Monotonic capture time.
    pub timestamp: Instant,
}

impl RawFrame {
    /// A tightly packed frame (`stride = width * bpp`).
    pub fn packed(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: width * format.bytes_per_pixel() as u32,
            format,
            data,
            timestamp: Instant::now(),
        }
    }

    /// Bytes the bitmap is expected to occupy.
    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    /// Reject empty or inconsistent captures before any encoder sees them.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.width == 0 || self.height == 0 {
            return Err(SessionError::Encode(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }
        if self.data.is_empty() {
            return Err(SessionError::Encode("empty pixel buffer".into()));
        }
        let row = self.width as usize * self.format.bytes_per_pixel();
        if (self.stride as usize) < row {
            return Err(SessionError::Encode(format!(
                "stride {} shorter than row of {row} bytes",
                self.stride
            )));
        }
        if self.data.len() < self.byte_len() {
            return Err(SessionError::Encode(format!(
                "pixel buffer is {} bytes, expected {}",
                self.data.len(),
                self.byte_len()
            )));
        }
        Ok(())
    }

    /// Row `y` without padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride as usize;
        let len = self.width as usize * self.format.bytes_per_pixel();
        &self.data[start..start + len]
    }

    /// Tightly packed RGB8 copy, sampling every `step`-th pixel in both
    /// directions. Call only after [`validate`](Self::validate).
    pub fn to_rgb8(&self, step: u32) -> (u32, u32, Vec<u8>) {
        let step = step.max(1);
        let out_w = self.width.div_ceil(step);
        let out_h = self.height.div_ceil(step);
        let bpp = self.format.bytes_per_pixel();
        let mut out = Vec::with_capacity(out_w as usize * out_h as usize * 3);

        for y in (0..self.height).step_by(step as usize) {
            let row = self.row(y);
            for x in (0..self.width).step_by(step as usize) {
                let px = &row[x as usize * bpp..x as usize * bpp + bpp];
                match self.format {
                    PixelFormat::Bgra8 => out.extend_from_slice(&[px[2], px[1], px[0]]),
                    PixelFormat::Rgba8 | PixelFormat::Rgb8 => out.extend_from_slice(&px[..3]),
                }
            }
        }
        (out_w, out_h, out)
    }
}

// ── EncodedFrame ─────────────────────────────────────────────────

/// Still-image codec used for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameCodec {
    Jpeg,
    /// zstd over tightly packed pixels in `format`.
    Zstd,
}

/// A compressed frame as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedFrame {
    /// Monotonically increasing per stream; acks refer to it.
    pub index: u64,
    /// Capture time relative to the stream start.
    pub capture_us: u64,
    /// Resolution of the original capture.
    pub source_width: u32,
    pub source_height: u32,
    /// Resolution of the encoded image (after downscaling).
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub codec: FrameCodec,
    pub quality: u8,
    pub data: Vec<u8>,
}

impl EncodedFrame {
    pub fn to_bytes(&self) -> Result<Bytes, SessionError> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        bincode::deserialize(bytes).map_err(|e| SessionError::Decode(e.to_string()))
    }

    pub fn capture_offset(&self) -> Duration {
        Duration::from_micros(self.capture_us)
    }
}

// ── DecodedFrame ─────────────────────────────────────────────────

/// A displayable RGBA8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub source_width: u32,
    pub source_height: u32,
    /// Tightly packed RGBA8 rows.
    pub rgba: Vec<u8>,
}

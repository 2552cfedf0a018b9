//! Built-in frame source.
//!
//! Framebuffer capture belongs to the embedding application; this
//! source renders a moving test pattern so the host can run standalone.

use std::time::Instant;

use async_trait::async_trait;

use rsession_core::stream::{FrameSource, PixelFormat, RawFrame};
use rsession_core::SessionError;

/// Vertical gradient with a bar that advances one step per frame.
#[derive(Debug, Clone)]
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame: u64,
    /// Stop after this many frames; `None` runs forever.
    limit: Option<u64>,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            frame: 0,
            limit: None,
        }
    }

    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frame
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let bar_width = (w / 16).max(1);
        let bar = (self.frame as usize * bar_width / 2) % w;
        let mut data = Vec::with_capacity(w * h * 4);
        for y in 0..h {
            let shade = (y * 255 / h.max(1)) as u8;
            for x in 0..w {
                if x >= bar && x < bar + bar_width {
                    data.extend_from_slice(&[255, 255, 255, 255]);
                } else {
                    data.extend_from_slice(&[shade / 2, shade, 255 - shade, 255]);
                }
            }
        }
        data
    }
}

#[async_trait]
impl FrameSource for TestPatternSource {
    async fn capture(&mut self) -> Result<Option<RawFrame>, SessionError> {
        if self.limit.is_some_and(|limit| self.frame >= limit) {
            return Ok(None);
        }
        let mut raw = RawFrame::packed(self.width, self.height, PixelFormat::Bgra8, self.render());
        raw.timestamp = Instant::now();
        self.frame += 1;
        Ok(Some(raw))
    }
}

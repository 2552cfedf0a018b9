//! Headless display: keeps the last good frame and a status line.
//!
//! Stands in for the on-screen widget: whatever rendered last stays
//! available until a newer frame replaces it, and can be written out
//! as a PNG snapshot.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use image::{ImageFormat, RgbaImage};
use tokio::sync::watch;
use tracing::{debug, info};

use rsession_core::input::NormalizedPoint;
use rsession_core::stream::{DecodedFrame, DisplaySink};
use rsession_core::SessionError;

/// Connection status shown alongside the picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    Connecting,
    Connected,
    /// Link quiet or congested; the last frame is still shown.
    Degraded,
    Disconnected,
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisplayStatus::Connecting => "connecting",
            DisplayStatus::Connected => "connected",
            DisplayStatus::Degraded => "degraded",
            DisplayStatus::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Cloneable handle; all clones share the same surface.
#[derive(Clone)]
pub struct HeadlessDisplay {
    frame: Arc<watch::Sender<Option<Arc<DecodedFrame>>>>,
    status: Arc<watch::Sender<DisplayStatus>>,
    cursor: Arc<watch::Sender<Option<NormalizedPoint>>>,
}

impl Default for HeadlessDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        let (frame, _) = watch::channel(None);
        let (status, _) = watch::channel(DisplayStatus::Connecting);
        let (cursor, _) = watch::channel(None);
        Self {
            frame: Arc::new(frame),
            status: Arc::new(status),
            cursor: Arc::new(cursor),
        }
    }

    pub fn last_frame(&self) -> Option<Arc<DecodedFrame>> {
        self.frame.borrow().clone()
    }

    pub fn watch_frames(&self) -> watch::Receiver<Option<Arc<DecodedFrame>>> {
        self.frame.subscribe()
    }

    pub fn status(&self) -> DisplayStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<DisplayStatus> {
        self.status.subscribe()
    }

    pub fn set_status(&self, status: DisplayStatus) {
        let changed = self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
        if changed {
            info!(%status, "display status");
        }
    }

    /// Host cursor position, from feedback.
    pub fn cursor(&self) -> Option<NormalizedPoint> {
        *self.cursor.borrow()
    }

    pub fn set_cursor(&self, position: Option<NormalizedPoint>) {
        self.cursor.send_replace(position);
    }

    /// Write the last frame as PNG. `Ok(false)` if nothing was shown yet.
    pub fn write_snapshot(&self, path: &Path) -> Result<bool, SessionError> {
        let Some(frame) = self.last_frame() else {
            return Ok(false);
        };
        let image = RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
            .ok_or_else(|| SessionError::Decode("frame buffer does not match its size".into()))?;
        image
            .save_with_format(path, ImageFormat::Png)
            .map_err(|e| SessionError::Other(format!("snapshot {}: {e}", path.display())))?;
        info!(path = %path.display(), index = frame.index, "snapshot written");
        Ok(true)
    }
}

#[async_trait]
impl DisplaySink for HeadlessDisplay {
    async fn present(&mut self, frame: DecodedFrame) -> Result<(), SessionError> {
        let expected = frame.width as usize * frame.height as usize * 4;
        if frame.rgba.len() != expected {
            return Err(SessionError::Decode(format!(
                "frame buffer is {} bytes, expected {expected}",
                frame.rgba.len()
            )));
        }
        debug!(index = frame.index, width = frame.width, height = frame.height, "frame presented");
        self.frame.send_replace(Some(Arc::new(frame)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: u64, w: u32, h: u32) -> DecodedFrame {
        DecodedFrame {
            index,
            width: w,
            height: h,
            source_width: w,
            source_height: h,
            rgba: vec![200; (w * h * 4) as usize],
        }
    }

    #[tokio::test]
    async fn keeps_last_good_frame() {
        let mut display = HeadlessDisplay::new();
        display.present(frame(1, 4, 4)).await.unwrap();

        let mut bad = frame(2, 4, 4);
        bad.rgba.truncate(3);
        assert!(display.present(bad).await.is_err());
        assert_eq!(display.last_frame().unwrap().index, 1);
    }

    #[test]
    fn status_changes_are_published() {
        let display = HeadlessDisplay::new();
        let rx = display.watch_status();
        display.set_status(DisplayStatus::Connected);
        assert_eq!(*rx.borrow(), DisplayStatus::Connected);
        assert_eq!(display.clone().status(), DisplayStatus::Connected);
    }

    #[tokio::test]
    async fn snapshot_writes_png() {
        let mut display = HeadlessDisplay::new();
        let path =
            std::env::temp_dir().join(format!("rsession-snapshot-{}.png", std::process::id()));
        assert!(!display.write_snapshot(&path).unwrap());

        display.present(frame(7, 8, 6)).await.unwrap();
        assert!(display.write_snapshot(&path).unwrap());
        let written = image::open(&path).unwrap();
        assert_eq!((written.width(), written.height()), (8, 6));
        let _ = std::fs::remove_file(&path);
    }
}

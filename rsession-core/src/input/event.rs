//! Input event vocabulary carried on `rs.input`.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::flags::Capabilities;

// ── NormalizedPoint ──────────────────────────────────────────────

/// A position in 0..=1 of the source surface on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f32,
    pub y: f32,
}

impl NormalizedPoint {
    /// Clamped into range; NaN becomes 0.
    pub fn new(x: f32, y: f32) -> Self {
        let clamp = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        Self {
            x: clamp(x),
            y: clamp(y),
        }
    }

    /// From pixel coordinates on a `width` × `height` surface.
    pub fn from_pixels(px: f32, py: f32, width: u32, height: u32) -> Self {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        Self::new(px / w, py / h)
    }

    /// Onto a target rectangle `(left, top, width, height)`.
    pub fn to_pixels(self, rect: (i32, i32, u32, u32)) -> (i32, i32) {
        let (left, top, width, height) = rect;
        let x = left + (self.x * width.saturating_sub(1) as f32).round() as i32;
        let y = top + (self.y * height.saturating_sub(1) as f32).round() as i32;
        (x, y)
    }
}

// ── Kinds ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointerButton {
    None,
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputAction {
    Down,
    Up,
    Move,
}

/// Device stream an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Pointer,
    Key,
    Touch,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InputKind {
    Pointer {
        position: NormalizedPoint,
        button: PointerButton,
    },
    Touch {
        position: NormalizedPoint,
        /// Touch index; each finger is its own stream.
        finger: u8,
    },
    Key {
        /// Platform key code.
        code: u32,
        /// Character produced, if any.
        character: Option<char>,
        repeat: bool,
    },
}

// ── InputEvent ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    pub kind: InputKind,
    pub action: InputAction,
    /// Capture time on the originating side, in microseconds since
    /// capture started. Non-decreasing within one capture.
    pub origin_us: u64,
}

impl InputEvent {
    pub fn new(kind: InputKind, action: InputAction) -> Self {
        Self {
            kind,
            action,
            origin_us: 0,
        }
    }

    pub fn pointer(position: NormalizedPoint, button: PointerButton, action: InputAction) -> Self {
        Self::new(InputKind::Pointer { position, button }, action)
    }

    pub fn touch(position: NormalizedPoint, finger: u8, action: InputAction) -> Self {
        Self::new(InputKind::Touch { position, finger }, action)
    }

    pub fn key(code: u32, character: Option<char>, action: InputAction) -> Self {
        Self::new(
            InputKind::Key {
                code,
                character,
                repeat: false,
            },
            action,
        )
    }

    pub fn device(&self) -> DeviceKind {
        match self.kind {
            InputKind::Pointer { .. } => DeviceKind::Pointer,
            InputKind::Touch { .. } => DeviceKind::Touch,
            InputKind::Key { .. } => DeviceKind::Key,
        }
    }

    /// Flag the peer must have negotiated for this event to be applied.
    pub fn required_capability(&self) -> Capabilities {
        match self.device() {
            DeviceKind::Pointer => Capabilities::POINTER,
            DeviceKind::Touch => Capabilities::TOUCH,
            DeviceKind::Key => Capabilities::KEYBOARD,
        }
    }

    pub fn position(&self) -> Option<NormalizedPoint> {
        match self.kind {
            InputKind::Pointer { position, .. } | InputKind::Touch { position, .. } => {
                Some(position)
            }
            InputKind::Key { .. } => None,
        }
    }

    /// Keys have no `Move`.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.device() == DeviceKind::Key && self.action == InputAction::Move {
            return Err(SessionError::ProtocolViolation("key event with move action".into()));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SessionError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        let event: Self = bincode::deserialize(bytes)?;
        event.validate()?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_points_clamp() {
        let p = NormalizedPoint::new(-0.5, 1.5);
        assert_eq!((p.x, p.y), (0.0, 1.0));
        let p = NormalizedPoint::new(f32::NAN, 0.25);
        assert_eq!((p.x, p.y), (0.0, 0.25));
    }

    #[test]
    fn pixel_mapping_hits_rect_corners() {
        let rect = (100, 50, 801, 601);
        assert_eq!(NormalizedPoint::new(0.0, 0.0).to_pixels(rect), (100, 50));
        assert_eq!(NormalizedPoint::new(1.0, 1.0).to_pixels(rect), (900, 650));
        assert_eq!(NormalizedPoint::new(0.5, 0.5).to_pixels(rect), (500, 350));
    }

    #[test]
    fn from_pixels_normalizes_by_surface() {
        let p = NormalizedPoint::from_pixels(320.0, 240.0, 640, 480);
        assert_eq!((p.x, p.y), (0.5, 0.5));
    }

    #[test]
    fn capability_follows_device() {
        let tap = InputEvent::touch(NormalizedPoint::new(0.1, 0.1), 0, InputAction::Down);
        assert_eq!(tap.required_capability(), Capabilities::TOUCH);
        let key = InputEvent::key(13, Some('\r'), InputAction::Up);
        assert_eq!(key.required_capability(), Capabilities::KEYBOARD);
        assert!(key.position().is_none());
    }

    #[test]
    fn key_move_is_rejected_on_decode() {
        let bad = InputEvent::key(65, Some('a'), InputAction::Move);
        let bytes = bad.to_bytes().unwrap();
        assert!(InputEvent::from_bytes(&bytes).is_err());
    }
}

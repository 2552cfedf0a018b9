//! Input relay.
//!
//! ```text
//! VIEWER                                   HOST
//! InputFeed ─► InputCapture::capture()     ChannelReceiver (rs.input)
//!                ↓                           ↓
//!              InputSender ── rs.input ──► InputPlayback ─► InputInjector
//!
//! FeedbackReceiver ◄──── rs.feedback ──── FeedbackSender
//! ```

pub mod capture;
pub mod event;
pub mod feedback;
pub mod playback;

pub use capture::{InputCapture, InputFeed, InputSender};
pub use event::{DeviceKind, InputAction, InputEvent, InputKind, NormalizedPoint, PointerButton};
pub use feedback::{FeedbackEvent, FeedbackReceiver, FeedbackSender};
pub use playback::{InputInjector, InputPlayback, InputReplayConfig, PlaybackStats, ReplayTiming};

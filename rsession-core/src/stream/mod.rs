//! Framebuffer streaming.
//!
//! ```text
//! HOST                                            VIEWER
//! FrameSource::capture                            ChannelReceiver (latest)
//!   ↓  (gated by FrameScheduler)                    ↓
//! FrameEncoder (JPEG / zstd)                      FrameDecoder
//!   ↓                                               ↓
//! ChannelSender (rs.framebuffer) ──────────────►  DisplaySink::present
//!   ▲                                               ↓
//! ack queue ◄──────────── FrameAck (rs.control) ── ControlSender::ack_frame
//! ```
//!
//! | Module      | Purpose                                           |
//! |-------------|---------------------------------------------------|
//! | `types`     | Raw, encoded and decoded frame types              |
//! | `encoder`   | `FrameEncoder` trait, JPEG and zstd, quality ladder |
//! | `decoder`   | Wire payload → RGBA8                              |
//! | `latency`   | EWMA of ack round trips                           |
//! | `scheduler` | Ack pacing and quality adaptation                 |
//! | `streamer`  | Host capture loop                                 |
//! | `consumer`  | Viewer display loop                               |

pub mod consumer;
pub mod decoder;
pub mod encoder;
pub mod latency;
pub mod scheduler;
pub mod streamer;
pub mod types;

pub use consumer::{ConsumerStats, DisplaySink, FrameConsumer};
pub use decoder::FrameDecoder;
pub use encoder::{
    EncodedImage, FrameEncoder, JpegFrameEncoder, QualityStep, ZstdFrameEncoder, closest_step,
    default_ladder, encoder_for,
};
pub use latency::LatencyEstimator;
pub use scheduler::{
    Escalation, FrameScheduler, SchedulerConfig, SchedulerStats, SkipReason, TickDecision,
};
pub use streamer::{FrameSource, FrameStreamer, StreamEnd, StreamStats, StreamerConfig};
pub use types::{DecodedFrame, EncodedFrame, FrameCodec, PixelFormat, RawFrame};

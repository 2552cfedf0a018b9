//! Channel multiplexing over one physical link.
//!
//! ```text
//! ChannelSender ─┐
//! ChannelSender ─┼─► OutboundQueue ─► send loop ══ link ══► recv loop ─► Demultiplexer
//! ControlSender ─┘   (control first,  (MuxCodec)            (MuxCodec)        │
//!                     superseding)                          ChannelReceiver ◄─┤ (Ordered)
//!                                                           ChannelReceiver ◄─┤ (Latest)
//!                                                            control router ◄─┘
//! ```

pub mod channel;
pub mod inbound;
pub(crate) mod link;
pub mod outbound;
pub mod registry;

pub use channel::{ChannelReceiver, ChannelSender, ControlSender, SendOutcome};
pub use inbound::{DemuxStats, Demultiplexer, Dispatch};
pub use outbound::{Outbound, OutboundQueue, PushOutcome};
pub use registry::{ChannelRegistry, ChannelRole, ChannelSpec};

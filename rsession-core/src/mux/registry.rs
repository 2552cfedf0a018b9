//! Channel registration.
//!
//! Channels are declared up front and the registry is frozen when the
//! session starts; nothing registers a channel on a live link.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SessionError;
use crate::message::{
    CONTROL_CHANNEL, DeliveryMode, FEEDBACK_CHANNEL, FRAMEBUFFER_CHANNEL, INPUT_CHANNEL, Priority,
    validate_channel_name,
};

/// Which way traffic flows on a channel, from this peer's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    Send,
    Receive,
    Both,
}

impl ChannelRole {
    pub fn sends(self) -> bool {
        matches!(self, Self::Send | Self::Both)
    }

    pub fn receives(self) -> bool {
        matches!(self, Self::Receive | Self::Both)
    }
}

/// Declaration of one logical channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: Arc<str>,
    pub mode: DeliveryMode,
    pub priority: Priority,
    pub role: ChannelRole,
}

impl ChannelSpec {
    pub fn new(name: &str, mode: DeliveryMode, role: ChannelRole) -> Self {
        Self {
            name: Arc::from(name),
            mode,
            priority: Priority::Data,
            role,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// The set of channels one side of a session uses.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: HashMap<Arc<str>, ChannelSpec>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel. Names must be unique and `rs.control` is reserved.
    pub fn register(&mut self, spec: ChannelSpec) -> Result<&mut Self, SessionError> {
        validate_channel_name(&spec.name)?;
        if &*spec.name == CONTROL_CHANNEL {
            return Err(SessionError::ProtocolViolation(format!(
                "{CONTROL_CHANNEL} is reserved"
            )));
        }
        if self.channels.contains_key(&spec.name) {
            return Err(SessionError::ProtocolViolation(format!(
                "channel {} registered twice",
                spec.name
            )));
        }
        self.channels.insert(Arc::clone(&spec.name), spec);
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&ChannelSpec> {
        self.channels.get(name)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.channels.values()
    }

    /// Host side: sends frames and feedback, receives input.
    pub fn host_defaults() -> Self {
        let mut reg = Self::new();
        reg.channels = default_specs(ChannelRole::Send, ChannelRole::Receive);
        reg
    }

    /// Viewer side: the mirror image of [`host_defaults`](Self::host_defaults).
    pub fn viewer_defaults() -> Self {
        let mut reg = Self::new();
        reg.channels = default_specs(ChannelRole::Receive, ChannelRole::Send);
        reg
    }
}

fn default_specs(outbound: ChannelRole, inbound: ChannelRole) -> HashMap<Arc<str>, ChannelSpec> {
    [
        ChannelSpec::new(FRAMEBUFFER_CHANNEL, DeliveryMode::BestEffortLatest, outbound),
        ChannelSpec::new(FEEDBACK_CHANNEL, DeliveryMode::ReliableOrdered, outbound),
        ChannelSpec::new(INPUT_CHANNEL, DeliveryMode::ReliableOrdered, inbound),
    ]
    .into_iter()
    .map(|spec| (Arc::clone(&spec.name), spec))
    .collect()
}

//! Capability flags advertised during the handshake.

use bitflags::bitflags;

bitflags! {
    /// Named booleans each peer advertises in the capabilities step.
    ///
    /// The negotiated set is the intersection of both peers' flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Accepts pointer (mouse) input.
        const POINTER  = 1 << 0;
        /// Accepts keyboard input.
        const KEYBOARD = 1 << 1;
        /// Accepts touch input.
        const TOUCH    = 1 << 2;
        /// Can carry audio (advertised only; no audio channel yet).
        const AUDIO    = 1 << 3;
        /// Sends or accepts cursor / haptic feedback.
        const FEEDBACK = 1 << 4;
        /// Can encode or decode JPEG frames.
        const JPEG     = 1 << 5;
        /// Can encode or decode zstd frames.
        const ZSTD     = 1 << 6;
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::POINTER
            | Capabilities::KEYBOARD
            | Capabilities::TOUCH
            | Capabilities::FEEDBACK
            | Capabilities::JPEG
            | Capabilities::ZSTD
    }
}

impl Capabilities {
    /// Intersect with the peer's advertised flags.
    pub fn negotiate(self, remote: Self) -> Self {
        self & remote
    }

    /// Rebuild from wire bits, ignoring flags this build doesn't know.
    pub fn from_wire(bits: u32) -> Self {
        Self::from_bits_truncate(bits)
    }
}

//! # rsession-host — Remote Session Host
//!
//! Accepts one viewer at a time, streams frames from a capture source
//! over `rs.framebuffer` with ack pacing, and injects the input the
//! viewer relays on `rs.input` into the target window.
//!
//! The real framebuffer capture and OS injection belong to the
//! embedding application; [`source::TestPatternSource`] and
//! [`injector::WindowInjector`] let the host run standalone.

pub mod config;
pub mod injector;
pub mod service;
pub mod source;

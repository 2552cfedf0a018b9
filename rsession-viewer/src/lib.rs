//! # rsession-viewer — Remote Session Viewer
//!
//! Connects to a session host, renders the framebuffer stream into a
//! headless display that keeps the last good frame, and relays input
//! from a line-oriented controller. Reconnects with a fixed retry
//! cadence when the session drops.

pub mod client;
pub mod config;
pub mod connection;
pub mod controller;
pub mod display;

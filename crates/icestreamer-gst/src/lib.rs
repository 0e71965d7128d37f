//! IceStreamer GStreamer - the production media engine.
//!
//! This crate maps the [`MediaEngine`](icestreamer_engine::MediaEngine)
//! operations onto GStreamer elements and pads and forwards pipeline bus
//! messages to the event loop.

pub mod bus;
pub mod engine;

pub use bus::BusMonitor;
pub use engine::GstEngine;

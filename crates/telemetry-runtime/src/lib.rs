//! Runtime layer for Live Telemetry.
//!
//! Drives a view's subscription lifecycle on a tokio task and, in publisher
//! mode, feeds the server with synthetic readings.

pub mod publisher;
pub mod subscription;

pub use telemetry_core as core;
pub use telemetry_transport as transport;

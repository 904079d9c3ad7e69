//! Transport layer for Live Telemetry.
//!
//! Sends one-shot operations over HTTP, runs continuous operations over a
//! `graphql-ws` WebSocket session, and routes each operation to the right one
//! based on its declared kind.

pub mod protocol;
pub mod request;
pub mod router;
pub mod stream;

pub use telemetry_core as core;

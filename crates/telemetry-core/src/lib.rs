//! Core types for Live Telemetry.
//!
//! Holds the data model shared by every other crate: operations and their
//! transport classification, telemetry data points, the bounded sliding
//! window, the error taxonomy, settings, and small time / formatting helpers.

pub mod classifier;
pub mod error;
pub mod formatting;
pub mod models;
pub mod operations;
pub mod settings;
pub mod time_utils;
pub mod window;

//! Push-to-talk capture controller
//!
//! Listens for a global key chord, records from the microphone while it is
//! held, and stops any capture that outlives the safety cutoff.

/// Audio capture session and backends
pub mod audio;
/// Configuration management
pub mod config;
/// Push-to-talk state machine
pub mod controller;
/// Global chord input
pub mod input;
/// macOS permission checks
pub mod permissions;
/// Logging setup
pub mod telemetry;
/// Safety cutoff timer
pub mod timer;

pub use controller::{CaptureState, ControllerEvent, PushToTalkController, StopReason};

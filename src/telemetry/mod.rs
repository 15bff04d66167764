//! # Telemetry Module
//!
//! Change-gated periodic publication of sensor values.
//!
//! This module handles:
//! - The registry of telemetry channels and their topics
//! - Comparing each value against the last one published
//! - Formatting payloads
//! - Per-channel self re-arming timers

pub mod channel;
pub mod detector;
pub mod payload;
pub mod scheduler;

pub use channel::{ChannelRegistry, TelemetryChannel};
pub use detector::ChangeDetector;
pub use payload::PublishIntent;
pub use scheduler::{PublishScheduler, SchedulerStats};

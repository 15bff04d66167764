//! # Sensor Bridge Library
//!
//! Publish environmental and motion sensor readings to an MQTT broker.
//!
//! Each telemetry channel re-arms its own timer and only publishes when its
//! value differs from the last one it published. Publishing starts when the
//! broker accepts the session and stops when the session is lost.

pub mod bridge;
pub mod config;
pub mod context;
pub mod error;
pub mod mqtt;
pub mod sensor;
pub mod telemetry;

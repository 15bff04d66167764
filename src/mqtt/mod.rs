//! # MQTT Module
//!
//! Broker-facing side of the bridge.
//!
//! This module handles:
//! - The transport seam timer firings publish through
//! - The connection lifecycle state machine
//! - The `rumqttc` session adapter

pub mod lifecycle;
pub mod session;
pub mod transport;

pub use lifecycle::{ConnectionLifecycle, ConnectionState, SessionSetup};
pub use session::{MqttTransport, SessionEvent, SessionOptions};
pub use transport::{ConnectionStatus, Transport};

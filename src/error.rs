//! # Error Types
//!
//! Custom error types for Sensor Bridge using `thiserror`.

use thiserror::Error;

use crate::mqtt::lifecycle::ConnectionState;

/// Main error type for Sensor Bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport refused a request before it reached the broker
    #[error("Transport error: {0}")]
    Transport(String),

    /// Broker refused or dropped the session before it was ever established
    #[error("Failed to connect to mqtt server: {0}")]
    ConnectionRejected(String),

    /// Broker session dropped after a successful connect
    #[error("MQTT connection lost")]
    ConnectionLost,

    /// Transport reported a status the lifecycle has no transition for
    #[error("Unexpected status: {0}")]
    UnexpectedStatus(String),

    /// A lifecycle operation was requested from the wrong state
    #[error("Invalid transition: cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: ConnectionState,
    },
}

impl BridgeError {
    /// Whether the error ends the broker session.
    ///
    /// Session errors are the ones a [`DisconnectPolicy`](crate::bridge::DisconnectPolicy)
    /// gets to decide about; everything else always terminates.
    pub fn is_session_loss(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionRejected(_)
                | BridgeError::ConnectionLost
                | BridgeError::UnexpectedStatus(_)
        )
    }
}

/// Result type alias for Sensor Bridge
pub type Result<T> = std::result::Result<T, BridgeError>;

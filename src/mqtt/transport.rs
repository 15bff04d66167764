//! Trait abstraction for broker operations to enable testing

use rumqttc::QoS;

use crate::error::Result;
use crate::telemetry::payload::PublishIntent;

/// Connection status reported by the transport's event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Broker accepted the session
    Accepted,
    /// Broker refused the session (return code description)
    Rejected(String),
    /// Session closed or the network dropped
    Disconnected,
    /// Anything else the transport surfaces
    Other(String),
}

/// Broker session operations used by the lifecycle and the scheduler.
///
/// Every call is fire-and-forget: `Ok` means the request was handed to the
/// session, not that the broker has it. Delivery completion is reported later
/// through the event loop.
pub trait Transport {
    /// Queue a publish
    fn publish(&mut self, intent: &PublishIntent) -> Result<()>;

    /// Queue a subscription
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()>;

    /// Queue an unsubscribe
    fn unsubscribe(&mut self, topic: &str) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn publish(&mut self, intent: &PublishIntent) -> Result<()> {
        (**self).publish(intent)
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()> {
        (**self).subscribe(topic, qos)
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        (**self).unsubscribe(topic)
    }
}

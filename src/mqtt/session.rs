//! # Broker Session
//!
//! `rumqttc` adapter: builds the session options, wraps the request handle as
//! a [`Transport`], and translates event-loop output into [`SessionEvent`]s.
//!
//! The request handle and the event loop are separate halves. The driving loop
//! polls the event loop; timer firings queue requests through the handle with
//! `try_*` calls, which never wait on the network.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Outgoing,
    Packet, QoS,
};
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::mqtt::transport::{ConnectionStatus, Transport};
use crate::telemetry::payload::{PublishIntent, PRESENCE_QOS};

/// Everything needed to open the broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub keep_alive: Duration,
    /// Resolved presence topic and the offline payload registered as last will
    pub last_will: Option<(String, String)>,
    pub request_capacity: usize,
}

impl SessionOptions {
    /// Translate into `rumqttc` options
    pub fn to_mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);

        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username, password);
        }

        if let Some((topic, message)) = &self.last_will {
            options.set_last_will(LastWill::new(topic, message.as_bytes().to_vec(), PRESENCE_QOS, true));
        }

        options
    }
}

/// Open a session: returns the request handle and the event loop to poll.
///
/// Nothing touches the network until the event loop is first polled.
pub fn open(options: &SessionOptions) -> (MqttTransport, EventLoop) {
    let (client, eventloop) = AsyncClient::new(options.to_mqtt_options(), options.request_capacity);
    debug!(
        "Session prepared for {} at {}:{}",
        options.client_id, options.host, options.port
    );
    (MqttTransport::new(client), eventloop)
}

/// [`Transport`] over a `rumqttc` request handle
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport").finish_non_exhaustive()
    }
}

impl MqttTransport {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

impl Transport for MqttTransport {
    fn publish(&mut self, intent: &PublishIntent) -> Result<()> {
        self.client
            .try_publish(
                intent.topic.as_str(),
                intent.qos,
                intent.retain,
                intent.payload.as_bytes().to_vec(),
            )
            .map_err(|e| BridgeError::Transport(format!("Failed to queue publish to {}: {}", intent.topic, e)))
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()> {
        self.client
            .try_subscribe(topic, qos)
            .map_err(|e| BridgeError::Transport(format!("Failed to queue subscribe to {}: {}", topic, e)))
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        self.client
            .try_unsubscribe(topic)
            .map_err(|e| BridgeError::Transport(format!("Failed to queue unsubscribe from {}: {}", topic, e)))
    }
}

/// What one event-loop poll meant for the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection status change for the lifecycle
    Status(ConnectionStatus),
    /// A publish left the client (packet id, 0 for QoS 0)
    PublishSent(u16),
    /// Broker acknowledged a QoS 1/2 publish
    PublishCompleted(u16),
    /// An unsubscribe request left the client (packet id)
    UnsubscribeSent(u16),
    /// Message received on a subscribed topic
    Message { topic: String, payload: String },
    /// Nothing the bridge acts on (pings, subscription acks, ...)
    Idle,
}

/// Translate the result of `EventLoop::poll`.
///
/// | Poll result | Status |
/// |-------------|--------|
/// | ConnAck success | `Accepted` |
/// | ConnAck refusal / `ConnectionRefused` | `Rejected` |
/// | Incoming `Disconnect`, I/O and protocol errors | `Disconnected` |
/// | Network or flush timeout | `Other` |
pub fn translate(polled: std::result::Result<Event, ConnectionError>) -> SessionEvent {
    match polled {
        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
            if ack.code == ConnectReturnCode::Success {
                SessionEvent::Status(ConnectionStatus::Accepted)
            } else {
                SessionEvent::Status(ConnectionStatus::Rejected(format!("{:?}", ack.code)))
            }
        }
        Ok(Event::Incoming(Packet::Disconnect)) => SessionEvent::Status(ConnectionStatus::Disconnected),
        Ok(Event::Incoming(Packet::PubAck(ack))) => SessionEvent::PublishCompleted(ack.pkid),
        Ok(Event::Incoming(Packet::PubComp(comp))) => SessionEvent::PublishCompleted(comp.pkid),
        Ok(Event::Incoming(Packet::Publish(publish))) => SessionEvent::Message {
            topic: publish.topic,
            payload: String::from_utf8_lossy(&publish.payload).into_owned(),
        },
        Ok(Event::Outgoing(Outgoing::Publish(pkid))) => SessionEvent::PublishSent(pkid),
        Ok(Event::Outgoing(Outgoing::Unsubscribe(pkid))) => SessionEvent::UnsubscribeSent(pkid),
        Ok(_) => SessionEvent::Idle,
        Err(ConnectionError::ConnectionRefused(code)) => {
            SessionEvent::Status(ConnectionStatus::Rejected(format!("{:?}", code)))
        }
        Err(e @ (ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout)) => {
            SessionEvent::Status(ConnectionStatus::Other(e.to_string()))
        }
        Err(e) => {
            warn!("Broker session error: {}", e);
            SessionEvent::Status(ConnectionStatus::Disconnected)
        }
    }
}

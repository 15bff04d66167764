//! # Connection Lifecycle
//!
//! State machine over the broker session.
//!
//! ```text
//! Disconnected --request_connect--> Connecting --Accepted--> Connected
//!                                       |                        |
//!                        Rejected / Disconnected           Disconnected
//!                                       v                        v
//!                                    Failed  <------------------+
//! ```
//!
//! Any status the table has no entry for also ends in `Failed`. `Failed` is
//! terminal: recovering means building a new lifecycle, which is the driving
//! loop's decision, not this module's.

use rumqttc::QoS;
use tracing::{error, info, warn};

use crate::context::{Clock, PublishContext};
use crate::error::{BridgeError, Result};
use crate::mqtt::transport::{ConnectionStatus, Transport};
use crate::sensor::SensorSource;
use crate::telemetry::payload::PublishIntent;
use crate::telemetry::scheduler::PublishScheduler;

/// State of the broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// What to do on the broker right after the session is accepted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSetup {
    /// Topics subscribed on every connect
    pub subscriptions: Vec<String>,
    /// QoS requested for the subscriptions
    pub subscribe_qos: Option<QoS>,
    /// Presence topic; when set, an online marker is published on connect
    pub will_topic: Option<String>,
}

/// Owns the [`ConnectionState`] and is the only thing that arms channel timers.
#[derive(Debug, Clone)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
    setup: SessionSetup,
}

impl ConnectionLifecycle {
    pub fn new(setup: SessionSetup) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            setup,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn setup(&self) -> &SessionSetup {
        &self.setup
    }

    /// Start connecting.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the lifecycle is `Disconnected`
    pub fn request_connect(&mut self) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(BridgeError::InvalidTransition {
                action: "connect",
                state: self.state,
            });
        }
        self.state = ConnectionState::Connecting;
        info!("Connecting to broker");
        Ok(())
    }

    /// Apply a status reported by the transport.
    ///
    /// # Errors
    ///
    /// - `ConnectionRejected`: rejected or dropped before the first accept
    /// - `ConnectionLost`: dropped after being connected
    /// - `UnexpectedStatus`: any status without a transition
    /// - `InvalidTransition`: status delivered while not connecting or connected
    ///
    /// Every error except `InvalidTransition` leaves the lifecycle `Failed` with
    /// all channel timers disarmed.
    pub fn handle_status<S, T, C>(
        &mut self,
        status: ConnectionStatus,
        scheduler: &mut PublishScheduler,
        ctx: &mut PublishContext<S, T, C>,
    ) -> Result<()>
    where
        S: SensorSource,
        T: Transport,
        C: Clock,
    {
        use ConnectionState::*;

        match (self.state, status) {
            (Connecting | Connected, ConnectionStatus::Accepted) => {
                self.enter_connected(scheduler, ctx);
                Ok(())
            }
            (Connecting, ConnectionStatus::Rejected(reason)) => {
                self.fail(scheduler, BridgeError::ConnectionRejected(reason))
            }
            (Connecting, ConnectionStatus::Disconnected) => self.fail(
                scheduler,
                BridgeError::ConnectionRejected("disconnected before the session was accepted".to_string()),
            ),
            (Connected, ConnectionStatus::Disconnected) => self.fail(scheduler, BridgeError::ConnectionLost),
            (Connected, ConnectionStatus::Rejected(reason)) | (Connecting | Connected, ConnectionStatus::Other(reason)) => {
                self.fail(scheduler, BridgeError::UnexpectedStatus(reason))
            }
            (state @ (Disconnected | Failed), _) => Err(BridgeError::InvalidTransition {
                action: "handle connection status",
                state,
            }),
        }
    }

    /// Drop the registered subscriptions ahead of a reset.
    ///
    /// Returns the number of unsubscribe requests the transport accepted. They
    /// are only queued; the session still has to be polled to send them.
    pub fn teardown<T: Transport>(&mut self, transport: &mut T) -> usize {
        if self.state != ConnectionState::Connected {
            return 0;
        }
        let mut queued = 0;
        for topic in &self.setup.subscriptions {
            match transport.unsubscribe(topic) {
                Ok(()) => queued += 1,
                Err(e) => warn!("Failed to unsubscribe from {}: {}", topic, e),
            }
        }
        queued
    }

    fn enter_connected<S, T, C>(&mut self, scheduler: &mut PublishScheduler, ctx: &mut PublishContext<S, T, C>)
    where
        S: SensorSource,
        T: Transport,
        C: Clock,
    {
        self.state = ConnectionState::Connected;
        info!("Connected to broker");

        let qos = self.setup.subscribe_qos.unwrap_or(QoS::AtLeastOnce);
        for topic in &self.setup.subscriptions {
            if let Err(e) = ctx.transport.subscribe(topic, qos) {
                warn!("Failed to subscribe to {}: {}", topic, e);
            }
        }

        if let Some(will_topic) = &self.setup.will_topic {
            let intent = PublishIntent::presence(will_topic.clone());
            if let Err(e) = ctx.transport.publish(&intent) {
                warn!("Failed to announce presence on {}: {}", will_topic, e);
            }
        }

        scheduler.arm_all(ctx.clock.now());
    }

    fn fail(&mut self, scheduler: &mut PublishScheduler, err: BridgeError) -> Result<()> {
        error!("{} (was {:?})", err, self.state);
        self.state = ConnectionState::Failed;
        scheduler.disarm_all();
        Err(err)
    }
}

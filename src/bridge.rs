//! # Bridge Driver
//!
//! The single driving loop. Each iteration first runs every channel timer
//! that is due, then waits for exactly one of:
//!
//! - a reset request,
//! - the next broker session event,
//! - the earliest channel deadline (capped by the poll ceiling).
//!
//! Handlers run to completion before the loop waits again, so channel state
//! and connection state are only ever touched from here.
//!
//! Session loss comes back from the lifecycle as a typed error and the
//! [`DisconnectPolicy`] decides what happens next.
//!
//! On reset the loop queues unsubscribes and keeps polling the session until
//! they have been sent, for at most one poll ceiling.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rumqttc::EventLoop;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::LifecycleConfig;
use crate::context::{Clock, PublishContext};
use crate::error::Result;
use crate::mqtt::lifecycle::{ConnectionLifecycle, ConnectionState, SessionSetup};
use crate::mqtt::session::{translate, SessionEvent};
use crate::mqtt::transport::{ConnectionStatus, Transport};
use crate::sensor::SensorSource;
use crate::telemetry::scheduler::PublishScheduler;

/// Number of publishes between status log messages
const LOG_INTERVAL_PUBLISHES: u64 = 100;

/// What to do when the broker session is lost
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisconnectPolicy {
    /// Stop the bridge and report the error
    #[default]
    Terminate,
    /// Start a fresh session after an exponentially growing delay
    Retry { initial: Duration, max: Duration },
}

impl DisconnectPolicy {
    pub fn from_config(config: &LifecycleConfig) -> Self {
        match config.on_disconnect.as_str() {
            "retry" => DisconnectPolicy::Retry {
                initial: Duration::from_millis(config.retry_initial_ms),
                max: Duration::from_millis(config.retry_max_ms),
            },
            _ => DisconnectPolicy::Terminate,
        }
    }

    /// Delay before the given retry attempt (0-based), `None` to give up
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        match *self {
            DisconnectPolicy::Terminate => None,
            DisconnectPolicy::Retry { initial, max } => {
                let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
                Some(initial.saturating_mul(factor).min(max))
            }
        }
    }
}

/// Why the loop stopped without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Reset,
}

/// Sending half of the reset signal
#[derive(Debug, Clone)]
pub struct ResetTrigger {
    tx: mpsc::UnboundedSender<()>,
}

impl ResetTrigger {
    /// Ask the loop to stop at its next wait
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

/// Receiving half of the reset signal, polled by the driving loop
#[derive(Debug)]
pub struct ResetSignal {
    rx: mpsc::UnboundedReceiver<()>,
}

impl ResetSignal {
    /// Resolves once a reset is triggered; never resolves if every trigger is gone
    pub async fn triggered(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

/// Create a connected reset trigger/signal pair
pub fn reset_channel() -> (ResetTrigger, ResetSignal) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ResetTrigger { tx }, ResetSignal { rx })
}

/// Source of broker session events for the loop
#[async_trait]
pub trait SessionPoller: Send {
    /// Wait for the next session event
    async fn next_event(&mut self) -> SessionEvent;
}

#[async_trait]
impl SessionPoller for EventLoop {
    async fn next_event(&mut self) -> SessionEvent {
        translate(self.poll().await)
    }
}

/// Owns the lifecycle, the scheduler and the publish context.
pub struct Bridge<S, T, C> {
    lifecycle: ConnectionLifecycle,
    scheduler: PublishScheduler,
    ctx: PublishContext<S, T, C>,
    policy: DisconnectPolicy,
    poll_ceiling: Duration,
    last_logged: u64,
}

impl<S, T, C> Bridge<S, T, C>
where
    S: SensorSource,
    T: Transport,
    C: Clock,
{
    pub fn new(
        ctx: PublishContext<S, T, C>,
        scheduler: PublishScheduler,
        setup: SessionSetup,
        policy: DisconnectPolicy,
        poll_ceiling: Duration,
    ) -> Self {
        Self {
            lifecycle: ConnectionLifecycle::new(setup),
            scheduler,
            ctx,
            policy,
            poll_ceiling,
            last_logged: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub fn scheduler(&self) -> &PublishScheduler {
        &self.scheduler
    }

    pub fn context(&self) -> &PublishContext<S, T, C> {
        &self.ctx
    }

    /// Issue the connect request
    pub fn connect(&mut self) -> Result<()> {
        self.lifecycle.request_connect()
    }

    /// Handle one session event
    ///
    /// # Errors
    ///
    /// Propagates lifecycle errors; see [`ConnectionLifecycle::handle_status`]
    pub fn on_session_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Status(status) => {
                debug!("Connection status: {:?}", status);
                self.lifecycle.handle_status(status, &mut self.scheduler, &mut self.ctx)
            }
            SessionEvent::PublishSent(pkid) => {
                debug!("Publish sent (pkid {})", pkid);
                Ok(())
            }
            SessionEvent::PublishCompleted(pkid) => {
                debug!("Publish completed (pkid {})", pkid);
                Ok(())
            }
            SessionEvent::UnsubscribeSent(pkid) => {
                debug!("Unsubscribe sent (pkid {})", pkid);
                Ok(())
            }
            SessionEvent::Message { topic, payload } => {
                info!("Received {} on {}", payload, topic);
                Ok(())
            }
            SessionEvent::Idle => Ok(()),
        }
    }

    /// Run every channel timer that is due
    pub fn on_timer(&mut self) -> usize {
        let fired = self.scheduler.fire_due(&mut self.ctx);

        let published = self.scheduler.stats().published;
        if published - self.last_logged >= LOG_INTERVAL_PUBLISHES {
            let stats = self.scheduler.stats();
            info!(
                "Published {} values ({} evaluations, {} unchanged, {} failed)",
                stats.published, stats.fired, stats.suppressed, stats.failed
            );
            self.last_logged = published;
        }
        fired
    }

    /// Latest instant the loop may sleep until
    pub fn next_wakeup(&self, now: Instant) -> Instant {
        let ceiling = now + self.poll_ceiling;
        self.scheduler
            .next_deadline()
            .map_or(ceiling, |deadline| deadline.min(ceiling))
    }

    /// Replace a failed lifecycle with a fresh one and connect again.
    ///
    /// Channel caches survive, so values that did not change while the session
    /// was down are not republished.
    pub fn restart_session(&mut self) -> Result<()> {
        self.lifecycle = ConnectionLifecycle::new(self.lifecycle.setup().clone());
        self.lifecycle.request_connect()
    }

    /// Queue unsubscribes ahead of a reset, returning how many were queued
    pub fn on_reset(&mut self) -> usize {
        self.lifecycle.teardown(&mut self.ctx.transport)
    }

    /// Keep polling the session until `pending` unsubscribes have been sent.
    ///
    /// Bounded by the poll ceiling. Stops early if the session drops.
    /// Returns the number actually sent.
    pub async fn drain_unsubscribes<P: SessionPoller>(&mut self, poller: &mut P, pending: usize) -> usize {
        let mut sent = 0;
        if pending == 0 {
            return sent;
        }

        let deadline = tokio::time::sleep(self.poll_ceiling);
        tokio::pin!(deadline);

        while sent < pending {
            tokio::select! {
                biased;

                event = poller.next_event() => match event {
                    SessionEvent::UnsubscribeSent(pkid) => {
                        debug!("Unsubscribe sent (pkid {})", pkid);
                        sent += 1;
                    }
                    SessionEvent::Status(status @ (ConnectionStatus::Disconnected | ConnectionStatus::Rejected(_))) => {
                        warn!("Session ended while unsubscribing: {:?}", status);
                        break;
                    }
                    other => debug!("Ignoring {:?} while unsubscribing", other),
                },

                _ = &mut deadline => {
                    warn!("Gave up waiting for {} of {} unsubscribes", pending - sent, pending);
                    break;
                }
            }
        }
        sent
    }

    /// Drive the bridge until a reset or a fatal error.
    ///
    /// # Errors
    ///
    /// - Session loss when the policy is [`DisconnectPolicy::Terminate`]
    /// - Any non-session error
    pub async fn run<P: SessionPoller>(&mut self, poller: &mut P, reset: &mut ResetSignal) -> Result<ExitReason> {
        self.connect()?;
        let mut attempt: u32 = 0;

        loop {
            self.on_timer();

            let wake = tokio::time::Instant::from_std(self.next_wakeup(self.ctx.clock.now()));

            tokio::select! {
                biased;

                _ = reset.triggered() => {
                    info!("Reset requested, stopping");
                    let pending = self.on_reset();
                    let sent = self.drain_unsubscribes(poller, pending).await;
                    debug!("Sent {} of {} unsubscribes", sent, pending);
                    return Ok(ExitReason::Reset);
                }

                event = poller.next_event() => {
                    match self.on_session_event(event) {
                        Ok(()) => {
                            if self.lifecycle.state() == ConnectionState::Connected {
                                attempt = 0;
                            }
                        }
                        Err(e) if e.is_session_loss() => {
                            let Some(delay) = self.policy.backoff(attempt) else {
                                return Err(e);
                            };
                            attempt = attempt.saturating_add(1);
                            warn!("{}; reconnecting in {:?} (attempt {})", e, delay, attempt);

                            tokio::select! {
                                biased;
                                _ = reset.triggered() => {
                                    info!("Reset requested while waiting to reconnect");
                                    return Ok(ExitReason::Reset);
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                            self.restart_session()?;
                        }
                        Err(e) => return Err(e),
                    }
                }

                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }
}

impl<S, T, C> std::fmt::Debug for Bridge<S, T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("state", &self.lifecycle.state())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

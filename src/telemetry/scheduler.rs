//! # Publish Scheduler
//!
//! One self re-arming timer per channel.
//!
//! A firing samples, asks the [`ChangeDetector`], maybe publishes, and then
//! re-arms the channel at `now + interval`, where `now` is read *after* the
//! work. Re-arming is the only thing that produces a next firing, so a slow
//! callback pushes back its own channel and nobody else's deadline.
//!
//! Timers are armed only through the connection lifecycle, which arms every
//! channel with zero delay on entering the connected state.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::channel::{ChannelRegistry, TelemetryChannel};
use super::detector::ChangeDetector;
use super::payload::PublishIntent;
use crate::context::{Clock, PublishContext};
use crate::mqtt::transport::Transport;
use crate::sensor::SensorSource;

/// Counters kept across firings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Timer firings evaluated
    pub fired: u64,
    /// Publishes handed to the transport
    pub published: u64,
    /// Firings gated out by the change detector
    pub suppressed: u64,
    /// Publishes the transport refused
    pub failed: u64,
}

/// Per-channel timers over a [`ChannelRegistry`].
#[derive(Debug, Clone)]
pub struct PublishScheduler {
    registry: ChannelRegistry,
    deadlines: Vec<Option<Instant>>,
    detector: ChangeDetector,
    stats: SchedulerStats,
}

impl PublishScheduler {
    /// Create a scheduler with every channel unarmed
    pub fn new(registry: ChannelRegistry) -> Self {
        let deadlines = vec![None; registry.len()];
        Self {
            registry,
            deadlines,
            detector: ChangeDetector,
            stats: SchedulerStats::default(),
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn channel(&self, index: usize) -> Option<&TelemetryChannel> {
        self.registry.get(index)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Arm every channel to fire at `now`.
    ///
    /// Re-arming an already armed channel replaces its pending deadline.
    pub(crate) fn arm_all(&mut self, now: Instant) {
        for deadline in &mut self.deadlines {
            *deadline = Some(now);
        }
        debug!("Armed {} channels with zero delay", self.deadlines.len());
    }

    /// Drop every pending deadline
    pub(crate) fn disarm_all(&mut self) {
        for deadline in &mut self.deadlines {
            *deadline = None;
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadlines.iter().any(Option::is_some)
    }

    /// Pending deadline of one channel
    pub fn deadline(&self, index: usize) -> Option<Instant> {
        self.deadlines.get(index).copied().flatten()
    }

    /// Earliest pending deadline across all channels
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    /// Fire every channel that is due at the current time.
    ///
    /// The due set is fixed when the pass starts and runs in deadline order,
    /// ties broken by registration order. Channels that become due while the
    /// pass runs wait for the next pass.
    ///
    /// # Returns
    ///
    /// Number of channels fired
    pub fn fire_due<S, T, C>(&mut self, ctx: &mut PublishContext<S, T, C>) -> usize
    where
        S: SensorSource,
        T: Transport,
        C: Clock,
    {
        let now = ctx.clock.now();
        let mut due: Vec<(Instant, usize)> = self
            .deadlines
            .iter()
            .enumerate()
            .filter_map(|(index, deadline)| deadline.filter(|d| *d <= now).map(|d| (d, index)))
            .collect();
        due.sort();

        for &(_, index) in &due {
            self.fire(index, ctx);
        }
        due.len()
    }

    /// Run one channel's firing and re-arm it
    fn fire<S, T, C>(&mut self, index: usize, ctx: &mut PublishContext<S, T, C>)
    where
        S: SensorSource,
        T: Transport,
        C: Clock,
    {
        let snapshot = ctx.sensors.snapshot(ctx.clock.now());
        let detector = self.detector;
        let Some(channel) = self.registry.get_mut(index) else {
            return;
        };

        self.stats.fired += 1;
        let value = channel.extract(&snapshot);

        if detector.should_publish(channel, value) {
            let intent = PublishIntent::telemetry(
                channel.topic(&ctx.delivery.prefix),
                value,
                ctx.delivery.qos,
                ctx.delivery.retain,
            );
            info!("Publishing {} to {}", intent.payload, intent.topic);

            // The cache follows the attempt, not the outcome
            detector.record(channel, value);
            match ctx.transport.publish(&intent) {
                Ok(()) => self.stats.published += 1,
                Err(e) => {
                    warn!("Failed to publish {}: {}", intent.topic, e);
                    self.stats.failed += 1;
                }
            }
        } else {
            debug!("{} unchanged at {}, not publishing", channel.name(), value);
            self.stats.suppressed += 1;
        }

        let interval = channel.interval();
        self.deadlines[index] = Some(ctx.clock.now() + interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Delivery, ManualClock};
    use crate::mqtt::transport::mocks::MockTransport;
    use crate::sensor::{MockSensorSource, SensorSnapshot, SnapshotCache};
    use rumqttc::QoS;
    use std::time::Duration;

    const TEN_SECONDS: Duration = Duration::from_secs(10);

    fn delivery() -> Delivery {
        Delivery {
            prefix: "/pico".to_string(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    fn constant_source(snapshot: SensorSnapshot) -> MockSensorSource {
        let mut source = MockSensorSource::new();
        source.expect_sample().returning(move || snapshot);
        source
    }

    fn context(
        source: MockSensorSource,
        clock: ManualClock,
    ) -> (PublishContext<MockSensorSource, MockTransport, ManualClock>, MockTransport) {
        let transport = MockTransport::new();
        let ctx = PublishContext::new(
            SnapshotCache::new(source, Duration::ZERO),
            transport.clone(),
            clock,
            delivery(),
        );
        (ctx, transport)
    }

    #[test]
    fn test_unarmed_scheduler_fires_nothing() {
        let clock = ManualClock::new();
        let (mut ctx, transport) = context(constant_source(SensorSnapshot::default()), clock);
        let mut scheduler = PublishScheduler::new(ChannelRegistry::standard(TEN_SECONDS));

        assert_eq!(scheduler.fire_due(&mut ctx), 0);
        assert!(transport.get_published().is_empty());
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn test_first_evaluation_publishes_zero_values() {
        let clock = ManualClock::new();
        let (mut ctx, transport) = context(constant_source(SensorSnapshot::default()), clock.clone());
        let mut scheduler = PublishScheduler::new(ChannelRegistry::standard(TEN_SECONDS));

        scheduler.arm_all(clock.now());
        assert_eq!(scheduler.fire_due(&mut ctx), 11);

        let published = transport.get_published();
        assert_eq!(published.len(), 11);
        assert!(published.iter().all(|i| i.payload == "0.00"));
        assert_eq!(published[0].topic, "/pico/temperature");
        assert_eq!(published[10].topic, "/pico/gyroscope/z");
    }

    #[test]
    fn test_unchanged_values_are_not_republished() {
        let clock = ManualClock::new();
        let snapshot = SensorSnapshot {
            temperature: 23.4678,
            ..Default::default()
        };
        let (mut ctx, transport) = context(constant_source(snapshot), clock.clone());
        let mut scheduler = PublishScheduler::new(ChannelRegistry::standard(TEN_SECONDS));

        scheduler.arm_all(clock.now());
        scheduler.fire_due(&mut ctx);
        transport.clear();

        clock.advance(TEN_SECONDS);
        assert_eq!(scheduler.fire_due(&mut ctx), 11);
        assert!(transport.get_published().is_empty());
        assert_eq!(scheduler.stats().suppressed, 11);
    }

    #[test]
    fn test_changed_value_is_republished() {
        let clock = ManualClock::new();
        let mut source = MockSensorSource::new();
        let mut calls = 0;
        source.expect_sample().returning(move || {
            calls += 1;
            SensorSnapshot {
                humidity: if calls <= 11 { 50.0 } else { 51.0 },
                ..Default::default()
            }
        });
        let (mut ctx, transport) = context(source, clock.clone());
        let mut scheduler = PublishScheduler::new(ChannelRegistry::standard(TEN_SECONDS));

        scheduler.arm_all(clock.now());
        scheduler.fire_due(&mut ctx);
        transport.clear();

        clock.advance(TEN_SECONDS);
        scheduler.fire_due(&mut ctx);

        let published = transport.get_published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "/pico/humidity");
        assert_eq!(published[0].payload, "51.00");
    }

    #[test]
    fn test_rearms_at_interval_after_work() {
        let clock = ManualClock::new();
        let (mut ctx, _transport) = context(constant_source(SensorSnapshot::default()), clock.clone());
        let mut scheduler = PublishScheduler::new(ChannelRegistry::standard(TEN_SECONDS));

        scheduler.arm_all(clock.now());
        scheduler.fire_due(&mut ctx);

        assert_eq!(scheduler.next_deadline(), Some(clock.at(TEN_SECONDS)));

        clock.advance(Duration::from_secs(9));
        assert_eq!(scheduler.fire_due(&mut ctx), 0);
    }

    #[test]
    fn test_cache_is_updated_even_when_publish_is_refused() {
        let clock = ManualClock::new();
        let (mut ctx, transport) = context(constant_source(SensorSnapshot::default()), clock.clone());
        let mut scheduler = PublishScheduler::new(
            ChannelRegistry::builder(TEN_SECONDS)
                .channel("temperature", "/temperature", |s| s.temperature)
                .build(),
        );

        transport.set_publish_error("request queue full");
        scheduler.arm_all(clock.now());
        scheduler.fire_due(&mut ctx);
        assert_eq!(scheduler.stats().failed, 1);
        assert_eq!(scheduler.channel(0).unwrap().last_published(), Some(0.0));

        // The lost value is never retried while it stays unchanged
        transport.clear_publish_error();
        clock.advance(TEN_SECONDS);
        scheduler.fire_due(&mut ctx);
        assert!(transport.get_published().is_empty());
    }

    #[test]
    fn test_disarm_stops_firing() {
        let clock = ManualClock::new();
        let (mut ctx, transport) = context(constant_source(SensorSnapshot::default()), clock.clone());
        let mut scheduler = PublishScheduler::new(ChannelRegistry::standard(TEN_SECONDS));

        scheduler.arm_all(clock.now());
        scheduler.disarm_all();
        assert!(!scheduler.is_armed());
        assert_eq!(scheduler.fire_due(&mut ctx), 0);
        assert!(transport.get_published().is_empty());
    }
}

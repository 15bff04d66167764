//! Scheduling Integration Tests
//!
//! Drive the lifecycle, scheduler and publish context together through the
//! public API, with a manual clock and a recording transport.
//!
//! ## Test Scope
//!
//! - Connect burst and change gating
//! - Per-channel timers that stay independent when one firing is slow
//! - Rejection and session loss stopping publication
//! - Payload text for readings computed from raw sensor values

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::QoS;

use sensor_bridge::context::{Clock, Delivery, ManualClock, PublishContext};
use sensor_bridge::error::{BridgeError, Result};
use sensor_bridge::mqtt::{ConnectionLifecycle, ConnectionState, ConnectionStatus, SessionSetup, Transport};
use sensor_bridge::sensor::snapshot::{ClimateReading, ImuReading, SEA_LEVEL_PRESSURE_PA};
use sensor_bridge::sensor::{SensorSnapshot, SensorSource, SnapshotCache};
use sensor_bridge::telemetry::{ChannelRegistry, PublishIntent, PublishScheduler};

const TEN_SECONDS: Duration = Duration::from_secs(10);
const PRESENCE_TOPIC: &str = "/pico_w2f3c/online";

// ===== TEST DOUBLES =====

#[derive(Clone, Default)]
struct RecordingTransport {
    published: Arc<Mutex<Vec<PublishIntent>>>,
}

impl RecordingTransport {
    fn telemetry(&self) -> Vec<PublishIntent> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.topic != PRESENCE_TOPIC)
            .cloned()
            .collect()
    }

    fn presence_count(&self) -> usize {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.topic == PRESENCE_TOPIC)
            .count()
    }

    fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

impl Transport for RecordingTransport {
    fn publish(&mut self, intent: &PublishIntent) -> Result<()> {
        self.published.lock().unwrap().push(intent.clone());
        Ok(())
    }

    fn subscribe(&mut self, _topic: &str, _qos: QoS) -> Result<()> {
        Ok(())
    }

    fn unsubscribe(&mut self, _topic: &str) -> Result<()> {
        Ok(())
    }
}

/// Source backed by a closure; can stall the clock on its next sample
struct ScriptedSource<F> {
    produce: F,
    clock: ManualClock,
    stall_next: Arc<AtomicBool>,
    stall: Duration,
}

impl<F: FnMut() -> SensorSnapshot> SensorSource for ScriptedSource<F> {
    fn sample(&mut self) -> SensorSnapshot {
        if self.stall_next.swap(false, Ordering::SeqCst) {
            self.clock.advance(self.stall);
        }
        (self.produce)()
    }
}

struct Harness<F> {
    clock: ManualClock,
    transport: RecordingTransport,
    stall_next: Arc<AtomicBool>,
    lifecycle: ConnectionLifecycle,
    scheduler: PublishScheduler,
    ctx: PublishContext<ScriptedSource<F>, RecordingTransport, ManualClock>,
}

impl<F: FnMut() -> SensorSnapshot> Harness<F> {
    fn new(registry: ChannelRegistry, produce: F) -> Self {
        let clock = ManualClock::new();
        let transport = RecordingTransport::default();
        let stall_next = Arc::new(AtomicBool::new(false));
        let source = ScriptedSource {
            produce,
            clock: clock.clone(),
            stall_next: stall_next.clone(),
            stall: Duration::from_secs(1),
        };
        let ctx = PublishContext::new(
            SnapshotCache::new(source, Duration::ZERO),
            transport.clone(),
            clock.clone(),
            Delivery {
                prefix: "/pico_w2f3c".to_string(),
                qos: QoS::AtLeastOnce,
                retain: false,
            },
        );
        let setup = SessionSetup {
            subscriptions: Vec::new(),
            subscribe_qos: None,
            will_topic: Some(PRESENCE_TOPIC.to_string()),
        };

        Self {
            clock,
            transport,
            stall_next,
            lifecycle: ConnectionLifecycle::new(setup),
            scheduler: PublishScheduler::new(registry),
            ctx,
        }
    }

    fn status(&mut self, status: ConnectionStatus) -> Result<()> {
        self.lifecycle.handle_status(status, &mut self.scheduler, &mut self.ctx)
    }

    fn connect(&mut self) {
        self.lifecycle.request_connect().unwrap();
        self.status(ConnectionStatus::Accepted).unwrap();
    }

    fn advance_and_fire(&mut self, by: Duration) -> usize {
        self.clock.advance(by);
        self.scheduler.fire_due(&mut self.ctx)
    }
}

fn constant(snapshot: SensorSnapshot) -> impl FnMut() -> SensorSnapshot {
    move || snapshot
}

// ===== CONNECT BURST AND CHANGE GATING =====

#[test]
fn test_every_channel_publishes_once_right_after_connect() {
    let mut h = Harness::new(ChannelRegistry::standard(TEN_SECONDS), constant(SensorSnapshot::default()));
    h.connect();

    assert_eq!(h.transport.presence_count(), 1);
    assert_eq!(h.scheduler.fire_due(&mut h.ctx), 11);

    let telemetry = h.transport.telemetry();
    assert_eq!(telemetry.len(), 11);
    assert!(telemetry.iter().all(|i| i.payload == "0.00"));
    assert_eq!(h.clock.elapsed(), Duration::ZERO);
}

#[test]
fn test_nothing_publishes_before_connect() {
    let mut h = Harness::new(ChannelRegistry::standard(TEN_SECONDS), constant(SensorSnapshot::default()));

    assert_eq!(h.advance_and_fire(TEN_SECONDS * 3), 0);
    h.lifecycle.request_connect().unwrap();
    assert_eq!(h.advance_and_fire(TEN_SECONDS), 0);
    assert!(h.transport.telemetry().is_empty());
}

#[test]
fn test_steady_values_publish_only_once() {
    let snapshot = SensorSnapshot {
        temperature: 21.5,
        humidity: 40.25,
        ..Default::default()
    };
    let mut h = Harness::new(ChannelRegistry::standard(TEN_SECONDS), constant(snapshot));
    h.connect();
    h.scheduler.fire_due(&mut h.ctx);
    h.transport.clear();

    for _ in 0..5 {
        assert_eq!(h.advance_and_fire(TEN_SECONDS), 11);
    }
    assert!(h.transport.telemetry().is_empty());
    assert_eq!(h.scheduler.stats().suppressed, 55);
}

#[test]
fn test_only_changed_channel_republishes() {
    let mut tick = 0;
    let mut h = Harness::new(ChannelRegistry::standard(TEN_SECONDS), move || {
        tick += 1;
        SensorSnapshot {
            // changes once the first burst (11 samples) is over
            gyroscope_z: if tick > 11 { -0.5 } else { 0.0 },
            ..Default::default()
        }
    });
    h.connect();
    h.scheduler.fire_due(&mut h.ctx);
    h.transport.clear();

    h.advance_and_fire(TEN_SECONDS);

    let telemetry = h.transport.telemetry();
    assert_eq!(telemetry.len(), 1);
    assert_eq!(telemetry[0].topic, "/pico_w2f3c/gyroscope/z");
    assert_eq!(telemetry[0].payload, "-0.50");
}

#[test]
fn test_change_below_payload_precision_still_publishes() {
    let mut tick = 0;
    let mut h = Harness::new(
        ChannelRegistry::builder(TEN_SECONDS)
            .channel("temperature", "/temperature", |s| s.temperature)
            .build(),
        move || {
            tick += 1;
            SensorSnapshot {
                temperature: if tick == 1 { 23.001 } else { 23.002 },
                ..Default::default()
            }
        },
    );
    h.connect();
    h.scheduler.fire_due(&mut h.ctx);
    h.advance_and_fire(TEN_SECONDS);

    let payloads: Vec<String> = h.transport.telemetry().into_iter().map(|i| i.payload).collect();
    assert_eq!(payloads, vec!["23.00".to_string(), "23.00".to_string()]);
}

// ===== INDEPENDENT TIMERS =====

#[test]
fn test_slow_firing_only_delays_its_own_channel() {
    let mut h = Harness::new(
        ChannelRegistry::builder(TEN_SECONDS)
            .channel_every("slow", "/slow", TEN_SECONDS, |s| s.temperature)
            .channel_every("fast", "/fast", Duration::from_secs(4), |s| s.humidity)
            .build(),
        constant(SensorSnapshot::default()),
    );
    h.connect();
    h.scheduler.fire_due(&mut h.ctx);

    assert_eq!(h.advance_and_fire(Duration::from_secs(4)), 1);
    assert_eq!(h.advance_and_fire(Duration::from_secs(4)), 1);
    assert_eq!(h.scheduler.deadline(1), Some(h.clock.at(Duration::from_secs(12))));

    // the slow channel's next sample takes a second
    h.stall_next.store(true, Ordering::SeqCst);
    assert_eq!(h.advance_and_fire(Duration::from_secs(2)), 1);
    assert_eq!(h.clock.elapsed(), Duration::from_secs(11));

    assert_eq!(h.scheduler.deadline(0), Some(h.clock.at(Duration::from_secs(21))));
    assert_eq!(h.scheduler.deadline(1), Some(h.clock.at(Duration::from_secs(12))));

    assert_eq!(h.advance_and_fire(Duration::from_secs(1)), 1);
    assert_eq!(h.scheduler.deadline(1), Some(h.clock.at(Duration::from_secs(16))));
}

#[test]
fn test_channels_keep_their_own_cadence() {
    let mut h = Harness::new(
        ChannelRegistry::builder(TEN_SECONDS)
            .channel("temperature", "/temperature", |s| s.temperature)
            .channel_every("pressure", "/altitude", Duration::from_secs(30), |s| s.altitude)
            .build(),
        constant(SensorSnapshot::default()),
    );
    h.connect();
    h.scheduler.fire_due(&mut h.ctx);

    let fired: usize = (0..6).map(|_| h.advance_and_fire(TEN_SECONDS)).sum();
    // six temperature firings, two altitude firings
    assert_eq!(fired, 8);
}

// ===== SESSION LOSS =====

#[test]
fn test_rejected_session_never_publishes() {
    let mut h = Harness::new(ChannelRegistry::standard(TEN_SECONDS), constant(SensorSnapshot::default()));
    h.lifecycle.request_connect().unwrap();

    let result = h.status(ConnectionStatus::Rejected("BadUserNamePassword".to_string()));

    assert!(matches!(result, Err(BridgeError::ConnectionRejected(_))));
    assert_eq!(h.lifecycle.state(), ConnectionState::Failed);
    assert_eq!(h.advance_and_fire(TEN_SECONDS), 0);
    assert!(h.transport.published.lock().unwrap().is_empty());
}

#[test]
fn test_lost_session_stops_every_timer() {
    let mut tick = 0;
    let mut h = Harness::new(ChannelRegistry::standard(TEN_SECONDS), move || {
        tick += 1;
        SensorSnapshot {
            temperature: tick as f32,
            ..Default::default()
        }
    });
    h.connect();
    h.scheduler.fire_due(&mut h.ctx);

    let result = h.status(ConnectionStatus::Disconnected);
    assert!(matches!(result, Err(BridgeError::ConnectionLost)));
    assert!(result.unwrap_err().is_session_loss());

    h.transport.clear();
    assert_eq!(h.advance_and_fire(TEN_SECONDS), 0);
    assert!(h.transport.telemetry().is_empty());
    assert!(h.status(ConnectionStatus::Accepted).is_err());
}

#[test]
fn test_repeated_accept_rearms_without_republishing() {
    let mut h = Harness::new(ChannelRegistry::standard(TEN_SECONDS), constant(SensorSnapshot::default()));
    h.connect();
    h.scheduler.fire_due(&mut h.ctx);
    h.transport.clear();

    h.clock.advance(Duration::from_secs(3));
    h.status(ConnectionStatus::Accepted).unwrap();

    assert_eq!(h.transport.presence_count(), 1);
    assert_eq!(h.scheduler.fire_due(&mut h.ctx), 11);
    assert!(h.transport.telemetry().is_empty());
    assert_eq!(h.scheduler.next_deadline(), Some(h.clock.at(Duration::from_secs(13))));
}

// ===== PAYLOADS FROM RAW READINGS =====

#[test]
fn test_raw_readings_publish_device_payloads() {
    let climate = ClimateReading {
        barometer_temperature: 24.0,
        pressure_pa: SEA_LEVEL_PRESSURE_PA,
        hygrometer: Some((23.0, 45.678)),
    };
    let imu = ImuReading {
        accel_raw: [0, 0, 16384],
        gyro_raw: [131, 0, 0],
    };
    let snapshot = SensorSnapshot::from_readings(&climate, &imu, SEA_LEVEL_PRESSURE_PA);

    let mut h = Harness::new(ChannelRegistry::standard(TEN_SECONDS), constant(snapshot));
    h.connect();
    h.scheduler.fire_due(&mut h.ctx);

    let payload = |suffix: &str| {
        h.transport
            .telemetry()
            .into_iter()
            .find(|i| i.topic == format!("/pico_w2f3c{}", suffix))
            .map(|i| i.payload)
            .unwrap()
    };

    assert_eq!(payload("/temperature"), "23.50");
    assert_eq!(payload("/humidity"), "45.68");
    assert_eq!(payload("/altitude"), "0.00");
    assert_eq!(payload("/acceleration/z"), "1.00");
    assert_eq!(payload("/acceleration/total"), "1.00");
    assert_eq!(payload("/gyroscope/x"), "1.00");
    assert_eq!(payload("/gyroscope/y"), "0.00");
}

#[test]
fn test_clock_is_shared_with_the_context() {
    let h = Harness::new(ChannelRegistry::standard(TEN_SECONDS), constant(SensorSnapshot::default()));
    h.clock.advance(TEN_SECONDS);
    assert_eq!(h.ctx.clock.now(), h.clock.at(TEN_SECONDS));
}

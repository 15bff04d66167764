//! # Publish Context
//!
//! Everything a timer firing or a lifecycle transition touches, owned by the
//! driving loop and handed down by `&mut` reference. Nothing here is global.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rumqttc::QoS;

use crate::mqtt::transport::Transport;
use crate::sensor::{SensorSource, SnapshotCache};

/// Monotonic time source for channel deadlines
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall clock of the running process
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
///
/// Cloned handles share the same time, so a sensor source can hold one and
/// simulate a slow read by advancing it.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move time forward by `by`
    pub fn advance(&self, by: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += by;
        }
    }

    /// Time elapsed since the clock was created
    pub fn elapsed(&self) -> Duration {
        self.offset.lock().map(|o| *o).unwrap_or_default()
    }

    /// The instant corresponding to `elapsed` on this clock
    pub fn at(&self, elapsed: Duration) -> Instant {
        self.base + elapsed
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }
}

/// Uniform delivery settings applied to every telemetry publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Device topic prefix, e.g. `/pico_w1a2b`
    pub prefix: String,
    pub qos: QoS,
    pub retain: bool,
}

/// Context shared by the scheduler and the connection lifecycle
pub struct PublishContext<S, T, C = SystemClock> {
    pub sensors: SnapshotCache<S>,
    pub transport: T,
    pub clock: C,
    pub delivery: Delivery,
}

impl<S, T, C> PublishContext<S, T, C>
where
    S: SensorSource,
    T: Transport,
    C: Clock,
{
    pub fn new(sensors: SnapshotCache<S>, transport: T, clock: C, delivery: Delivery) -> Self {
        Self {
            sensors,
            transport,
            clock,
            delivery,
        }
    }
}

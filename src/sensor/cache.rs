//! Short-lived snapshot cache shared by all channels.
//!
//! Channels that fire within one TTL window publish values drawn from the same
//! sensor pass. A zero TTL samples on every request, so each channel firing
//! takes its own reading.

use std::time::{Duration, Instant};

use tracing::debug;

use super::{SensorSnapshot, SensorSource};

/// Wraps a [`SensorSource`] and reuses its last snapshot for `ttl`.
#[derive(Debug)]
pub struct SnapshotCache<S> {
    source: S,
    ttl: Duration,
    cached: Option<(Instant, SensorSnapshot)>,
    samples: u64,
}

impl<S: SensorSource> SnapshotCache<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cached: None,
            samples: 0,
        }
    }

    /// Return a snapshot no older than the TTL, sampling if needed.
    ///
    /// `now` is the caller's clock so that cache age and channel deadlines are
    /// measured on the same timeline.
    pub fn snapshot(&mut self, now: Instant) -> SensorSnapshot {
        if let Some((taken_at, snapshot)) = self.cached {
            if !self.ttl.is_zero() && now.saturating_duration_since(taken_at) < self.ttl {
                return snapshot;
            }
        }

        let snapshot = self.source.sample();
        self.samples += 1;
        debug!(
            "Snapshot #{} at {}: temp {:.2} hum {:.2} alt {:.2} acc {:.2} gyro {:.2}",
            self.samples,
            snapshot.captured_at.format("%H:%M:%S%.3f"),
            snapshot.temperature,
            snapshot.humidity,
            snapshot.altitude,
            snapshot.acceleration_magnitude,
            snapshot.gyroscope_magnitude
        );
        self.cached = Some((now, snapshot));
        snapshot
    }

    /// Number of times the underlying source was sampled
    pub fn samples_taken(&self) -> u64 {
        self.samples
    }
}

//! # Telemetry Channels
//!
//! Data-driven table of published values.
//!
//! ## Default Channels
//!
//! | Suffix | Value |
//! |--------|-------|
//! | `/temperature` | Mean temperature (°C) |
//! | `/humidity` | Relative humidity (%) |
//! | `/altitude` | Barometric altitude (m) |
//! | `/acceleration/total` | Acceleration magnitude (g) |
//! | `/gyroscope/total` | Angular rate magnitude (°/s) |
//! | `/acceleration/x` .. `/z` | Acceleration per axis (g) |
//! | `/gyroscope/x` .. `/z` | Angular rate per axis (°/s) |
//!
//! ## Usage
//!
//! ```
//! use std::time::Duration;
//! use sensor_bridge::telemetry::channel::ChannelRegistry;
//!
//! let registry = ChannelRegistry::builder(Duration::from_secs(10))
//!     .channel("temperature", "/temperature", |s| s.temperature)
//!     .channel_every("altitude", "/altitude", Duration::from_secs(30), |s| s.altitude)
//!     .build();
//!
//! assert_eq!(registry.len(), 2);
//! ```

use std::collections::HashMap;
use std::time::Duration;

use crate::sensor::SensorSnapshot;

/// Maps a snapshot to the scalar a channel publishes
pub type Extractor = fn(&SensorSnapshot) -> f32;

/// One independently scheduled telemetry value.
#[derive(Debug, Clone)]
pub struct TelemetryChannel {
    name: &'static str,
    suffix: &'static str,
    extractor: Extractor,
    interval: Duration,
    /// Last value dispatched to the transport; `None` until the first publish
    pub(crate) last_published: Option<f32>,
}

impl TelemetryChannel {
    pub fn new(name: &'static str, suffix: &'static str, interval: Duration, extractor: Extractor) -> Self {
        Self {
            name,
            suffix,
            extractor,
            interval,
            last_published: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Topic suffix appended to the device prefix
    pub fn suffix(&self) -> &'static str {
        self.suffix
    }

    /// Re-sampling cadence
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_published(&self) -> Option<f32> {
        self.last_published
    }

    /// Pull this channel's scalar out of a snapshot
    pub fn extract(&self, snapshot: &SensorSnapshot) -> f32 {
        (self.extractor)(snapshot)
    }

    /// Full topic under the given device prefix
    pub fn topic(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.suffix)
    }
}

/// Fixed, ordered collection of channels.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: Vec<TelemetryChannel>,
}

impl ChannelRegistry {
    /// Start a registry whose channels default to `interval`
    pub fn builder(interval: Duration) -> ChannelRegistryBuilder {
        ChannelRegistryBuilder {
            interval,
            overrides: HashMap::new(),
            channels: Vec::new(),
        }
    }

    /// The eleven channels the device publishes, all at `interval`
    pub fn standard(interval: Duration) -> Self {
        Self::builder(interval).standard_channels().build()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TelemetryChannel> {
        self.channels.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut TelemetryChannel> {
        self.channels.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelemetryChannel> {
        self.channels.iter()
    }

    /// Look a channel up by topic suffix
    pub fn find(&self, suffix: &str) -> Option<&TelemetryChannel> {
        self.channels.iter().find(|c| c.suffix == suffix)
    }
}

/// Builder for [`ChannelRegistry`].
///
/// Registering a suffix twice replaces the earlier entry in place, so the
/// table stays unique by topic.
#[derive(Debug, Clone)]
pub struct ChannelRegistryBuilder {
    interval: Duration,
    overrides: HashMap<String, Duration>,
    channels: Vec<TelemetryChannel>,
}

impl ChannelRegistryBuilder {
    /// Per-suffix intervals applied to channels registered afterwards
    pub fn with_overrides(mut self, overrides: HashMap<String, Duration>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Register a channel at the default interval (or its override)
    pub fn channel(self, name: &'static str, suffix: &'static str, extractor: Extractor) -> Self {
        let interval = self.overrides.get(suffix).copied().unwrap_or(self.interval);
        self.push(TelemetryChannel::new(name, suffix, interval, extractor))
    }

    /// Register a channel with an explicit interval
    pub fn channel_every(
        self,
        name: &'static str,
        suffix: &'static str,
        interval: Duration,
        extractor: Extractor,
    ) -> Self {
        self.push(TelemetryChannel::new(name, suffix, interval, extractor))
    }

    /// Register the device's eleven channels in publication order
    pub fn standard_channels(self) -> Self {
        self.channel("temperature", "/temperature", |s| s.temperature)
            .channel("humidity", "/humidity", |s| s.humidity)
            .channel("altitude", "/altitude", |s| s.altitude)
            .channel("acceleration", "/acceleration/total", |s| s.acceleration_magnitude)
            .channel("gyroscope", "/gyroscope/total", |s| s.gyroscope_magnitude)
            .channel("acceleration_x", "/acceleration/x", |s| s.acceleration_x)
            .channel("acceleration_y", "/acceleration/y", |s| s.acceleration_y)
            .channel("acceleration_z", "/acceleration/z", |s| s.acceleration_z)
            .channel("gyroscope_x", "/gyroscope/x", |s| s.gyroscope_x)
            .channel("gyroscope_y", "/gyroscope/y", |s| s.gyroscope_y)
            .channel("gyroscope_z", "/gyroscope/z", |s| s.gyroscope_z)
    }

    pub fn build(self) -> ChannelRegistry {
        ChannelRegistry {
            channels: self.channels,
        }
    }

    fn push(mut self, channel: TelemetryChannel) -> Self {
        match self.channels.iter_mut().find(|c| c.suffix == channel.suffix) {
            Some(existing) => *existing = channel,
            None => self.channels.push(channel),
        }
        self
    }
}

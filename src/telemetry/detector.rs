//! # Change Detector
//!
//! Decides whether a freshly extracted value is worth publishing.
//!
//! Comparison is exact floating-point inequality against the last value
//! dispatched on the channel. There is no tolerance band: a value jittering by
//! one ULP republishes every cycle.
//!
//! The cache is written when a publish is attempted, not when
//! the broker acknowledges it. A publish lost in flight therefore looks
//! exactly like a delivered one from here on.

use super::channel::TelemetryChannel;

/// Stateless gate over a channel's last-published cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector;

impl ChangeDetector {
    /// `true` if `value` differs from what the channel last published.
    ///
    /// A channel that never published always passes.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use sensor_bridge::telemetry::channel::ChannelRegistry;
    /// use sensor_bridge::telemetry::detector::ChangeDetector;
    ///
    /// let registry = ChannelRegistry::standard(Duration::from_secs(10));
    /// let channel = registry.get(0).unwrap();
    /// assert!(ChangeDetector.should_publish(channel, 0.0));
    /// ```
    pub fn should_publish(&self, channel: &TelemetryChannel, value: f32) -> bool {
        match channel.last_published {
            None => true,
            Some(last) => value != last,
        }
    }

    /// Record `value` as published on the channel
    pub fn record(&self, channel: &mut TelemetryChannel, value: f32) {
        channel.last_published = Some(value);
    }
}

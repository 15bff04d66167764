//! # Sensor Module
//!
//! Snapshot acquisition for the telemetry channels.
//!
//! This module handles:
//! - The [`SensorSource`] seam the scheduler samples through
//! - Deriving physical quantities from one sensor pass ([`SensorSnapshot`])
//! - Sharing one snapshot across channels firing in the same tick ([`SnapshotCache`])
//! - A deterministic host-side source for running without hardware

pub mod cache;
pub mod simulated;
pub mod snapshot;

pub use cache::SnapshotCache;
pub use simulated::SimulatedSource;
pub use snapshot::SensorSnapshot;

/// Produces one aggregated reading on demand.
///
/// Sampling is synchronous and bounded. There is no error path: a source whose
/// underlying transaction fails returns stale or zero-filled fields, which the
/// change detector treats like any other value.
#[cfg_attr(test, mockall::automock)]
pub trait SensorSource {
    /// Take one coherent reading of every sensor
    fn sample(&mut self) -> SensorSnapshot;
}

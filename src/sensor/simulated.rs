//! Simulated sensors for running the bridge on a host without the I2C bus.

use super::snapshot::{ClimateReading, ImuReading, SensorSnapshot};
use super::SensorSource;

/// Deterministic sensor source.
///
/// Values move in coarse steps so consecutive samples often repeat, which
/// exercises change-gating the way a slow-moving room climate does.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    sea_level_pa: f64,
    tick: u64,
}

impl SimulatedSource {
    /// Create a simulated source referenced to the given sea-level pressure
    pub fn new(sea_level_pa: f64) -> Self {
        Self { sea_level_pa, tick: 0 }
    }

    /// Number of samples taken so far
    pub fn samples_taken(&self) -> u64 {
        self.tick
    }

    fn noise(seed: u64) -> i32 {
        let hash = seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(0x6A09_E667);
        ((hash >> 48) % 5) as i32 - 2
    }

    fn climate(&self) -> ClimateReading {
        let step = (self.tick / 6) as f32;
        let drift = (step * 0.3).sin();

        ClimateReading {
            barometer_temperature: 24.0 + (drift * 10.0).round() / 10.0,
            pressure_pa: 100_800.0 + f64::from((drift * 4.0).round()) * 12.0,
            hygrometer: Some((24.5 + (drift * 10.0).round() / 10.0, 55.0 - (drift * 5.0).round())),
        }
    }

    fn imu(&self) -> ImuReading {
        let jitter = Self::noise(self.tick / 3) as i16;

        ImuReading {
            accel_raw: [jitter * 40, -jitter * 40, 16384 + jitter * 8],
            gyro_raw: [jitter * 131, 0, -jitter * 65],
        }
    }
}

impl SensorSource for SimulatedSource {
    fn sample(&mut self) -> SensorSnapshot {
        let snapshot = SensorSnapshot::from_readings(&self.climate(), &self.imu(), self.sea_level_pa);
        self.tick += 1;
        snapshot
    }
}

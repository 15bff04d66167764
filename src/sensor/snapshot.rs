//! # Sensor Snapshot
//!
//! One coherent set of readings from the climate sensors and the IMU.
//!
//! Register-level decoding belongs to the sensor drivers. This module starts
//! from already-compensated climate values and raw IMU counts and derives the
//! physical quantities the telemetry channels publish.

use chrono::{DateTime, Utc};

/// Default sea-level reference pressure in Pa
pub const SEA_LEVEL_PRESSURE_PA: f64 = 101_925.0;

/// Accelerometer scale at ±2 g full range (g per LSB)
pub const ACCEL_SCALE: f32 = 1.0 / 16384.0;

/// Gyroscope scale at ±250 °/s full range (°/s per LSB)
pub const GYRO_SCALE: f32 = 1.0 / 131.0;

/// Immutable reading of every published quantity, captured in one sampling call.
///
/// # Examples
///
/// ```
/// use sensor_bridge::sensor::SensorSnapshot;
///
/// let snapshot = SensorSnapshot::default();
/// assert_eq!(snapshot.temperature, 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorSnapshot {
    /// Mean of barometer and hygrometer temperatures (°C)
    pub temperature: f32,
    /// Relative humidity (%)
    pub humidity: f32,
    /// Barometric altitude (m)
    pub altitude: f32,
    /// Acceleration X (g)
    pub acceleration_x: f32,
    /// Acceleration Y (g)
    pub acceleration_y: f32,
    /// Acceleration Z (g)
    pub acceleration_z: f32,
    /// Euclidean norm of the acceleration vector (g)
    pub acceleration_magnitude: f32,
    /// Angular rate X (°/s)
    pub gyroscope_x: f32,
    /// Angular rate Y (°/s)
    pub gyroscope_y: f32,
    /// Angular rate Z (°/s)
    pub gyroscope_z: f32,
    /// Euclidean norm of the angular rate vector (°/s)
    pub gyroscope_magnitude: f32,
    /// When the sampling call completed
    pub captured_at: DateTime<Utc>,
}

/// Compensated barometer/hygrometer output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    /// Barometer temperature (°C)
    pub barometer_temperature: f32,
    /// Barometric pressure (Pa)
    pub pressure_pa: f64,
    /// Hygrometer temperature and humidity, `None` when the read failed
    pub hygrometer: Option<(f32, f32)>,
}

/// Raw IMU counts, one entry per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImuReading {
    pub accel_raw: [i16; 3],
    pub gyro_raw: [i16; 3],
}

/// Altitude above the reference pressure level using the barometric formula.
///
/// # Examples
///
/// ```
/// use sensor_bridge::sensor::snapshot::{altitude_from_pressure, SEA_LEVEL_PRESSURE_PA};
///
/// let altitude = altitude_from_pressure(SEA_LEVEL_PRESSURE_PA, SEA_LEVEL_PRESSURE_PA);
/// assert_eq!(altitude, 0.0);
/// ```
pub fn altitude_from_pressure(pressure_pa: f64, sea_level_pa: f64) -> f64 {
    44330.0 * (1.0 - (pressure_pa / sea_level_pa).powf(0.1903))
}

fn magnitude(v: [f32; 3]) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

impl SensorSnapshot {
    /// Derive a snapshot from one pass over the sensors.
    ///
    /// A failed hygrometer read contributes `0.0` to both the temperature mean
    /// and the humidity; the degraded value flows on like any other.
    pub fn from_readings(climate: &ClimateReading, imu: &ImuReading, sea_level_pa: f64) -> Self {
        let (hygro_temp, humidity) = climate.hygrometer.unwrap_or((0.0, 0.0));

        let accel = imu.accel_raw.map(|raw| raw as f32 * ACCEL_SCALE);
        let gyro = imu.gyro_raw.map(|raw| raw as f32 * GYRO_SCALE);

        Self {
            temperature: (climate.barometer_temperature + hygro_temp) / 2.0,
            humidity,
            altitude: altitude_from_pressure(climate.pressure_pa, sea_level_pa) as f32,
            acceleration_x: accel[0],
            acceleration_y: accel[1],
            acceleration_z: accel[2],
            acceleration_magnitude: magnitude(accel),
            gyroscope_x: gyro[0],
            gyroscope_y: gyro[1],
            gyroscope_z: gyro[2],
            gyroscope_magnitude: magnitude(gyro),
            captured_at: Utc::now(),
        }
    }
}

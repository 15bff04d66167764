//! # Publish Payloads
//!
//! ASCII payload formatting and the per-attempt [`PublishIntent`].

use rumqttc::QoS;

/// Payload buffer size on the device, terminator included
pub const MAX_PAYLOAD_BYTES: usize = 16;

/// Presence payload announced on the will topic after connecting
pub const PRESENCE_ONLINE: &str = "1";

/// QoS used for presence and last-will messages (at least once)
pub const PRESENCE_QOS: QoS = QoS::AtLeastOnce;

/// One publish attempt, built by the scheduler and handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishIntent {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishIntent {
    /// Telemetry publish of a single channel value
    pub fn telemetry(topic: String, value: f32, qos: QoS, retain: bool) -> Self {
        Self {
            topic,
            payload: format_payload(value),
            qos,
            retain,
        }
    }

    /// Retained "online" marker for the presence topic
    pub fn presence(topic: String) -> Self {
        Self {
            topic,
            payload: PRESENCE_ONLINE.to_string(),
            qos: PRESENCE_QOS,
            retain: true,
        }
    }
}

/// Format a channel value as ASCII decimal with two fractional digits.
///
/// Rounding follows the exact binary value, and negative values that round to
/// zero keep their sign. Non-finite values render as `nan`, `inf` and `-inf`.
/// Output longer than the device buffer is truncated to fit it.
///
/// # Examples
///
/// ```
/// use sensor_bridge::telemetry::payload::format_payload;
///
/// assert_eq!(format_payload(23.4678), "23.47");
/// assert_eq!(format_payload(-0.004), "-0.00");
/// ```
pub fn format_payload(value: f32) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    let mut text = format!("{:.2}", value);
    // Output is ASCII, so any byte index is a char boundary
    text.truncate(MAX_PAYLOAD_BYTES - 1);
    text
}

/// Map a configured QoS level (0, 1, 2) to the transport's QoS
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

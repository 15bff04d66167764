//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use rumqttc::QoS;

use crate::error::{BridgeError, Result};
use crate::telemetry::channel::ChannelRegistry;
use crate::telemetry::payload::qos_from_level;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Broker session configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Empty means `<device_name><4 hex digits>`
    #[serde(default)]
    pub client_id: String,

    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Source of the generated client id suffix
    #[serde(default)]
    pub board_id: String,

    /// Empty means `/<client_id>`
    #[serde(default)]
    pub topic_prefix: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_keep_alive_s")]
    pub keep_alive_s: u64,

    #[serde(default = "default_qos")]
    pub qos: u8,

    #[serde(default)]
    pub retain: bool,

    /// Presence topic; an empty string disables presence and the last will.
    /// Topics starting with `/` are placed under the topic prefix.
    #[serde(default = "default_will_topic")]
    pub will_topic: Option<String>,

    #[serde(default = "default_will_message")]
    pub will_message: String,

    #[serde(default)]
    pub subscriptions: Vec<String>,

    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

/// Channel timing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_poll_ceiling_ms")]
    pub poll_ceiling_ms: u64,

    /// 0 samples once per channel firing
    #[serde(default = "default_snapshot_ttl_ms")]
    pub snapshot_ttl_ms: u64,

    /// Topic suffix -> interval_ms
    #[serde(default)]
    pub overrides: HashMap<String, u64>,
}

/// Sensor configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SensorsConfig {
    #[serde(default = "default_sensor_source")]
    pub source: String,

    #[serde(default = "default_sea_level_pressure_pa")]
    pub sea_level_pressure_pa: f64,
}

/// Session-loss policy configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleConfig {
    #[serde(default = "default_on_disconnect")]
    pub on_disconnect: String,

    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for a daily rolling log file, in addition to stdout
    #[serde(default)]
    pub file_dir: Option<String>,
}

// Default value functions
fn default_host() -> String { "localhost".to_string() }
fn default_port() -> u16 { 1883 }
fn default_device_name() -> String { "pico_w".to_string() }
fn default_keep_alive_s() -> u64 { 60 }
fn default_qos() -> u8 { 1 }
fn default_will_topic() -> Option<String> { Some("/online".to_string()) }
fn default_will_message() -> String { "0".to_string() }
fn default_request_capacity() -> usize { 64 }

fn default_interval_ms() -> u64 { 10_000 }
fn default_poll_ceiling_ms() -> u64 { 10_000 }
fn default_snapshot_ttl_ms() -> u64 { 250 }

fn default_sensor_source() -> String { "simulated".to_string() }
fn default_sea_level_pressure_pa() -> f64 { 101_925.0 }

fn default_on_disconnect() -> String { "terminate".to_string() }
fn default_retry_initial_ms() -> u64 { 1000 }
fn default_retry_max_ms() -> u64 { 60_000 }

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: String::new(),
            device_name: default_device_name(),
            board_id: String::new(),
            topic_prefix: String::new(),
            username: None,
            password: None,
            keep_alive_s: default_keep_alive_s(),
            qos: default_qos(),
            retain: false,
            will_topic: default_will_topic(),
            will_message: default_will_message(),
            subscriptions: Vec::new(),
            request_capacity: default_request_capacity(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            poll_ceiling_ms: default_poll_ceiling_ms(),
            snapshot_ttl_ms: default_snapshot_ttl_ms(),
            overrides: HashMap::new(),
        }
    }
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            source: default_sensor_source(),
            sea_level_pressure_pa: default_sea_level_pressure_pa(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            on_disconnect: default_on_disconnect(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> BridgeError {
    BridgeError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sensor_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise use validated defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.host.is_empty() {
            return Err(invalid("mqtt host cannot be empty"));
        }

        if self.mqtt.port == 0 {
            return Err(invalid("mqtt port must be greater than 0"));
        }

        if self.mqtt.client_id.is_empty() && self.mqtt.device_name.is_empty() {
            return Err(invalid("device_name cannot be empty when client_id is not set"));
        }

        if self.mqtt.keep_alive_s < 5 || self.mqtt.keep_alive_s > 3600 {
            return Err(invalid("keep_alive_s must be between 5 and 3600"));
        }

        if qos_from_level(self.mqtt.qos).is_none() {
            return Err(invalid("qos must be 0, 1 or 2"));
        }

        if self.mqtt.username.is_some() != self.mqtt.password.is_some() {
            return Err(invalid("username and password must be set together"));
        }

        if self.mqtt.subscriptions.iter().any(|topic| topic.is_empty()) {
            return Err(invalid("subscription topics cannot be empty"));
        }

        if self.mqtt.request_capacity == 0 {
            return Err(invalid("request_capacity must be greater than 0"));
        }

        // Validate timing fields
        if self.scheduler.interval_ms == 0 || self.scheduler.interval_ms > 3_600_000 {
            return Err(invalid("interval_ms must be between 1 and 3600000"));
        }

        if self.scheduler.poll_ceiling_ms == 0 || self.scheduler.poll_ceiling_ms > 60_000 {
            return Err(invalid("poll_ceiling_ms must be between 1 and 60000"));
        }

        if self.scheduler.snapshot_ttl_ms > 60_000 {
            return Err(invalid("snapshot_ttl_ms must be between 0 and 60000"));
        }

        let standard = ChannelRegistry::standard(self.scheduler.interval());
        for (suffix, &interval_ms) in &self.scheduler.overrides {
            if !suffix.starts_with('/') {
                return Err(invalid(format!("override suffix {} must start with '/'", suffix)));
            }
            if standard.find(suffix).is_none() {
                let known: Vec<&str> = standard.iter().map(|c| c.suffix()).collect();
                return Err(invalid(format!(
                    "override suffix {} matches no channel (known: {})",
                    suffix,
                    known.join(", ")
                )));
            }
            if interval_ms == 0 || interval_ms > 3_600_000 {
                return Err(invalid(format!(
                    "override interval for {} must be between 1 and 3600000",
                    suffix
                )));
            }
        }

        if self.sensors.source != "simulated" {
            return Err(invalid("sensor source must be 'simulated' (only supported source)"));
        }

        if !(30_000.0..=110_000.0).contains(&self.sensors.sea_level_pressure_pa) {
            return Err(invalid("sea_level_pressure_pa must be between 30000 and 110000"));
        }

        if !["terminate", "retry"].contains(&self.lifecycle.on_disconnect.as_str()) {
            return Err(invalid("on_disconnect must be one of: terminate, retry"));
        }

        if self.lifecycle.retry_initial_ms == 0 || self.lifecycle.retry_initial_ms > self.lifecycle.retry_max_ms {
            return Err(invalid("retry_initial_ms must be between 1 and retry_max_ms"));
        }

        if self.lifecycle.retry_max_ms > 3_600_000 {
            return Err(invalid("retry_max_ms must be at most 3600000"));
        }

        if matches!(&self.logging.file_dir, Some(dir) if dir.is_empty()) {
            return Err(invalid("logging file_dir cannot be empty when set"));
        }

        Ok(())
    }
}

impl MqttConfig {
    /// Client id used for the session.
    ///
    /// When unset, the device name gets four lowercase hex characters taken
    /// from the end of `board_id`, or derived from `fallback_seed` when no
    /// board id is configured.
    pub fn resolved_client_id(&self, fallback_seed: u32) -> String {
        if !self.client_id.is_empty() {
            return self.client_id.clone();
        }

        let board: Vec<char> = self.board_id.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        let suffix = if board.len() >= 4 {
            board[board.len() - 4..].iter().collect::<String>().to_ascii_lowercase()
        } else {
            format!("{:04x}", fallback_seed & 0xFFFF)
        };
        format!("{}{}", self.device_name, suffix)
    }

    /// Prefix every telemetry topic lives under
    pub fn resolved_prefix(&self, client_id: &str) -> String {
        if self.topic_prefix.is_empty() {
            format!("/{}", client_id)
        } else {
            self.topic_prefix.clone()
        }
    }

    /// Place `/relative` topics under the prefix, leave others as they are
    pub fn resolve_topic(&self, prefix: &str, topic: &str) -> String {
        if topic.starts_with('/') {
            format!("{}{}", prefix, topic)
        } else {
            topic.to_string()
        }
    }

    /// Fully resolved presence/will topic, if presence is enabled
    pub fn presence_topic(&self, prefix: &str) -> Option<String> {
        self.will_topic
            .as_deref()
            .filter(|topic| !topic.is_empty())
            .map(|topic| self.resolve_topic(prefix, topic))
    }

    /// QoS applied to every telemetry publish
    pub fn publish_qos(&self) -> QoS {
        qos_from_level(self.qos).unwrap_or(QoS::AtLeastOnce)
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn poll_ceiling(&self) -> Duration {
        Duration::from_millis(self.poll_ceiling_ms)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_millis(self.snapshot_ttl_ms)
    }

    /// Per-suffix intervals as durations
    pub fn interval_overrides(&self) -> HashMap<String, Duration> {
        self.overrides
            .iter()
            .map(|(suffix, &ms)| (suffix.clone(), Duration::from_millis(ms)))
            .collect()
    }
}

//! # Sensor Bridge
//!
//! Publish environmental and motion sensor readings to an MQTT broker.
//!
//! Every telemetry channel publishes on its own timer, and only when its value
//! changed since the last publish.

use anyhow::Result;
use rumqttc::QoS;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use sensor_bridge::bridge::{reset_channel, Bridge, DisconnectPolicy, ExitReason};
use sensor_bridge::config::{Config, LoggingConfig};
use sensor_bridge::context::{Delivery, PublishContext, SystemClock};
use sensor_bridge::mqtt::session::{self, SessionOptions};
use sensor_bridge::mqtt::SessionSetup;
use sensor_bridge::sensor::{SimulatedSource, SnapshotCache};
use sensor_bridge::telemetry::{ChannelRegistry, PublishScheduler};

/// Configuration file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Main entry point for the sensor bridge
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, or `config/default.toml`)
///    - Set up logging, optionally mirrored to a daily rolling file
///    - Resolve client id and topic prefix, prepare the broker session
///
/// 2. **Main Loop**
///    - Connect; on acceptance publish presence and arm every channel
///    - Fire channel timers and handle session events until stopped
///
/// 3. **Shutdown**
///    - Ctrl+C unsubscribes and exits cleanly
///    - A lost or rejected session exits with an error unless the
///      lifecycle is configured to retry
///
/// # Examples
///
/// ```bash
/// RUST_LOG=debug cargo run --release -- config/default.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO sensor_bridge: Sensor Bridge v0.1.0 starting...
/// INFO sensor_bridge: Connecting to localhost:1883 as pico_w5e1a
/// INFO sensor_bridge::mqtt::lifecycle: Connected to broker
/// INFO sensor_bridge::telemetry::scheduler: Publishing 23.47 to /pico_w5e1a/temperature
/// ```
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)?;

    let _log_guard = init_logging(&config.logging);

    info!("Sensor Bridge v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", config_path);

    let client_id = config.mqtt.resolved_client_id(std::process::id());
    let prefix = config.mqtt.resolved_prefix(&client_id);
    let presence_topic = config.mqtt.presence_topic(&prefix);

    let session_options = SessionOptions {
        host: config.mqtt.host.clone(),
        port: config.mqtt.port,
        client_id: client_id.clone(),
        credentials: config.mqtt.username.clone().zip(config.mqtt.password.clone()),
        keep_alive: std::time::Duration::from_secs(config.mqtt.keep_alive_s),
        last_will: presence_topic
            .clone()
            .map(|topic| (topic, config.mqtt.will_message.clone())),
        request_capacity: config.mqtt.request_capacity,
    };
    let (transport, mut eventloop) = session::open(&session_options);

    let registry = ChannelRegistry::builder(config.scheduler.interval())
        .with_overrides(config.scheduler.interval_overrides())
        .standard_channels()
        .build();
    info!("Registered {} telemetry channels under {}", registry.len(), prefix);

    let source = SimulatedSource::new(config.sensors.sea_level_pressure_pa);
    let ctx = PublishContext::new(
        SnapshotCache::new(source, config.scheduler.snapshot_ttl()),
        transport,
        SystemClock,
        Delivery {
            prefix: prefix.clone(),
            qos: config.mqtt.publish_qos(),
            retain: config.mqtt.retain,
        },
    );

    let setup = SessionSetup {
        subscriptions: config
            .mqtt
            .subscriptions
            .iter()
            .map(|topic| config.mqtt.resolve_topic(&prefix, topic))
            .collect(),
        subscribe_qos: Some(QoS::AtLeastOnce),
        will_topic: presence_topic,
    };

    let mut bridge = Bridge::new(
        ctx,
        PublishScheduler::new(registry),
        setup,
        DisconnectPolicy::from_config(&config.lifecycle),
        config.scheduler.poll_ceiling(),
    );

    let (trigger, mut reset) = reset_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            trigger.trigger();
        }
    });

    info!("Connecting to {}:{} as {}", config.mqtt.host, config.mqtt.port, client_id);
    info!("Press Ctrl+C to exit");

    match bridge.run(&mut eventloop, &mut reset).await {
        Ok(ExitReason::Reset) => {
            let stats = bridge.scheduler().stats();
            info!(
                "Total values published: {} ({} unchanged, {} failed)",
                stats.published, stats.suppressed, stats.failed
            );
            Ok(())
        }
        Err(e) => {
            error!("Bridge stopped: {}", e);
            Err(e.into())
        }
    }
}

/// Initialize the tracing subscriber.
///
/// The returned guard must stay alive for file output to be flushed.
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    match &logging.file_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sensor-bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stdout.and(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

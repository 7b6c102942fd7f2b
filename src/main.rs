//! Climate Logger - change-triggered sensor readings over MQTT
//!
//! This service samples a temperature/humidity sensor once per loop tick,
//! publishes every changed reading to the broker, and replays readings that
//! failed to publish as a single batch until the broker acknowledges them.
//!
//! ## Features
//!
//! - Change detection against the last produced sample
//! - QoS 1 publishing with acknowledgement timeouts
//! - At-least-once delivery through the retry buffer
//! - Graceful shutdown on Ctrl+C
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `CLIMATE_LOGGER_MQTT_HOST`: Broker host (default: mqtt.netpie.io)
//! - `CLIMATE_LOGGER_MQTT_PORT`: Broker port (default: 1883)
//! - `CLIMATE_LOGGER_MQTT_CLIENT_ID`, `_USERNAME`, `_PASSWORD`: Broker identity
//! - `CLIMATE_LOGGER_LOOP_INTERVAL_MS`: Loop tick duration (default: 1000)
//! - `CLIMATE_LOGGER_BUFFER_CAPACITY`: Retry buffer cap (default: unbounded)
//! - `RUST_LOG`: Logging level filter (default: info)

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use climate_logger::channel::{MqttChannel, MqttSettings};
use climate_logger::clock::{NetworkClock, SystemTimeAuthority};
use climate_logger::config::Config;
use climate_logger::driver::LoopDriver;
use climate_logger::indicator::LogIndicator;
use climate_logger::pipeline::{PipelineSettings, ReadingPipeline};
use climate_logger::sensor::{SimulatedSensor, SimulatedSensorConfig};

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting Climate Logger...");

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                broker = %format!("{}:{}", config.mqtt_host, config.mqtt_port),
                client_id = %config.credentials.client_id,
                topic_single = %config.topic_single,
                topic_batch = %config.topic_batch,
                loop_interval_ms = config.loop_interval.as_millis() as u64,
                buffer_capacity = ?config.buffer_capacity,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let channel = MqttChannel::new(MqttSettings::from_config(&config));
    info!(broker = %channel.broker(), "MQTT channel initialized");

    let clock = NetworkClock::new(
        SystemTimeAuthority,
        config.clock_offset_secs,
        config.clock_update_interval,
    );

    let sensor = SimulatedSensor::new(SimulatedSensorConfig {
        failure_rate: config.sensor_failure_rate,
        ..SimulatedSensorConfig::default()
    });
    info!(failure_rate = config.sensor_failure_rate, "Simulated sensor initialized");

    let settings = PipelineSettings::from_config(&config);
    let mut pipeline =
        ReadingPipeline::new(sensor, clock, channel, LogIndicator::default(), settings);

    info!("Climate Logger running. Press Ctrl+C to stop.");
    let driver = LoopDriver::new(config.loop_interval);
    let iterations = driver.run(&mut pipeline, shutdown_signal()).await;

    let pending = pipeline.buffer().len();
    if pending > 0 {
        info!(pending = pending, "Readings left undelivered at shutdown");
    }
    info!(
        iterations = iterations,
        published = pipeline.stats().singles_published,
        "Climate Logger stopped"
    );
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Resolve once Ctrl+C is received.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping...");
        }
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

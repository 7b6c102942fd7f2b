//! Climate Logger Library
//!
//! This library provides the components of a temperature/humidity logger that
//! publishes change-triggered readings to an MQTT broker and replays
//! undelivered readings as batches:
//!
//! - **config**: Environment-based configuration for the logger
//! - **reading**: Samples, timestamped readings and the heat index
//! - **sensor**: Sensor seam and a simulated DHT11-like sensor
//! - **clock**: Epoch clock periodically resynced from a time authority
//! - **channel**: Delivery channel seam and the MQTT implementation
//! - **payload**: JSON documents for the single and batch topics
//! - **buffer**: Retry buffer of readings awaiting a batch publish
//! - **indicator**: Status indicator seam
//! - **pipeline**: Change detection, delivery and batch replay
//! - **driver**: Fixed-cadence loop running the pipeline
//!
//! # Example
//!
//! ```no_run
//! use climate_logger::channel::{MqttChannel, MqttSettings};
//! use climate_logger::clock::{NetworkClock, SystemTimeAuthority};
//! use climate_logger::config::Config;
//! use climate_logger::driver::LoopDriver;
//! use climate_logger::indicator::LogIndicator;
//! use climate_logger::pipeline::{PipelineSettings, ReadingPipeline};
//! use climate_logger::sensor::{SimulatedSensor, SimulatedSensorConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Load configuration from environment
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     let mut pipeline = ReadingPipeline::new(
//!         SimulatedSensor::new(SimulatedSensorConfig::default()),
//!         NetworkClock::new(SystemTimeAuthority, 0, config.clock_update_interval),
//!         MqttChannel::new(MqttSettings::from_config(&config)),
//!         LogIndicator::default(),
//!         PipelineSettings::from_config(&config),
//!     );
//!
//!     // Sample, publish and replay until Ctrl+C
//!     let driver = LoopDriver::new(config.loop_interval);
//!     driver
//!         .run(&mut pipeline, async {
//!             tokio::signal::ctrl_c().await.ok();
//!         })
//!         .await;
//! }
//! ```

// Module declarations
pub mod buffer;
pub mod channel;
pub mod clock;
pub mod config;
pub mod driver;
pub mod indicator;
pub mod payload;
pub mod pipeline;
pub mod reading;
pub mod sensor;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types at crate root for convenience
pub use buffer::{BufferConfig, BufferStats, RetryBuffer};
pub use channel::{ChannelError, Credentials, DeliveryChannel, MqttChannel, MqttSettings};
pub use clock::{Clock, ClockError, NetworkClock, SystemTimeAuthority, TimeAuthority};
pub use config::{Config, ConfigError};
pub use driver::LoopDriver;
pub use indicator::{Indicator, LogIndicator};
pub use payload::{BatchPayload, PayloadError, SinglePayload};
pub use pipeline::{FlushOutcome, PipelineSettings, PipelineStats, ReadingPipeline, TickOutcome};
pub use reading::{heat_index, Reading, Sample};
pub use sensor::{SensorError, SensorReader, SimulatedSensor, SimulatedSensorConfig};

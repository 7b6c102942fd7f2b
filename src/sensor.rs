//! Sensor capability and a simulated DHT11-style sensor.
//!
//! The pipeline only depends on [`SensorReader`]; hardware drivers live
//! outside this crate. [`SimulatedSensor`] stands in for the DHT11 on hosts
//! without one: whole-degree, whole-percent values drifting slowly, with an
//! occasional failed read.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::reading::{heat_index, Sample};

/// Errors a sensor read can report.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorError {
    /// The sensor did not answer (timeout, checksum mismatch, bus error)
    NotAvailable,

    /// The sensor answered with a value that is not a number
    InvalidSample(Sample),
}

impl std::fmt::Display for SensorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorError::NotAvailable => write!(f, "Sensor not available"),
            SensorError::InvalidSample(sample) => {
                write!(f, "Sensor returned invalid sample ({})", sample)
            }
        }
    }
}

impl std::error::Error for SensorError {}

/// A temperature/humidity sensor.
#[async_trait]
pub trait SensorReader: Send {
    /// Take one sample.
    async fn read(&mut self) -> Result<Sample, SensorError>;

    /// Heat index in Celsius for a sample taken by this sensor.
    fn heat_index(&self, sample: &Sample) -> f32 {
        heat_index(sample.temperature, sample.humidity)
    }
}

/// Configuration for the simulated sensor.
#[derive(Debug, Clone)]
pub struct SimulatedSensorConfig {
    /// Probability (0.0 - 1.0) that a read fails
    pub failure_rate: f64,

    /// Probability (0.0 - 1.0) that a value drifts by one step on a read
    pub drift_rate: f64,

    /// Inclusive temperature range in degrees Celsius
    pub temperature_range: (i32, i32),

    /// Inclusive humidity range in percent
    pub humidity_range: (i32, i32),
}

impl Default for SimulatedSensorConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.02,
            drift_rate: 0.1,
            temperature_range: (18, 32),
            humidity_range: (30, 80),
        }
    }
}

/// DHT11-like sensor producing a slow random walk.
pub struct SimulatedSensor {
    config: SimulatedSensorConfig,
    rng: StdRng,
    temperature: i32,
    humidity: i32,
}

impl SimulatedSensor {
    /// Create a simulated sensor seeded from the OS.
    pub fn new(config: SimulatedSensorConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create a reproducible simulated sensor.
    pub fn with_seed(config: SimulatedSensorConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SimulatedSensorConfig, mut rng: StdRng) -> Self {
        let (t_min, t_max) = config.temperature_range;
        let (h_min, h_max) = config.humidity_range;
        let temperature = rng.gen_range(t_min..=t_max.max(t_min));
        let humidity = rng.gen_range(h_min..=h_max.max(h_min));

        Self {
            config,
            rng,
            temperature,
            humidity,
        }
    }

    fn drift(&mut self, value: i32, (min, max): (i32, i32)) -> i32 {
        if !self.rng.gen_bool(self.config.drift_rate.clamp(0.0, 1.0)) {
            return value;
        }
        let step = if self.rng.gen_bool(0.5) { 1 } else { -1 };
        (value + step).clamp(min, max.max(min))
    }
}

#[async_trait]
impl SensorReader for SimulatedSensor {
    async fn read(&mut self) -> Result<Sample, SensorError> {
        if self.rng.gen_bool(self.config.failure_rate.clamp(0.0, 1.0)) {
            return Err(SensorError::NotAvailable);
        }

        self.temperature = self.drift(self.temperature, self.config.temperature_range);
        self.humidity = self.drift(self.humidity, self.config.humidity_range);

        Ok(Sample::new(self.temperature as f32, self.humidity as f32))
    }
}

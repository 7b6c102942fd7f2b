//! Reading types produced by the sampling pipeline.
//!
//! A [`Sample`] is what the sensor hands back; a [`Reading`] is a sample that
//! passed change detection, stamped with the clock and enriched with the
//! heat index. Readings are immutable once built.

use serde::{Deserialize, Serialize};

/// Raw temperature/humidity pair as returned by a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    /// Temperature in degrees Celsius
    pub temperature: f32,

    /// Relative humidity in percent
    pub humidity: f32,
}

impl Sample {
    /// Create a new sample.
    pub fn new(temperature: f32, humidity: f32) -> Self {
        Self {
            temperature,
            humidity,
        }
    }

    /// A sample is usable only when both fields are finite numbers.
    pub fn is_valid(&self) -> bool {
        self.temperature.is_finite() && self.humidity.is_finite()
    }
}

impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}°C {:.1}%", self.temperature, self.humidity)
    }
}

/// One timestamped sample with its derived heat index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Seconds since the Unix epoch at sampling time
    pub timestamp: u64,

    /// Temperature in degrees Celsius
    pub temperature: f32,

    /// Relative humidity in percent
    pub humidity: f32,

    /// Heat index in degrees Celsius
    pub heat_index: f32,
}

impl Reading {
    /// Build a reading from a sample and the heat index derived from it.
    pub fn new(timestamp: u64, sample: Sample, heat_index: f32) -> Self {
        Self {
            timestamp,
            temperature: sample.temperature,
            humidity: sample.humidity,
            heat_index,
        }
    }

    /// Seconds elapsed between this reading and `now`.
    ///
    /// Saturates at zero when the clock has been resynchronized backwards
    /// since the reading was taken.
    pub fn age_at(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp)
    }
}

fn celsius_to_fahrenheit(c: f32) -> f32 {
    c * 1.8 + 32.0
}

fn fahrenheit_to_celsius(f: f32) -> f32 {
    (f - 32.0) * 0.555_555_6
}

/// Compute the heat index in Celsius from a Celsius temperature and relative humidity.
///
/// Uses Steadman's simple formula, switching to the Rothfusz regression (with
/// the NWS low/high humidity adjustments) once the simple result reaches 80°F.
pub fn heat_index(temperature: f32, humidity: f32) -> f32 {
    let t = celsius_to_fahrenheit(temperature);
    let rh = humidity;

    let mut hi = 0.5 * (t + 61.0 + ((t - 68.0) * 1.2) + (rh * 0.094));

    if hi > 79.0 {
        hi = -42.379 + 2.049_015_2 * t + 10.143_331 * rh
            - 0.224_755_41 * t * rh
            - 0.006_837_83 * t.powi(2)
            - 0.054_817_17 * rh.powi(2)
            + 0.001_228_74 * t.powi(2) * rh
            + 0.000_852_82 * t * rh.powi(2)
            - 0.000_001_99 * t.powi(2) * rh.powi(2);

        if rh < 13.0 && (80.0..=112.0).contains(&t) {
            hi -= ((13.0 - rh) * 0.25) * ((17.0 - (t - 95.0).abs()) * 0.058_82).sqrt();
        } else if rh > 85.0 && (80.0..=87.0).contains(&t) {
            hi += ((rh - 85.0) * 0.1) * ((87.0 - t) * 0.2);
        }
    }

    fahrenheit_to_celsius(hi)
}

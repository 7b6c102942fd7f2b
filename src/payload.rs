//! Wire documents published to the broker.
//!
//! Two shapes exist, one per topic:
//!
//! - single: `{"data":{"time":..,"temp":..,"humid":..,"index":..}}`
//! - batch:  `{"batch":[{"data":{..},"ts":<age-seconds>}, ..]}`
//!
//! Encoded documents must fit in the transport buffer; [`encode`] refuses
//! anything larger than the given limit.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::reading::Reading;

/// Transport buffer size of the broker connection, in bytes.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 16_383;

/// The `data` object shared by both document shapes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadingData {
    pub time: u64,
    pub temp: f32,
    pub humid: f32,
    pub index: f32,
}

impl From<&Reading> for ReadingData {
    fn from(reading: &Reading) -> Self {
        Self {
            time: reading.timestamp,
            temp: reading.temperature,
            humid: reading.humidity,
            index: reading.heat_index,
        }
    }
}

/// Document published on the single-update topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinglePayload {
    pub data: ReadingData,
}

impl SinglePayload {
    pub fn new(reading: &Reading) -> Self {
        Self {
            data: reading.into(),
        }
    }
}

/// One buffered reading inside a batch, annotated with its age.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub data: ReadingData,

    /// Seconds between the reading's timestamp and the flush time
    pub ts: u64,
}

/// Document published on the batch-update topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub batch: Vec<BatchItem>,
}

impl BatchPayload {
    /// Build a batch from buffered readings, computing every age against `now`.
    ///
    /// Order is preserved. Ages saturate at zero if the clock went backwards.
    pub fn new(readings: &[Reading], now: u64) -> Self {
        let batch = readings
            .iter()
            .map(|reading| {
                if reading.timestamp > now {
                    warn!(
                        reading_time = reading.timestamp,
                        now = now,
                        "Reading is newer than the clock, clamping age to zero"
                    );
                }
                BatchItem {
                    data: reading.into(),
                    ts: reading.age_at(now),
                }
            })
            .collect();

        Self { batch }
    }

    /// Get the number of readings in the batch.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

/// Errors that can occur while encoding a payload.
#[derive(Debug)]
pub enum PayloadError {
    /// JSON serialization failed
    Serialize(serde_json::Error),

    /// Encoded document does not fit in the transport buffer
    TooLarge { size: usize, max: usize },
}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadError::Serialize(e) => write!(f, "Failed to serialize payload: {}", e),
            PayloadError::TooLarge { size, max } => {
                write!(f, "Payload of {} bytes exceeds maximum of {} bytes", size, max)
            }
        }
    }
}

impl std::error::Error for PayloadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PayloadError::Serialize(e) => Some(e),
            PayloadError::TooLarge { .. } => None,
        }
    }
}

impl From<serde_json::Error> for PayloadError {
    fn from(err: serde_json::Error) -> Self {
        PayloadError::Serialize(err)
    }
}

/// Serialize a document, refusing results larger than `max_bytes`.
pub fn encode<T: Serialize>(document: &T, max_bytes: usize) -> Result<Vec<u8>, PayloadError> {
    let bytes = serde_json::to_vec(document)?;
    if bytes.len() > max_bytes {
        return Err(PayloadError::TooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }
    Ok(bytes)
}

/// Encode one reading for the single-update topic.
pub fn encode_single(reading: &Reading, max_bytes: usize) -> Result<Vec<u8>, PayloadError> {
    encode(&SinglePayload::new(reading), max_bytes)
}

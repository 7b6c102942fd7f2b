//! Retry buffer for readings that failed to publish.
//!
//! Readings enter the buffer only after an individual publish failed, and
//! leave it only when a batch containing every buffered reading has been
//! confirmed by the broker. There is no partial flush: a failed batch leaves
//! the buffer exactly as it was.
//!
//! The buffer is unbounded unless [`BufferConfig::max_capacity`] is set, in
//! which case the oldest reading is evicted to make room for a new one.

use tracing::{debug, warn};

use crate::payload::BatchPayload;
use crate::reading::Reading;

/// Configuration for the retry buffer.
#[derive(Debug, Clone, Default)]
pub struct BufferConfig {
    /// Maximum number of readings to hold; `None` keeps every reading
    pub max_capacity: Option<usize>,
}

impl BufferConfig {
    /// Unbounded buffer.
    pub fn unbounded() -> Self {
        Self { max_capacity: None }
    }

    /// Buffer that drops its oldest reading once `max_capacity` is reached.
    pub fn capped(max_capacity: usize) -> Self {
        Self {
            max_capacity: Some(max_capacity.max(1)),
        }
    }
}

/// Statistics about buffer operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Total number of readings appended after a failed publish
    pub readings_buffered: u64,

    /// Total number of readings delivered as part of a batch
    pub readings_flushed: u64,

    /// Total number of readings evicted by the capacity limit
    pub readings_dropped: u64,

    /// Number of batches confirmed by the broker
    pub batches_flushed: u64,

    /// Number of batch attempts that failed and left the buffer intact
    pub batches_failed: u64,
}

/// Ordered, in-memory store of undelivered readings.
#[derive(Debug, Default)]
pub struct RetryBuffer {
    /// Buffered readings in chronological (insertion) order
    readings: Vec<Reading>,

    /// Configuration for the buffer
    config: BufferConfig,

    /// Statistics about buffer operations
    stats: BufferStats,
}

impl RetryBuffer {
    /// Create a new retry buffer with the given configuration.
    pub fn new(config: BufferConfig) -> Self {
        Self {
            readings: Vec::new(),
            config,
            stats: BufferStats::default(),
        }
    }

    /// Append a reading whose individual publish failed.
    pub fn push(&mut self, reading: Reading) {
        self.stats.readings_buffered += 1;

        if let Some(max_capacity) = self.config.max_capacity {
            if self.readings.len() >= max_capacity {
                let dropped = self.readings.remove(0);
                self.stats.readings_dropped += 1;
                warn!(
                    buffer_size = self.readings.len() + 1,
                    max_capacity = max_capacity,
                    dropped_time = dropped.timestamp,
                    "Retry buffer full: dropping oldest reading"
                );
            }
        }

        self.readings.push(reading);
        debug!(buffer_size = self.readings.len(), "Reading added to retry buffer");
    }

    /// Build the batch document for every buffered reading, with ages computed against `now`.
    ///
    /// The buffer itself is not modified.
    pub fn batch(&self, now: u64) -> BatchPayload {
        BatchPayload::new(&self.readings, now)
    }

    /// Record a confirmed batch publish and clear the whole buffer.
    ///
    /// Returns the number of readings that were delivered.
    pub fn commit_flush(&mut self) -> usize {
        let flushed = self.readings.len();
        self.readings.clear();
        self.stats.readings_flushed += flushed as u64;
        self.stats.batches_flushed += 1;
        flushed
    }

    /// Record a failed batch publish. The buffered readings stay untouched.
    pub fn record_failed_flush(&mut self) {
        self.stats.batches_failed += 1;
    }

    /// Buffered readings in insertion order.
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Get the current number of readings in the buffer.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Get current buffer statistics.
    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }
}

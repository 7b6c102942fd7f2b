//! Sampling and delivery pipeline.
//!
//! [`ReadingPipeline`] owns every piece of mutable state of the logger: the
//! last observed sample used for change detection, and the retry buffer of
//! readings the broker has not confirmed yet. Each loop tick calls
//! [`ReadingPipeline::tick`] followed by [`ReadingPipeline::flush`].
//!
//! Delivery is at-least-once: a reading is either acknowledged as a single
//! message, or kept in the retry buffer until a batch containing it is
//! acknowledged. A batch is all-or-nothing.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferConfig, BufferStats, RetryBuffer};
use crate::channel::{ChannelError, Credentials, DeliveryChannel};
use crate::clock::Clock;
use crate::config::Config;
use crate::indicator::Indicator;
use crate::payload::{self, encode_single};
use crate::reading::{Reading, Sample};
use crate::sensor::{SensorError, SensorReader};

/// How long the indicator stays on after a change-triggered publish.
const DEFAULT_PUBLISH_HOLD: Duration = Duration::from_millis(100);

/// Fixed delays used by the pipeline.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Hold after a failed reconnect before control returns to the caller
    pub reconnect_hold: Duration,

    /// Cooldown after a failed sensor read; half with the indicator on
    pub sensor_cooldown: Duration,

    /// Indicator hold after a change-triggered publish
    pub publish_hold: Duration,
}

impl Timing {
    /// Delays derived from the loop interval: the sensor cooldown spans two intervals.
    pub fn for_loop_interval(loop_interval: Duration) -> Self {
        Self {
            reconnect_hold: loop_interval,
            sensor_cooldown: loop_interval * 2,
            publish_hold: DEFAULT_PUBLISH_HOLD,
        }
    }
}

/// Static settings of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub topic_single: String,
    pub topic_batch: String,
    pub max_payload_bytes: usize,
    pub credentials: Credentials,
    pub timing: Timing,
    pub buffer: BufferConfig,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            topic_single: config.topic_single.clone(),
            topic_batch: config.topic_batch.clone(),
            max_payload_bytes: config.max_payload_bytes,
            credentials: config.credentials.clone(),
            timing: Timing::for_loop_interval(config.loop_interval),
            buffer: match config.buffer_capacity {
                Some(capacity) => BufferConfig::capped(capacity),
                None => BufferConfig::unbounded(),
            },
        }
    }
}

/// What a tick did with the current sample.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The sensor failed; no reading was produced
    SensorFailed,

    /// The sample equals the last observed one; nothing was published
    Unchanged,

    /// A new reading was acknowledged by the broker
    Published(Reading),

    /// A new reading failed to publish and was added to the retry buffer
    Buffered(Reading),
}

/// What a flush did with the retry buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered
    Empty,

    /// The batch was acknowledged; this many readings left the buffer
    Flushed(usize),

    /// The batch failed; this many readings remain buffered
    Failed(usize),
}

/// Statistics about pipeline operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Number of ticks run
    pub ticks: u64,

    /// Number of ticks aborted by a sensor failure
    pub sensor_failures: u64,

    /// Number of ticks whose sample matched the last observed one
    pub unchanged_samples: u64,

    /// Number of readings acknowledged as single messages
    pub singles_published: u64,

    /// Number of single publishes that failed
    pub singles_failed: u64,

    /// Number of connect handshakes attempted
    pub reconnect_attempts: u64,

    /// Number of connect handshakes that failed
    pub reconnect_failures: u64,
}

/// Change-triggered sampler with at-least-once delivery.
pub struct ReadingPipeline<S, K, C, I> {
    sensor: S,
    clock: K,
    channel: C,
    indicator: I,
    settings: PipelineSettings,

    /// Readings awaiting a successful batch publish
    buffer: RetryBuffer,

    /// Last sample that produced a reading
    last_observed: Sample,

    stats: PipelineStats,
}

impl<S, K, C, I> ReadingPipeline<S, K, C, I>
where
    S: SensorReader,
    K: Clock,
    C: DeliveryChannel,
    I: Indicator,
{
    pub fn new(sensor: S, clock: K, channel: C, indicator: I, settings: PipelineSettings) -> Self {
        let buffer = RetryBuffer::new(settings.buffer.clone());
        Self {
            sensor,
            clock,
            channel,
            indicator,
            settings,
            buffer,
            last_observed: Sample::default(),
            stats: PipelineStats::default(),
        }
    }

    /// Sample once and deliver the reading if the sample changed.
    pub async fn tick(&mut self) -> TickOutcome {
        self.stats.ticks += 1;
        self.clock.update().await;

        let sample = match self.sensor.read().await {
            Ok(sample) if sample.is_valid() => sample,
            Ok(sample) => return self.sensor_failed(SensorError::InvalidSample(sample)).await,
            Err(e) => return self.sensor_failed(e).await,
        };

        if sample == self.last_observed {
            self.stats.unchanged_samples += 1;
            return TickOutcome::Unchanged;
        }

        self.indicator.set(true);
        self.last_observed = sample;

        let reading = Reading::new(
            self.clock.epoch_time(),
            sample,
            self.sensor.heat_index(&sample),
        );
        info!(
            time = reading.timestamp,
            temperature = reading.temperature,
            humidity = reading.humidity,
            heat_index = reading.heat_index,
            "New reading"
        );

        let outcome = match self.publish_single(&reading).await {
            Ok(()) => {
                self.stats.singles_published += 1;
                debug!(time = reading.timestamp, "Reading published");
                TickOutcome::Published(reading)
            }
            Err(e) => {
                self.stats.singles_failed += 1;
                self.buffer.push(reading);
                warn!(
                    error = %e,
                    buffered = self.buffer.len(),
                    "Failed to publish reading, added to retry buffer"
                );
                TickOutcome::Buffered(reading)
            }
        };

        sleep(self.settings.timing.publish_hold).await;
        self.indicator.set(false);

        outcome
    }

    /// Publish every buffered reading as one batch; clear the buffer only on success.
    pub async fn flush(&mut self) -> FlushOutcome {
        if self.buffer.is_empty() {
            return FlushOutcome::Empty;
        }

        let now = self.clock.epoch_time();
        let batch = self.buffer.batch(now);
        let pending = batch.len();
        debug!(pending = pending, now = now, "Retrying buffered readings as a batch");

        let result = match payload::encode(&batch, self.settings.max_payload_bytes) {
            Ok(bytes) => {
                let topic = self.settings.topic_batch.clone();
                self.deliver(&topic, &bytes).await
            }
            Err(e) => Err(ChannelError::from(e)),
        };

        match result {
            Ok(()) => {
                let flushed = self.buffer.commit_flush();
                info!(readings = flushed, "Batch published, retry buffer cleared");
                FlushOutcome::Flushed(flushed)
            }
            Err(e) => {
                self.buffer.record_failed_flush();
                if e.is_transient() {
                    warn!(error = %e, pending = pending, "Failed to publish batch, keeping buffer");
                } else {
                    error!(error = %e, pending = pending, "Batch cannot be published, keeping buffer");
                }
                FlushOutcome::Failed(pending)
            }
        }
    }

    /// Attempt one connect handshake with the configured credentials.
    ///
    /// On failure the indicator is held on for one reconnect hold and control
    /// returns; the next attempt happens when the next publish needs it.
    pub async fn reconnect(&mut self) -> bool {
        self.stats.reconnect_attempts += 1;

        match self.channel.connect(&self.settings.credentials).await {
            Ok(()) => {
                info!("Broker connection established");
                true
            }
            Err(e) => {
                self.stats.reconnect_failures += 1;
                warn!(error = %e, "Failed to connect to broker, retrying on next publish");
                self.indicator.set(true);
                sleep(self.settings.timing.reconnect_hold).await;
                self.indicator.set(false);
                false
            }
        }
    }

    async fn publish_single(&mut self, reading: &Reading) -> Result<(), ChannelError> {
        let bytes = encode_single(reading, self.settings.max_payload_bytes)?;
        let topic = self.settings.topic_single.clone();
        self.deliver(&topic, &bytes).await
    }

    /// Reconnect if needed, then publish.
    async fn deliver(&mut self, topic: &str, payload: &[u8]) -> Result<(), ChannelError> {
        if !self.channel.is_connected() {
            self.reconnect().await;
        }
        self.channel.publish(topic, payload).await
    }

    async fn sensor_failed(&mut self, error: SensorError) -> TickOutcome {
        self.stats.sensor_failures += 1;
        warn!(error = %error, "Sensor read failed");

        let cooldown = self.settings.timing.sensor_cooldown;
        let lit = cooldown / 2;
        self.indicator.set(true);
        sleep(lit).await;
        self.indicator.set(false);
        sleep(cooldown - lit).await;

        TickOutcome::SensorFailed
    }

    /// Readings awaiting a successful batch publish.
    pub fn buffer(&self) -> &RetryBuffer {
        &self.buffer
    }

    /// Get current buffer statistics.
    pub fn buffer_stats(&self) -> &BufferStats {
        self.buffer.stats()
    }

    /// Last sample that produced a reading.
    pub fn last_observed(&self) -> Sample {
        self.last_observed
    }

    /// Get current pipeline statistics.
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

//! Fixed-cadence loop driving the pipeline.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::channel::DeliveryChannel;
use crate::clock::Clock;
use crate::indicator::Indicator;
use crate::pipeline::{FlushOutcome, ReadingPipeline, TickOutcome};
use crate::sensor::SensorReader;

/// Interval between progress reports.
const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Runs one tick and one flush per loop interval.
#[derive(Debug, Clone)]
pub struct LoopDriver {
    interval: Duration,
    report_interval: Duration,
}

impl LoopDriver {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }

    /// One loop iteration: tick, then flush whatever is buffered.
    ///
    /// A sensor failure aborts the iteration, so no flush is attempted.
    pub async fn step<S, K, C, I>(
        &self,
        pipeline: &mut ReadingPipeline<S, K, C, I>,
    ) -> (TickOutcome, Option<FlushOutcome>)
    where
        S: SensorReader,
        K: Clock,
        C: DeliveryChannel,
        I: Indicator,
    {
        let tick = pipeline.tick().await;
        if tick == TickOutcome::SensorFailed {
            return (tick, None);
        }
        let flush = pipeline.flush().await;
        (tick, Some(flush))
    }

    /// Run iterations until `shutdown` resolves, returning the number of iterations.
    ///
    /// Shutdown is only observed between iterations, so an iteration in
    /// progress always completes. An iteration aborted by a sensor failure is
    /// already paced by its cooldown and skips the interval wait; a pending
    /// shutdown is still honored there.
    pub async fn run<S, K, C, I, F>(
        &self,
        pipeline: &mut ReadingPipeline<S, K, C, I>,
        shutdown: F,
    ) -> u64
    where
        S: SensorReader,
        K: Clock,
        C: DeliveryChannel,
        I: Indicator,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut iterations: u64 = 0;
        let mut last_report_time = Instant::now();

        loop {
            let (tick, flush) = self.step(pipeline).await;
            iterations += 1;
            debug!(iteration = iterations, tick = ?tick, flush = ?flush, "Loop iteration complete");

            if last_report_time.elapsed() >= self.report_interval {
                let stats = pipeline.stats();
                let buffer_stats = pipeline.buffer_stats();
                info!(
                    iterations = iterations,
                    published = stats.singles_published,
                    unchanged = stats.unchanged_samples,
                    sensor_failures = stats.sensor_failures,
                    buffered = pipeline.buffer().len(),
                    batches_flushed = buffer_stats.batches_flushed,
                    batches_failed = buffer_stats.batches_failed,
                    "Logger progress"
                );
                last_report_time = Instant::now();
            }

            let pacing = if tick == TickOutcome::SensorFailed {
                Duration::ZERO
            } else {
                self.interval
            };

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(iterations = iterations, "Shutdown requested, loop stopping");
                    break;
                }
                _ = sleep(pacing) => {}
            }
        }

        iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferConfig;
    use crate::channel::Credentials;
    use crate::payload::DEFAULT_MAX_PAYLOAD_BYTES;
    use crate::pipeline::{PipelineSettings, Timing};
    use crate::reading::Sample;
    use crate::sensor::SensorError;
    use crate::testing::{ManualClock, MockChannel, RecordingIndicator, ScriptedSensor};

    fn settings() -> PipelineSettings {
        PipelineSettings {
            topic_single: "single".to_string(),
            topic_batch: "batch".to_string(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            credentials: Credentials::new("test-device"),
            timing: Timing::for_loop_interval(Duration::from_secs(1)),
            buffer: BufferConfig::unbounded(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() {
        let channel = MockChannel::connected();
        let mut pipeline = ReadingPipeline::new(
            ScriptedSensor::samples(&[(20.0, 50.0), (21.0, 50.0), (21.0, 50.0)]),
            ManualClock::at(0),
            channel.clone(),
            RecordingIndicator::default(),
            settings(),
        );
        let driver = LoopDriver::new(Duration::from_secs(1));

        // Iterations start at 0.0, 1.1, 2.2 and 3.2 seconds.
        let iterations = driver
            .run(&mut pipeline, sleep(Duration::from_millis(3_500)))
            .await;

        assert_eq!(iterations, 4);
        assert_eq!(pipeline.stats().ticks, 4);
        assert_eq!(pipeline.stats().singles_published, 2);
        assert_eq!(channel.state().delivered().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_cooldown_paces_loop() {
        let mut pipeline = ReadingPipeline::new(
            ScriptedSensor::new(vec![Err(SensorError::NotAvailable)]),
            ManualClock::at(0),
            MockChannel::connected(),
            RecordingIndicator::default(),
            settings(),
        );
        let driver = LoopDriver::new(Duration::from_secs(1));

        // Iterations span 0-2, 2-4 and 4-6 s with no pacing in between.
        let start = Instant::now();
        let iterations = driver
            .run(&mut pipeline, sleep(Duration::from_millis(5_500)))
            .await;

        assert_eq!(iterations, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        assert_eq!(pipeline.stats().sensor_failures, 3);
        assert!(pipeline.buffer().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_failure_skips_flush() {
        let channel = MockChannel::connected().with_publish_script(&[false, false]);
        let mut pipeline = ReadingPipeline::new(
            ScriptedSensor::new(vec![
                Ok(Sample::new(20.0, 50.0)),
                Err(SensorError::NotAvailable),
            ]),
            ManualClock::at(10),
            channel.clone(),
            RecordingIndicator::default(),
            settings(),
        );
        let driver = LoopDriver::new(Duration::from_secs(1));

        let (tick, flush) = driver.step(&mut pipeline).await;
        assert!(matches!(tick, TickOutcome::Buffered(_)));
        assert_eq!(flush, Some(FlushOutcome::Failed(1)));
        let attempts_before = channel.state().attempts.len();

        let (tick, flush) = driver.step(&mut pipeline).await;

        assert_eq!(tick, TickOutcome::SensorFailed);
        assert_eq!(flush, None);
        assert_eq!(channel.state().attempts.len(), attempts_before);
        assert_eq!(pipeline.buffer().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_flushes_after_tick() {
        let channel = MockChannel::connected().with_publish_script(&[false]);
        let mut pipeline = ReadingPipeline::new(
            ScriptedSensor::new(vec![Ok(Sample::new(20.0, 50.0))]),
            ManualClock::at(10),
            channel.clone(),
            RecordingIndicator::default(),
            settings(),
        );
        let driver = LoopDriver::new(Duration::from_secs(1));

        let (tick, flush) = driver.step(&mut pipeline).await;

        assert!(matches!(tick, TickOutcome::Buffered(_)));
        assert_eq!(flush, Some(FlushOutcome::Flushed(1)));

        let state = channel.state();
        let topics: Vec<&str> = state.attempts.iter().map(|a| a.topic.as_str()).collect();
        assert_eq!(topics, vec!["single", "batch"]);
    }

    #[test]
    fn test_default_report_interval() {
        let driver = LoopDriver::new(Duration::from_secs(1));
        assert_eq!(driver.report_interval, Duration::from_secs(30));
        assert_eq!(driver.interval, Duration::from_secs(1));
    }
}

//! Epoch clock refreshed from a time authority.
//!
//! [`NetworkClock`] mirrors how an NTP client behaves on a microcontroller:
//! it asks its [`TimeAuthority`] for the time at most once per update
//! interval, and in between extrapolates from the last sync with the local
//! monotonic clock. A failed sync keeps the previous value, so readings are
//! stamped with stale (but still advancing) time rather than blocking, and is
//! retried on the next update until one succeeds.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Errors a time authority can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    /// The authority could not be reached
    Unavailable(String),

    /// The authority returned a time before the Unix epoch
    OutOfRange(i64),
}

impl std::fmt::Display for ClockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockError::Unavailable(reason) => write!(f, "Time authority unavailable: {}", reason),
            ClockError::OutOfRange(secs) => write!(f, "Time {} is before the Unix epoch", secs),
        }
    }
}

impl std::error::Error for ClockError {}

/// Something that can tell the current Unix time in seconds.
#[async_trait]
pub trait TimeAuthority: Send {
    async fn fetch_epoch(&mut self) -> Result<i64, ClockError>;
}

/// Time authority backed by the host's system clock (itself NTP-disciplined).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeAuthority;

#[async_trait]
impl TimeAuthority for SystemTimeAuthority {
    async fn fetch_epoch(&mut self) -> Result<i64, ClockError> {
        Ok(chrono::Utc::now().timestamp())
    }
}

/// Clock capability used by the pipeline.
#[async_trait]
pub trait Clock: Send {
    /// Best-effort resync. Returns `true` when a fresh value was obtained.
    async fn update(&mut self) -> bool;

    /// Current time in seconds since the Unix epoch.
    fn epoch_time(&self) -> u64;
}

/// Clock that periodically resynchronizes against a [`TimeAuthority`].
pub struct NetworkClock<A> {
    authority: A,

    /// Fixed offset added to the authority's time, in seconds
    offset_secs: i64,

    /// Minimum time between two syncs
    update_interval: Duration,

    /// Epoch seconds obtained at the last successful sync
    synced_epoch: u64,

    /// Local instant the extrapolation starts from
    synced_at: Instant,

    /// Local instant of the last successful sync; `None` until one succeeds
    last_sync: Option<Instant>,
}

impl<A: TimeAuthority> NetworkClock<A> {
    /// Create a clock that has not synced yet; it reports seconds since creation until then.
    pub fn new(authority: A, offset_secs: i64, update_interval: Duration) -> Self {
        Self {
            authority,
            offset_secs,
            update_interval,
            synced_epoch: 0,
            synced_at: Instant::now(),
            last_sync: None,
        }
    }

    /// Resync now, regardless of the update interval.
    pub async fn force_update(&mut self) -> bool {
        match self.authority.fetch_epoch().await {
            Ok(epoch) => {
                let adjusted = epoch.saturating_add(self.offset_secs);
                if adjusted < 0 {
                    warn!(
                        error = %ClockError::OutOfRange(adjusted),
                        "Clock sync rejected, keeping last known time"
                    );
                    return false;
                }
                self.synced_epoch = adjusted as u64;
                self.synced_at = Instant::now();
                self.last_sync = Some(self.synced_at);
                debug!(epoch = self.synced_epoch, "Clock synchronized");
                true
            }
            Err(e) => {
                warn!(error = %e, "Clock sync failed, keeping last known time");
                false
            }
        }
    }

    /// Due when never synced, or when the last success is an interval old.
    fn update_due(&self) -> bool {
        match self.last_sync {
            None => true,
            Some(at) => at.elapsed() >= self.update_interval,
        }
    }
}

#[async_trait]
impl<A: TimeAuthority> Clock for NetworkClock<A> {
    async fn update(&mut self) -> bool {
        if !self.update_due() {
            return false;
        }
        self.force_update().await
    }

    fn epoch_time(&self) -> u64 {
        self.synced_epoch + self.synced_at.elapsed().as_secs()
    }
}

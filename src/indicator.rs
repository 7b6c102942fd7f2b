//! Status indicator (the board LED on the original hardware).
//!
//! Purely an operational signal: it is switched on around a publish cycle
//! and during the sensor and reconnect cooldowns. Nothing reads it back.

use tracing::trace;

/// A binary status output.
pub trait Indicator: Send {
    fn set(&mut self, on: bool);
}

/// Indicator that only reports state changes through tracing.
#[derive(Debug, Default)]
pub struct LogIndicator {
    on: bool,
}

impl Indicator for LogIndicator {
    fn set(&mut self, on: bool) {
        if self.on != on {
            trace!(on = on, "Indicator changed");
        }
        self.on = on;
    }
}

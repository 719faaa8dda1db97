//! Timer utilities
//!
//! Wall-clock measurement for jobs and runs.

use std::time::{Duration, Instant};

/// Wall-clock timer labelled with what it measures
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed milliseconds, saturating
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Consume the timer, logging and returning elapsed milliseconds
    pub fn stop(self) -> u64 {
        let elapsed_ms = self.elapsed_ms();
        tracing::trace!(label = %self.label, elapsed_ms, "timer stopped");
        elapsed_ms
    }
}

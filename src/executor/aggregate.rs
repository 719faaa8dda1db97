//! Result aggregation
//!
//! Jobs finish in any order; each one writes its report into the slot of its
//! discovery position, so the summary always comes out in discovery order.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;

use crate::models::{RunSummary, Test, TestReport};
use crate::utils::Timer;

/// Collects per-test reports for one run
pub struct Aggregator {
    started_at: DateTime<Utc>,
    timer: Timer,
    names: Vec<String>,
    slots: Mutex<Vec<Option<TestReport>>>,
}

impl Aggregator {
    pub fn new(tests: &[Test]) -> Self {
        Self {
            started_at: Utc::now(),
            timer: Timer::start("run"),
            names: tests.iter().map(|t| t.name.clone()).collect(),
            slots: Mutex::new(vec![None; tests.len()]),
        }
    }

    /// Store a finished test's report
    pub fn record(&self, report: TestReport) {
        let position = report.position();
        let mut slots = self.slots.lock();
        match slots.get_mut(position) {
            Some(slot) => {
                if slot.is_some() {
                    warn!("Report for {} recorded twice", report.name());
                }
                *slot = Some(report);
            }
            None => warn!(
                "Ignoring report for {} at unknown position {}",
                report.name(),
                position
            ),
        }
    }

    /// Reports recorded so far
    pub fn completed(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// Build the run summary; empty slots are tests that never ran
    pub fn finish(&self, aborted: Option<String>) -> RunSummary {
        let slots = std::mem::take(&mut *self.slots.lock());

        let mut reports = Vec::with_capacity(slots.len());
        let mut not_run = Vec::new();
        for (name, slot) in self.names.iter().zip(slots) {
            match slot {
                Some(report) => reports.push(report),
                None => not_run.push(name.clone()),
            }
        }

        RunSummary::new(
            self.started_at,
            self.timer.elapsed_ms(),
            self.names.len(),
            reports,
            not_run,
            aborted,
        )
    }
}

//! Per-test reports and run summaries
//!
//! Defines job states, per-test reports, live run events and the
//! run-level summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::tap::TapResult;
use super::test::Test;

/// How a job ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Completed,
    /// Killed because the run was aborted
    Cancelled,
    SpawnFailed(String),
}

/// Final report for one test
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestReport {
    pub test: Test,
    pub state: JobState,
    pub tap: TapResult,
    pub duration_ms: u64,
}

impl TestReport {
    pub fn new(test: Test, state: JobState, tap: TapResult, duration_ms: u64) -> Self {
        Self {
            test,
            state,
            tap,
            duration_ms,
        }
    }

    pub fn name(&self) -> &str {
        &self.test.name
    }

    pub fn position(&self) -> usize {
        self.test.position
    }

    /// No failing outcome and a clean exit
    pub fn passed(&self) -> bool {
        self.state == JobState::Completed
            && !self.tap.has_failures()
            && self.tap.exit_status == Some(0)
    }

    /// Outcomes passed but the exit status disagrees, or the reverse
    pub fn status_mismatch(&self) -> bool {
        match self.tap.exit_status {
            Some(code) => (code == 0) == self.tap.has_failures(),
            None => false,
        }
    }

    /// Short explanation of why the test failed
    pub fn failure_reason(&self) -> Option<String> {
        if self.passed() {
            return None;
        }
        if let Some(outcome) = self.tap.failures().next() {
            return Some(match &outcome.description {
                Some(desc) => desc.clone(),
                None => format!("test {} failed", outcome.number),
            });
        }
        Some(match self.tap.exit_status {
            Some(code) => format!("exited with status {code}"),
            None => "terminated by signal".to_string(),
        })
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            write!(f, "{}: ok", self.name())
        } else {
            write!(f, "{}: not ok", self.name())
        }
    }
}

/// Live events emitted while a run executes
#[derive(Clone, Debug)]
pub enum RunEvent {
    Started { position: usize, name: String },
    Output {
        position: usize,
        name: String,
        line: String,
    },
    Finished(TestReport),
    Aborted { reason: String },
}

/// Summary of one run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Tests discovered
    pub total: usize,
    pub failed: usize,
    /// Failed test names, in discovery order
    pub failed_tests: Vec<String>,
    /// Tests never launched because the run was aborted
    pub not_run: Vec<String>,
    pub has_errors: bool,
    pub aborted: Option<String>,
    /// Reports of executed tests, in discovery order
    pub reports: Vec<TestReport>,
}

impl RunSummary {
    pub fn new(
        started_at: DateTime<Utc>,
        duration_ms: u64,
        total: usize,
        reports: Vec<TestReport>,
        not_run: Vec<String>,
        aborted: Option<String>,
    ) -> Self {
        let failed_tests: Vec<String> = reports
            .iter()
            .filter(|r| !r.passed())
            .map(|r| r.name().to_string())
            .collect();
        let has_errors = !failed_tests.is_empty() || aborted.is_some();

        Self {
            started_at,
            duration_ms,
            total,
            failed: failed_tests.len(),
            failed_tests,
            not_run,
            has_errors,
            aborted,
            reports,
        }
    }

    pub fn passed(&self) -> usize {
        self.reports.iter().filter(|r| r.passed()).count()
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> i32 {
        if self.has_errors {
            1
        } else {
            0
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tests, {} failed", self.total, self.failed)?;
        if !self.not_run.is_empty() {
            write!(f, ", {} not run", self.not_run.len())?;
        }
        Ok(())
    }
}

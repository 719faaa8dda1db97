//! Orchestration loop
//!
//! Drives discovery, scheduling, aggregation and reporting for one run, and
//! repeats runs in forever mode until interrupted.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::aggregate::Aggregator;
use super::passthrough::{describe, emit_config};
use super::scheduler::{resolved_dir, Scheduler};
use crate::config::{Action, RunConfig};
use crate::discovery::discover;
use crate::error::HarnessError;
use crate::models::RunSummary;
use crate::output::{Formatter, OutputSink};

/// Exit code when interrupted before any run completed
pub const INTERRUPTED: i32 = 130;

/// Pause before retrying after a failed discovery in forever mode
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Runs the configured action
pub struct Runner {
    config: RunConfig,
    output: OutputSink,
}

impl Runner {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            output: OutputSink::stdout(),
        }
    }

    /// Send report output somewhere other than stdout
    #[cfg(test)]
    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    /// Discover, execute and report one run
    pub async fn run_once(&self) -> Result<RunSummary, HarnessError> {
        let tests = discover(&self.config)?;
        let aggregator = Arc::new(Aggregator::new(&tests));

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut formatter = Formatter::from_config(&self.config);
        let output = self.output.clone();
        let printer = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                output.write(&formatter.render(&event));
            }
            formatter
        });

        let scheduler = Scheduler::new(&self.config, events_tx);
        let aborted = scheduler.run(tests, Arc::clone(&aggregator)).await;
        drop(scheduler);

        let mut formatter = match printer.await {
            Ok(formatter) => formatter,
            Err(e) => {
                warn!("Report task failed: {}", e);
                Formatter::from_config(&self.config)
            }
        };
        self.output.write(&formatter.finish());

        let summary = aggregator.finish(aborted);
        self.output.write(&formatter.render_summary(&summary));

        info!(
            "Run finished in {}ms: {} test(s), {} passed, {} failed, {} not run",
            summary.duration_ms,
            summary.total,
            summary.passed(),
            summary.failed,
            summary.not_run.len()
        );
        if let Ok(json) = serde_json::to_string(&summary) {
            debug!(summary = %json, "run summary");
        }

        Ok(summary)
    }

    /// One pass of the configured action, returning its exit code
    pub async fn execute(&self) -> Result<i32, HarnessError> {
        match self.config.action {
            Action::Run => Ok(self.run_once().await?.exit_code()),
            Action::Describe => {
                let tests = discover(&self.config)?;
                let test_dir = resolved_dir(&self.config.test_dir);
                describe(&tests, self.config.effective_jobs(), &test_dir, &self.output).await;
                Ok(0)
            }
            Action::EmitConfig => {
                let tests = discover(&self.config)?;
                let test_dir = resolved_dir(&self.config.test_dir);
                emit_config(&tests, &test_dir, &self.output).await;
                Ok(0)
            }
        }
    }

    /// Run until done (or, in forever mode, until Ctrl-C)
    pub async fn run(&self) -> i32 {
        let mut last_code = None;
        let mut iteration = 0u64;

        loop {
            iteration += 1;
            if self.config.forever {
                info!("Starting iteration {}", iteration);
            }

            let code = tokio::select! {
                code = self.execute_reporting() => code,
                Ok(()) = tokio::signal::ctrl_c() => {
                    warn!("Interrupted");
                    return last_code.unwrap_or(INTERRUPTED);
                }
            };

            if !self.config.forever {
                return code;
            }
            last_code = Some(code);

            if code == 2 {
                tokio::select! {
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                    Ok(()) = tokio::signal::ctrl_c() => {
                        warn!("Interrupted");
                        return code;
                    }
                }
            }
        }
    }

    /// Execute once, reporting a fatal error on stderr
    async fn execute_reporting(&self) -> i32 {
        match self.execute().await {
            Ok(code) => code,
            Err(e) => {
                error!("{}", e);
                eprintln!("nodecheck: {e}");
                e.exit_code()
            }
        }
    }
}

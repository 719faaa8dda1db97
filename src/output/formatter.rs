//! Report formatting
//!
//! Renders live run events and the final summary according to verbosity.

use is_terminal::IsTerminal;
use std::collections::BTreeMap;

use crate::config::{RunConfig, Verbosity};
use crate::models::{RunEvent, RunSummary, TestReport};

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Turns run events into report text
///
/// In normal and failure-only modes per-test lines are released in
/// discovery order: a finished test is held back until every earlier test
/// has finished. Verbose mode prints in completion order, next to the
/// test's streamed output.
pub struct Formatter {
    verbosity: Verbosity,
    colorize: bool,
    next_position: usize,
    pending: BTreeMap<usize, TestReport>,
}

impl Formatter {
    pub fn new(verbosity: Verbosity, colorize: bool) -> Self {
        Self {
            verbosity,
            colorize,
            next_position: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Color only when requested and stdout is a terminal
    pub fn from_config(config: &RunConfig) -> Self {
        let colorize = config.color && std::io::stdout().is_terminal();
        Self::new(config.verbosity, colorize)
    }

    /// Render one live event
    pub fn render(&mut self, event: &RunEvent) -> String {
        match (self.verbosity, event) {
            (Verbosity::Quiet, _) => String::new(),
            (Verbosity::Verbose, RunEvent::Output { name, line, .. }) => {
                format!("[{name}] {line}\n")
            }
            (Verbosity::Verbose, RunEvent::Finished(report)) => self.format_detailed(report),
            (Verbosity::Verbose, RunEvent::Aborted { reason }) => {
                format!("{}\n", self.paint(&format!("run aborted: {reason}"), YELLOW))
            }
            (_, RunEvent::Finished(report)) => {
                self.pending.insert(report.position(), report.clone());
                self.release()
            }
            _ => String::new(),
        }
    }

    /// Flush lines still held back (tests after a gap that never ran)
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        let mut output = String::new();
        for report in pending.values() {
            output.push_str(&self.format_line(report));
        }
        output
    }

    fn release(&mut self) -> String {
        let mut output = String::new();
        while let Some(report) = self.pending.remove(&self.next_position) {
            output.push_str(&self.format_line(&report));
            self.next_position += 1;
        }
        output
    }

    /// Per-test line for normal and failure-only modes
    fn format_line(&self, report: &TestReport) -> String {
        match self.verbosity {
            Verbosity::Quiet => String::new(),
            Verbosity::FailureOnly if report.passed() => String::new(),
            Verbosity::FailureOnly => format!(
                "{}: {} - {}\n",
                report.name(),
                self.paint("not ok", RED),
                report.failure_reason().unwrap_or_default()
            ),
            _ => format!("{}\n", self.format_report(report)),
        }
    }

    /// `NAME: ok` or `NAME: not ok`
    pub fn format_report(&self, report: &TestReport) -> String {
        if report.passed() {
            format!("{}: {}", report.name(), self.paint("ok", GREEN))
        } else {
            format!("{}: {}", report.name(), self.paint("not ok", RED))
        }
    }

    /// Result line plus every failing outcome
    fn format_detailed(&self, report: &TestReport) -> String {
        let mut output = format!(
            "{} ({}ms)\n",
            self.format_report(report),
            report.duration_ms
        );
        for outcome in report.tap.failures() {
            output.push_str(&format!("    {outcome}\n"));
        }
        if !report.passed() && !report.tap.has_failures() {
            if let Some(reason) = report.failure_reason() {
                output.push_str(&format!("    {reason}\n"));
            }
        }
        output
    }

    /// Closing summary
    pub fn render_summary(&self, summary: &RunSummary) -> String {
        match self.verbosity {
            Verbosity::Quiet => String::new(),
            Verbosity::FailureOnly => {
                let mut output = String::new();
                if !summary.failed_tests.is_empty() {
                    output.push_str(&format!("failed: {}\n", summary.failed_tests.join(", ")));
                }
                if let Some(reason) = &summary.aborted {
                    output.push_str(&format!("aborted: {reason}\n"));
                }
                output
            }
            Verbosity::Normal | Verbosity::Verbose => {
                let mut output = String::new();
                let counts = if summary.failed > 0 {
                    self.paint(&summary.to_string(), RED)
                } else {
                    self.paint(&summary.to_string(), GREEN)
                };
                output.push_str(&format!("\n{counts}\n"));
                if !summary.failed_tests.is_empty() {
                    output.push_str(&format!("failed: {}\n", summary.failed_tests.join(", ")));
                }
                if let Some(reason) = &summary.aborted {
                    output.push_str(&format!("aborted: {reason}\n"));
                }
                output
            }
        }
    }

    fn paint(&self, text: &str, color: &str) -> String {
        if self.colorize {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InvocationMode, JobState, Outcome, Plan, TapResult, Test};
    use chrono::Utc;

    fn report(position: usize, name: &str, outcomes: Vec<Outcome>) -> TestReport {
        let failed = outcomes.iter().any(|o| o.is_failure());
        let tap = TapResult {
            plan: Some(Plan {
                count: outcomes.len(),
                skip_reason: None,
            }),
            outcomes,
            exit_status: Some(if failed { 1 } else { 0 }),
            ..Default::default()
        };
        let test = Test::new(position, name, format!("/t/{name}.t"), InvocationMode::Normal);
        TestReport::new(test, JobState::Completed, tap, 3)
    }

    fn sample() -> Vec<TestReport> {
        vec![
            report(0, "A", vec![Outcome::new(1, true)]),
            report(
                1,
                "B",
                vec![
                    Outcome::new(1, true),
                    Outcome::new(2, false).with_description("link down"),
                    Outcome::new(3, true),
                ],
            ),
            report(2, "C", vec![Outcome::new(1, true), Outcome::new(2, true)]),
        ]
    }

    fn render_all(formatter: &mut Formatter, events: &[RunEvent]) -> String {
        let mut output = String::new();
        for event in events {
            output.push_str(&formatter.render(event));
        }
        output.push_str(&formatter.finish());
        output
    }

    fn completion_order_events() -> Vec<RunEvent> {
        let reports = sample();
        vec![
            RunEvent::Started {
                position: 2,
                name: "C".into(),
            },
            RunEvent::Output {
                position: 2,
                name: "C".into(),
                line: "1..2".into(),
            },
            RunEvent::Finished(reports[2].clone()),
            RunEvent::Finished(reports[0].clone()),
            RunEvent::Output {
                position: 1,
                name: "B".into(),
                line: "not ok 2 - link down".into(),
            },
            RunEvent::Finished(reports[1].clone()),
        ]
    }

    #[test]
    fn test_normal_lines_in_discovery_order() {
        let mut formatter = Formatter::new(Verbosity::Normal, false);
        let output = render_all(&mut formatter, &completion_order_events());
        assert_eq!(output, "A: ok\nB: not ok\nC: ok\n");
    }

    #[test]
    fn test_normal_releases_as_soon_as_possible() {
        let reports = sample();
        let mut formatter = Formatter::new(Verbosity::Normal, false);
        assert_eq!(formatter.render(&RunEvent::Finished(reports[1].clone())), "");
        assert_eq!(
            formatter.render(&RunEvent::Finished(reports[0].clone())),
            "A: ok\nB: not ok\n"
        );
    }

    #[test]
    fn test_failure_only() {
        let mut formatter = Formatter::new(Verbosity::FailureOnly, false);
        let output = render_all(&mut formatter, &completion_order_events());
        assert_eq!(output, "B: not ok - link down\n");
    }

    #[test]
    fn test_verbose_streams_output() {
        let mut formatter = Formatter::new(Verbosity::Verbose, false);
        let output = render_all(&mut formatter, &completion_order_events());
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines[0], "[C] 1..2");
        assert_eq!(lines[1], "C: ok (3ms)");
        assert_eq!(lines[2], "A: ok (3ms)");
        assert_eq!(lines[3], "[B] not ok 2 - link down");
        assert_eq!(lines[4], "B: not ok (3ms)");
        assert_eq!(lines[5], "    not ok 2 - link down");
    }

    #[test]
    fn test_quiet_renders_nothing() {
        let mut formatter = Formatter::new(Verbosity::Quiet, true);
        let mut events = completion_order_events();
        events.push(RunEvent::Aborted {
            reason: "B failed".into(),
        });
        assert!(render_all(&mut formatter, &events).is_empty());

        let summary = RunSummary::new(Utc::now(), 1, 3, sample(), Vec::new(), None);
        assert!(formatter.render_summary(&summary).is_empty());
    }

    #[test]
    fn test_finish_flushes_after_gap() {
        let reports = sample();
        let mut formatter = Formatter::new(Verbosity::Normal, false);
        assert_eq!(formatter.render(&RunEvent::Finished(reports[2].clone())), "");
        assert_eq!(formatter.finish(), "C: ok\n");
    }

    #[test]
    fn test_summary() {
        let formatter = Formatter::new(Verbosity::Normal, false);
        let summary = RunSummary::new(Utc::now(), 1, 3, sample(), Vec::new(), None);
        assert_eq!(
            formatter.render_summary(&summary),
            "\n3 tests, 1 failed\nfailed: B\n"
        );

        let failure_only = Formatter::new(Verbosity::FailureOnly, false);
        assert_eq!(failure_only.render_summary(&summary), "failed: B\n");
        let passing = RunSummary::new(Utc::now(), 1, 1, vec![sample()[0].clone()], Vec::new(), None);
        assert!(failure_only.render_summary(&passing).is_empty());
    }

    #[test]
    fn test_color_decoration() {
        let formatter = Formatter::new(Verbosity::Normal, true);
        let reports = sample();
        assert_eq!(
            formatter.format_report(&reports[0]),
            "A: \x1b[32mok\x1b[0m"
        );
        assert_eq!(
            formatter.format_report(&reports[1]),
            "B: \x1b[31mnot ok\x1b[0m"
        );
    }

    #[test]
    fn test_nonzero_exit_detail() {
        let mut r = report(0, "A", vec![Outcome::new(1, true)]);
        r.tap.exit_status = Some(4);
        let mut formatter = Formatter::new(Verbosity::Verbose, false);
        let output = formatter.render(&RunEvent::Finished(r));
        assert_eq!(output, "A: not ok (3ms)\n    exited with status 4\n");
    }
}

//! Bounded concurrent job scheduler
//!
//! Launches test executables in discovery order with at most `jobs`
//! children in flight, feeds each child's merged output through its own
//! TAP parser, and cancels the run on first failure or bail-out.
//!
//! A child's stdout and stderr are the same pipe, so its lines reach the
//! parser in the order it wrote them.

use futures::future::join_all;
use std::fs::File;
use std::io;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info, warn};

use super::aggregate::Aggregator;
use crate::config::{RunConfig, TEST_DIR_VAR};
use crate::models::{JobState, Outcome, RunEvent, TapResult, Test, TestReport};
use crate::tap::{TapEvent, TapParser};
use crate::utils::Timer;

/// Lines buffered per job between the pipe reader and the parser
const LINE_QUEUE: usize = 64;

/// Longest output line kept; the rest of the line is dropped
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Appended to a line cut at `MAX_LINE_BYTES`
const TRUNCATED: &str = " [truncated]";

/// Command for a test executable with the shared child environment
pub(super) fn test_command(test: &Test, test_dir: &Path) -> Command {
    let mut command = Command::new(&test.path);
    command
        .args(test.args())
        .env(TEST_DIR_VAR, test_dir)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    command
}

/// Absolute test directory when it can be resolved
pub(super) fn resolved_dir(dir: &Path) -> PathBuf {
    dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
}

/// Schedules one run's jobs
pub struct Scheduler {
    jobs: usize,
    first_fail: bool,
    test_dir: PathBuf,
    events: mpsc::UnboundedSender<RunEvent>,
}

impl Scheduler {
    pub fn new(config: &RunConfig, events: mpsc::UnboundedSender<RunEvent>) -> Self {
        Self {
            jobs: config.effective_jobs(),
            first_fail: config.first_fail,
            test_dir: resolved_dir(&config.test_dir),
            events,
        }
    }

    /// Run every test, returning the abort reason if the run was cancelled
    pub async fn run(&self, tests: Vec<Test>, aggregator: Arc<Aggregator>) -> Option<String> {
        info!(
            "Running {} test(s) with up to {} concurrent",
            tests.len(),
            self.jobs
        );

        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let (cancel_tx, mut cancel_rx) = watch::channel(None::<String>);
        let cancel = Arc::new(Cancel {
            tx: cancel_tx,
            events: self.events.clone(),
        });

        let mut handles = Vec::with_capacity(tests.len());

        for test in tests {
            let permit = tokio::select! {
                biased;
                _ = cancel_rx.wait_for(|reason| reason.is_some()) => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if cancel_rx.borrow().is_some() {
                break;
            }

            debug!("Launching {}", test.name);
            let job = Job {
                test,
                test_dir: self.test_dir.clone(),
                first_fail: self.first_fail,
                events: self.events.clone(),
                cancel: Arc::clone(&cancel),
                aggregator: Arc::clone(&aggregator),
            };

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                job.run().await;
            }));
        }

        let launched = handles.len();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("Job task failed: {}", e);
            }
        }
        debug!(
            "{} of {} launched test(s) reported",
            aggregator.completed(),
            launched
        );

        let reason = cancel_rx.borrow().clone();
        reason
    }
}

/// Run-wide cancellation; the first reason wins
struct Cancel {
    tx: watch::Sender<Option<String>>,
    events: mpsc::UnboundedSender<RunEvent>,
}

impl Cancel {
    /// Returns true if this call cancelled the run
    fn trigger(&self, reason: String) -> bool {
        let set = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.clone());
            true
        });
        if set {
            info!("Aborting run: {}", reason);
            let _ = self.events.send(RunEvent::Aborted { reason });
        }
        set
    }

    fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

enum Step {
    Line(String),
    Eof,
    Cancelled,
}

enum Ending {
    Exited(io::Result<ExitStatus>),
    Cancelled,
}

/// One test execution
struct Job {
    test: Test,
    test_dir: PathBuf,
    first_fail: bool,
    events: mpsc::UnboundedSender<RunEvent>,
    cancel: Arc<Cancel>,
    aggregator: Arc<Aggregator>,
}

impl Job {
    async fn run(self) {
        let timer = Timer::start(self.test.name.clone());
        let _ = self.events.send(RunEvent::Started {
            position: self.test.position,
            name: self.test.name.clone(),
        });

        let (state, tap) = match self.spawn() {
            Ok((child, output)) => self.supervise(child, output).await,
            Err(e) => {
                warn!("Failed to spawn {}: {}", self.test.path.display(), e);
                let tap = TapResult {
                    outcomes: vec![Outcome::synthetic_failure(
                        1,
                        format!("failed to spawn {}: {e}", self.test.path.display()),
                    )],
                    ..Default::default()
                };
                (JobState::SpawnFailed(e.to_string()), tap)
            }
        };

        let report = TestReport::new(self.test.clone(), state, tap, timer.stop());

        if self.first_fail && !report.passed() && report.state != JobState::Cancelled {
            self.cancel.trigger(format!("{} failed", report.name()));
        }
        if report.status_mismatch() {
            warn!(
                "{} exit status {:?} disagrees with its TAP outcomes",
                report.name(),
                report.tap.exit_status
            );
        }
        debug!(
            "{}: {} passed, {} skipped, {} todo of {} reported",
            report,
            report.tap.passed_count(),
            report.tap.skipped_count(),
            report.tap.outcomes.iter().filter(|o| o.is_todo()).count(),
            report.tap.reported_count()
        );

        self.aggregator.record(report.clone());
        let _ = self.events.send(RunEvent::Finished(report));
    }

    /// Start the child with stdout and stderr writing into one pipe
    fn spawn(&self) -> io::Result<(Child, pipe::Receiver)> {
        let (reader, writer) = io::pipe()?;
        // Our write ends live in the temporary command and close with it
        let child = test_command(&self.test, &self.test_dir)
            .stdout(writer.try_clone()?)
            .stderr(writer)
            .spawn()?;
        let output = pipe::Receiver::from_file(File::from(OwnedFd::from(reader)))?;
        Ok((child, output))
    }

    /// Parse output as it arrives, then collect the exit status
    async fn supervise(&self, mut child: Child, output: pipe::Receiver) -> (JobState, TapResult) {
        let (tx, mut rx) = mpsc::channel::<String>(LINE_QUEUE);
        tokio::spawn(forward_lines(output, tx));

        let mut cancel_rx = self.cancel.subscribe();
        let mut parser = TapParser::new();
        // The job that cancelled the run keeps going to report its own result
        let mut triggered = false;

        loop {
            let step = tokio::select! {
                line = rx.recv() => match line {
                    Some(line) => Step::Line(line),
                    None => Step::Eof,
                },
                _ = cancel_rx.wait_for(|reason| reason.is_some()), if !triggered => Step::Cancelled,
            };

            match step {
                Step::Line(line) => {
                    let event = parser.feed(&line);
                    let _ = self.events.send(RunEvent::Output {
                        position: self.test.position,
                        name: self.test.name.clone(),
                        line,
                    });
                    match event {
                        TapEvent::BailOut(reason) => {
                            triggered |= self
                                .cancel
                                .trigger(format!("{} bailed out: {reason}", self.test.name));
                        }
                        ref event if self.first_fail && event.is_failure() => {
                            triggered |= self.cancel.trigger(format!("{} failed", self.test.name));
                        }
                        _ => {}
                    }
                }
                Step::Eof => break,
                Step::Cancelled => {
                    let reason = cancel_rx.borrow().clone().unwrap_or_default();
                    return terminate(child, parser, &reason).await;
                }
            }
        }

        debug!(
            "{} closed its output after {} result line(s)",
            self.test.name,
            parser.seen()
        );

        match wait_or_cancel(&mut child, &mut cancel_rx, triggered).await {
            Ending::Exited(Ok(status)) => (JobState::Completed, parser.finish(status.code())),
            Ending::Exited(Err(e)) => {
                warn!("Failed to wait for {}: {}", self.test.name, e);
                (JobState::Completed, parser.finish(None))
            }
            Ending::Cancelled => {
                let reason = cancel_rx.borrow().clone().unwrap_or_default();
                terminate(child, parser, &reason).await
            }
        }
    }
}

/// Exit status of a child whose output has closed
///
/// A child that has already exited keeps its status even when the run is
/// cancelled at the same moment.
async fn wait_or_cancel(
    child: &mut Child,
    cancel_rx: &mut watch::Receiver<Option<String>>,
    triggered: bool,
) -> Ending {
    tokio::select! {
        biased;
        status = child.wait() => Ending::Exited(status),
        _ = cancel_rx.wait_for(|reason| reason.is_some()), if !triggered => Ending::Cancelled,
    }
}

/// Kill a child of a cancelled run and close out its partial result
async fn terminate(mut child: Child, parser: TapParser, reason: &str) -> (JobState, TapResult) {
    if let Err(e) = child.start_kill() {
        debug!("Kill failed: {}", e);
    }
    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            debug!("Wait after kill failed: {}", e);
            None
        }
    };
    (JobState::Cancelled, parser.abort(reason, code))
}

/// Forward lines from the child's output pipe into the job's queue
///
/// Lines longer than `MAX_LINE_BYTES` are cut and marked, and the remainder
/// up to the next newline is skipped.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut skipping = false;
    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut buf)
            .await;
        match read {
            Ok(0) => break,
            Ok(_) => {
                let complete = buf.last() == Some(&b'\n');
                if skipping {
                    skipping = !complete;
                    continue;
                }
                let mut line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(&['\r', '\n'][..])
                    .to_string();
                if !complete && buf.len() >= MAX_LINE_BYTES {
                    debug!("Cut an output line at {} bytes", MAX_LINE_BYTES);
                    line.push_str(TRUNCATED);
                    skipping = true;
                }
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Read failed: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::discovery::discover;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::{tempdir, TempDir};

    /// Write an executable shell script fixture
    pub(crate) fn script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    pub(crate) fn abc_fixture() -> TempDir {
        let dir = tempdir().unwrap();
        script(dir.path(), "A.t", "echo 1..1\necho ok 1");
        script(
            dir.path(),
            "B.t",
            "echo 1..3\necho ok 1\necho 'not ok 2 - link down'\necho ok 3\nexit 1",
        );
        script(dir.path(), "C.t", "echo 1..2\necho ok 1\necho ok 2");
        dir
    }

    async fn schedule(config: &RunConfig) -> (Option<String>, crate::models::RunSummary, Vec<RunEvent>) {
        let tests = discover(config).unwrap();
        let aggregator = Arc::new(Aggregator::new(&tests));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(config, tx);
        let aborted = scheduler.run(tests, Arc::clone(&aggregator)).await;
        drop(scheduler);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let summary = aggregator.finish(aborted.clone());
        (aborted, summary, events)
    }

    #[tokio::test]
    async fn test_abc_run() {
        let dir = abc_fixture();
        let config = RunConfig::new(dir.path()).with_jobs(2);
        let (aborted, summary, events) = schedule(&config).await;

        assert!(aborted.is_none());
        assert_eq!(summary.total, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failed_tests, vec!["B".to_string()]);
        assert_eq!(summary.exit_code(), 1);

        let b = &summary.reports[1];
        assert_eq!(b.tap.outcomes.len(), 3);
        assert_eq!(b.tap.exit_status, Some(1));
        assert_eq!(b.failure_reason().as_deref(), Some("link down"));

        let finished = events
            .iter()
            .filter(|e| matches!(e, RunEvent::Finished(_)))
            .count();
        assert_eq!(finished, 3);
    }

    #[tokio::test]
    async fn test_job_count_does_not_change_results() {
        let dir = abc_fixture();
        let (_, serial, _) = schedule(&RunConfig::new(dir.path()).with_jobs(1)).await;
        let (_, parallel, _) = schedule(&RunConfig::new(dir.path()).with_jobs(4)).await;

        assert_eq!(serial.total, parallel.total);
        assert_eq!(serial.failed, parallel.failed);
        assert_eq!(serial.failed_tests, parallel.failed_tests);
        let outcomes = |s: &crate::models::RunSummary| {
            s.reports
                .iter()
                .map(|r| r.tap.outcomes.len())
                .collect::<Vec<_>>()
        };
        assert_eq!(outcomes(&serial), outcomes(&parallel));
    }

    #[tokio::test]
    async fn test_single_job_runs_serially() {
        let dir = tempdir().unwrap();
        let body = "mkdir \"$NODECHECK_TEST_DIR/busy\" || { echo 1..1; echo 'not ok 1 - overlap'; exit 1; }\n\
                    sleep 0.1\n\
                    rmdir \"$NODECHECK_TEST_DIR/busy\"\n\
                    echo 1..1\necho ok 1";
        for name in ["a.t", "b.t", "c.t", "d.t"] {
            script(dir.path(), name, body);
        }

        let (_, summary, _) = schedule(&RunConfig::new(dir.path()).with_jobs(1)).await;
        assert_eq!(summary.failed, 0, "failed: {:?}", summary.failed_tests);
    }

    #[tokio::test]
    async fn test_first_fail_stops_launching() {
        let dir = abc_fixture();
        let config = RunConfig::new(dir.path()).with_jobs(1).with_first_fail();
        let (aborted, summary, events) = schedule(&config).await;

        assert_eq!(aborted.as_deref(), Some("B failed"));
        assert_eq!(summary.not_run, vec!["C".to_string()]);
        assert!(summary.reports.iter().all(|r| r.name() != "C"));
        assert_eq!(summary.exit_code(), 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, RunEvent::Aborted { reason } if reason == "B failed")));
        assert!(!events
            .iter()
            .any(|e| matches!(e, RunEvent::Started { name, .. } if name == "C")));
    }

    #[tokio::test]
    async fn test_first_fail_kills_running_tests() {
        let dir = tempdir().unwrap();
        script(dir.path(), "fast.t", "echo 1..1\necho 'not ok 1 - broken'\nexit 1");
        script(dir.path(), "slow.t", "echo 1..2\necho ok 1\nsleep 30\necho ok 2");

        let config = RunConfig::new(dir.path()).with_jobs(2).with_first_fail();
        let timer = Timer::start("first-fail");
        let (aborted, summary, _) = schedule(&config).await;

        assert!(timer.elapsed().as_secs() < 20);
        assert_eq!(aborted.as_deref(), Some("fast failed"));
        let slow = &summary.reports[1];
        assert_eq!(slow.state, JobState::Cancelled);
        assert!(!slow.passed());
        assert!(slow
            .tap
            .outcomes
            .last()
            .and_then(|o| o.description.as_deref())
            .unwrap()
            .starts_with("terminated"));
    }

    #[tokio::test]
    async fn test_bail_out_aborts_run() {
        let dir = tempdir().unwrap();
        script(dir.path(), "a.t", "echo 1..3\necho ok 1\necho 'Bail out! no network'");
        script(dir.path(), "b.t", "echo 1..1\necho ok 1");

        let config = RunConfig::new(dir.path()).with_jobs(1);
        let (aborted, summary, _) = schedule(&config).await;

        assert_eq!(aborted.as_deref(), Some("a bailed out: no network"));
        assert_eq!(summary.not_run, vec!["b".to_string()]);
        let a = &summary.reports[0];
        assert_eq!(a.state, JobState::Completed);
        assert_eq!(a.tap.bailed_out.as_deref(), Some("no network"));
        assert_eq!(a.tap.failures().count(), 2);
        assert!(summary.has_errors);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_a_test_failure() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.t"), "#!/bin/sh\necho 1..1\necho ok 1\n").unwrap();
        fs::set_permissions(
            dir.path().join("broken.t"),
            fs::Permissions::from_mode(0o644),
        )
        .unwrap();
        script(dir.path(), "fine.t", "echo 1..1\necho ok 1");

        let (aborted, summary, _) = schedule(&RunConfig::new(dir.path())).await;

        assert!(aborted.is_none());
        assert_eq!(summary.failed_tests, vec!["broken".to_string()]);
        let broken = &summary.reports[0];
        assert!(matches!(broken.state, JobState::SpawnFailed(_)));
        assert_eq!(broken.tap.failures().count(), 1);
        assert!(summary.reports[1].passed());
    }

    #[tokio::test]
    async fn test_children_see_test_dir_and_flags() {
        let dir = tempdir().unwrap();
        script(
            dir.path(),
            "env.t",
            "echo 1..2\necho \"ok 1 - $NODECHECK_TEST_DIR\"\necho \"ok 2 - args:$*\"",
        );

        let config = RunConfig::new(dir.path()).with_sanity();
        let (_, summary, _) = schedule(&config).await;

        let outcomes = &summary.reports[0].tap.outcomes;
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(
            outcomes[0].description.as_deref(),
            Some(expected.to_str().unwrap())
        );
        assert_eq!(outcomes[1].description.as_deref(), Some("args:--sanity"));
    }

    #[tokio::test]
    async fn test_stderr_is_merged() {
        let dir = tempdir().unwrap();
        script(
            dir.path(),
            "mixed.t",
            "echo 1..2\necho ok 1\necho 'not ok 2 - from stderr' >&2\nexit 1",
        );

        let (_, summary, events) = schedule(&RunConfig::new(dir.path())).await;
        assert_eq!(summary.reports[0].tap.outcomes.len(), 2);
        assert_eq!(summary.failed, 1);
        let lines = events
            .iter()
            .filter(|e| matches!(e, RunEvent::Output { .. }))
            .count();
        assert_eq!(lines, 3);
    }

    #[tokio::test]
    async fn test_interleaved_streams_keep_write_order() {
        let dir = tempdir().unwrap();
        script(
            dir.path(),
            "interleaved.t",
            "echo 1..3\necho 'ok 1 - a' >&2\necho 'ok 2 - b'\necho 'ok 3 - c' >&2",
        );
        let config = RunConfig::new(dir.path());

        for _ in 0..20 {
            let (_, summary, events) = schedule(&config).await;
            let report = &summary.reports[0];
            assert!(report.passed(), "{:?}", report.tap);
            assert!(report.tap.protocol_errors.is_empty());

            let numbers: Vec<_> = report.tap.outcomes.iter().map(|o| o.number).collect();
            assert_eq!(numbers, vec![1, 2, 3]);
            let lines: Vec<_> = events
                .iter()
                .filter_map(|e| match e {
                    RunEvent::Output { line, .. } => Some(line.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(lines, vec!["1..3", "ok 1 - a", "ok 2 - b", "ok 3 - c"]);
        }
    }

    #[tokio::test]
    async fn test_long_lines_are_cut() {
        let mut data = vec![b'x'; MAX_LINE_BYTES * 3];
        data.extend_from_slice(b"\nok 1\npartial");
        let (tx, mut rx) = mpsc::channel(LINE_QUEUE);
        forward_lines(&data[..], tx).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.len(), MAX_LINE_BYTES + TRUNCATED.len());
        assert!(first.ends_with(TRUNCATED));
        assert_eq!(rx.recv().await.as_deref(), Some("ok 1"));
        assert_eq!(rx.recv().await.as_deref(), Some("partial"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_long_line_from_child() {
        let dir = tempdir().unwrap();
        script(
            dir.path(),
            "noisy.t",
            "echo 1..1\nhead -c 300000 /dev/zero | tr '\\0' x\necho\necho ok 1",
        );

        let (_, summary, events) = schedule(&RunConfig::new(dir.path())).await;
        assert!(summary.reports[0].passed());
        let longest = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Output { line, .. } => Some(line.len()),
                _ => None,
            })
            .max();
        assert_eq!(longest, Some(MAX_LINE_BYTES + TRUNCATED.len()));
    }

    #[tokio::test]
    async fn test_exited_child_keeps_status_when_cancelled() {
        let mut child = Command::new("sh")
            .args(["-c", "exit 0"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let (tx, mut rx) = watch::channel(None);
        tx.send(Some("B failed".to_string())).unwrap();

        for _ in 0..20 {
            let ending = wait_or_cancel(&mut child, &mut rx, false).await;
            assert!(matches!(ending, Ending::Exited(Ok(status)) if status.success()));
        }
    }

    #[tokio::test]
    async fn test_missing_plan_and_signal() {
        let dir = tempdir().unwrap();
        script(dir.path(), "noplan.t", "echo ok 1");
        script(dir.path(), "killed.t", "echo 1..1\necho ok 1\nkill -9 $$");

        let (_, summary, _) = schedule(&RunConfig::new(dir.path())).await;

        let killed = &summary.reports[0];
        assert_eq!(killed.tap.exit_status, None);
        assert!(!killed.passed());
        assert_eq!(killed.failure_reason().as_deref(), Some("terminated by signal"));

        let noplan = &summary.reports[1];
        assert!(!noplan.passed());
        assert_eq!(noplan.tap.failures().count(), 1);
    }
}

//! Pass-through modes
//!
//! Describe and emit-config invoke each test with a single flag and relay
//! what it prints; no TAP is parsed.

use anyhow::{anyhow, Context, Result};
use futures::future;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, warn};

use super::scheduler::test_command;
use crate::models::Test;
use crate::output::OutputSink;

/// Write `NAME: description` for each test, in discovery order
///
/// Up to `jobs` children run at once and each line is written as soon as
/// every earlier test has been described. An error takes the place of the
/// description for the test that produced it.
pub async fn describe(tests: &[Test], jobs: usize, test_dir: &Path, sink: &OutputSink) {
    stream::iter(tests)
        .map(|test| async move {
            let text = match describe_one(test, test_dir).await {
                Ok(description) => description,
                Err(e) => {
                    debug!("Describe failed for {}: {:#}", test.name, e);
                    format!("{e:#}")
                }
            };
            (test.name.clone(), text)
        })
        .buffered(jobs.max(1))
        .for_each(|(name, text)| {
            sink.write(&format!("{name}: {text}\n"));
            future::ready(())
        })
        .await
}

async fn describe_one(test: &Test, test_dir: &Path) -> Result<String> {
    let output = test_command(test, test_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .with_context(|| format!("failed to run {}", test.path.display()))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string);

    match line {
        Some(line) => {
            if !output.status.success() {
                debug!("{} exited with {} after describing", test.name, output.status);
            }
            Ok(line)
        }
        None => Err(anyhow!("no description ({})", output.status)),
    }
}

/// Relay each test's configuration fragment, one test at a time
pub async fn emit_config(tests: &[Test], test_dir: &Path, sink: &OutputSink) {
    for test in tests {
        let output = test_command(test, test_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await;

        match output {
            Ok(output) => {
                if !output.status.success() {
                    warn!("{} exited with {} while emitting config", test.name, output.status);
                }
                sink.write(&String::from_utf8_lossy(&output.stdout));
            }
            Err(e) => {
                warn!("Failed to run {}: {}", test.path.display(), e);
                eprintln!("nodecheck: {}: {e}", test.name);
            }
        }
    }
}

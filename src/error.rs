//! Harness errors
//!
//! Errors that abort a run before any test executes. Per-test problems
//! (spawn failures, TAP protocol errors) never surface here; they become
//! failing outcomes of the affected test.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration and discovery errors
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("test(s) not found in {}: {}", dir.display(), names.join(", "))]
    TestsNotFound { dir: PathBuf, names: Vec<String> },

    #[error("cannot read test directory {}: {source}", path.display())]
    TestDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("--{0} and --{1} cannot be used together")]
    ConflictingFlags(&'static str, &'static str),

    #[error("job count must be at least 1")]
    InvalidJobs,

    #[error("configuration file error: {0:#}")]
    ConfigFile(anyhow::Error),
}

impl HarnessError {
    /// Process exit code for a fatal error
    pub fn exit_code(&self) -> i32 {
        2
    }
}

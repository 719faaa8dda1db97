//! Configuration module
//!
//! Builds the immutable [`RunConfig`] from defaults, the config file, the
//! environment and command-line flags, in increasing order of precedence.

mod env;
mod file;

pub use env::{EnvConfig, TEST_DIR_VAR};
pub use file::ConfigFile;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cli::Args;
use crate::error::HarnessError;
use crate::models::InvocationMode;

/// Default location of the test executables
pub const DEFAULT_TEST_DIR: &str = "/usr/lib/nodecheck/tests";

/// Default test file extension
pub const DEFAULT_EXTENSION: &str = "t";

/// How much the formatter prints
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verbosity {
    Quiet,
    FailureOnly,
    Normal,
    Verbose,
}

/// What a pass over the tests does
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Run,
    Describe,
    EmitConfig,
}

/// Configuration for one orchestration pass
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum concurrent tests
    pub jobs: usize,
    pub verbosity: Verbosity,
    /// Color requested; applied only on a terminal
    pub color: bool,
    pub first_fail: bool,
    pub sanity: bool,
    pub forever: bool,
    pub test_dir: PathBuf,
    /// Test file extension, without the dot
    pub extension: String,
    /// Explicit test names; empty means scan the directory
    pub names: Vec<String>,
    pub action: Action,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            verbosity: Verbosity::Normal,
            color: true,
            first_fail: false,
            sanity: false,
            forever: false,
            test_dir: PathBuf::from(DEFAULT_TEST_DIR),
            extension: DEFAULT_EXTENSION.to_string(),
            names: Vec::new(),
            action: Action::Run,
        }
    }
}

impl RunConfig {
    pub fn new(test_dir: impl Into<PathBuf>) -> Self {
        Self {
            test_dir: test_dir.into(),
            ..Self::default()
        }
    }

    /// Layer config file, environment and flags over the defaults
    pub fn resolve(
        args: &Args,
        env: &EnvConfig,
        file: &ConfigFile,
    ) -> Result<Self, HarnessError> {
        check_conflicts(args)?;

        let mut config = Self::default();

        if let Some(dir) = &file.test_dir {
            config.test_dir = dir.clone();
        }
        if let Some(jobs) = file.jobs {
            config.jobs = jobs;
        }
        if let Some(ext) = &file.extension {
            config.extension = ext.clone();
        }
        if let Some(color) = file.color {
            config.color = color;
        }
        if let Some(sanity) = file.sanity {
            config.sanity = sanity;
        }

        if let Some(dir) = &env.test_dir {
            config.test_dir = dir.clone();
        }
        if let Some(jobs) = env.jobs {
            config.jobs = jobs;
        }
        if let Some(ext) = &env.extension {
            config.extension = ext.clone();
        }
        if env.no_color == Some(true) {
            config.color = false;
        }

        if let Some(dir) = &args.test_dir {
            config.test_dir = dir.clone();
        }
        if let Some(jobs) = args.jobs {
            config.jobs = jobs;
        }
        if args.no_color {
            config.color = false;
        }
        config.sanity |= args.sanity;
        config.first_fail = args.first_fail;
        config.forever = args.forever;
        config.names = args.tests.clone();

        config.verbosity = if args.quiet {
            Verbosity::Quiet
        } else if args.verbose {
            Verbosity::Verbose
        } else if args.failures_only {
            Verbosity::FailureOnly
        } else {
            Verbosity::Normal
        };

        config.action = if args.list {
            Action::Describe
        } else if args.emit_config {
            Action::EmitConfig
        } else {
            Action::Run
        };

        if config.jobs == 0 {
            return Err(HarnessError::InvalidJobs);
        }

        Ok(config)
    }

    /// Concurrency actually used; emit-config output must not interleave
    pub fn effective_jobs(&self) -> usize {
        match self.action {
            Action::EmitConfig => 1,
            _ => self.jobs.max(1),
        }
    }

    /// Invocation mode for discovered tests
    pub fn invocation_mode(&self) -> InvocationMode {
        match self.action {
            Action::Describe => InvocationMode::Describe,
            Action::EmitConfig => InvocationMode::EmitConfig,
            Action::Run if self.sanity => InvocationMode::Sanity,
            Action::Run => InvocationMode::Normal,
        }
    }
}

#[cfg(test)]
impl RunConfig {
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn with_first_fail(mut self) -> Self {
        self.first_fail = true;
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_sanity(mut self) -> Self {
        self.sanity = true;
        self
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Reject mutually exclusive flags
fn check_conflicts(args: &Args) -> Result<(), HarnessError> {
    let pairs = [
        (args.quiet, args.verbose, "quiet", "verbose"),
        (args.quiet, args.failures_only, "quiet", "failures-only"),
        (args.verbose, args.failures_only, "verbose", "failures-only"),
        (args.list, args.emit_config, "list", "emit-config"),
        (args.forever, args.list, "forever", "list"),
        (args.forever, args.emit_config, "forever", "emit-config"),
    ];

    for (a, b, name_a, name_b) in pairs {
        if a && b {
            return Err(HarnessError::ConflictingFlags(name_a, name_b));
        }
    }
    Ok(())
}

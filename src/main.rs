//! nodecheck - node health-check harness
//!
//! Runs a directory of diagnostic test executables that report in TAP,
//! in parallel, and summarises whether the node is healthy.
//!
//! ## Features
//!
//! - Bounded-concurrency execution with streaming TAP parsing
//! - Quiet, failures-only, normal and verbose reports
//! - First-fail and forever modes
//! - Describe (`--list`) and `--emit-config` pass-through modes
//!
//! ## Usage
//!
//! ```bash
//! # Run every test in the default directory
//! nodecheck
//!
//! # Run two tests, stopping at the first failure
//! nodecheck -f disk net
//!
//! # Stream output from a local test directory with 8 jobs
//! nodecheck -v -j 8 -d ./tests
//!
//! # Describe the available tests
//! nodecheck --list
//! ```

use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, warn};

mod cli;
mod config;
mod discovery;
mod error;
mod executor;
mod models;
mod output;
mod tap;
mod utils;

use cli::Args;
use config::{ConfigFile, EnvConfig, RunConfig};
use error::HarnessError;
use executor::Runner;
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let env = EnvConfig::load();

    let config_path = args.config.clone().or_else(|| env.config_file.clone());
    let file = match ConfigFile::load_or_default(config_path.as_deref()) {
        Ok(file) => file,
        Err(e) => return fatal(HarnessError::ConfigFile(e)),
    };

    let requested = args
        .log_level
        .as_deref()
        .or(env.log_level.as_deref())
        .or(file.log_level.as_deref());
    let level = requested.map(str::parse::<LogLevel>).transpose();
    init_logger(level.clone().ok().flatten().unwrap_or_default());
    if let Err(e) = level {
        warn!("{}; using {:?}", e, LogLevel::default());
    }

    if env.has_any() {
        debug!("Environment overrides: {:?}", env);
    }

    let config = match RunConfig::resolve(&args, &env, &file) {
        Ok(config) => config,
        Err(e) => return fatal(e),
    };
    debug!("Resolved configuration: {:?}", config);

    let code = Runner::new(config).run().await;
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

/// Report an error that prevents any test from running
fn fatal(error: HarnessError) -> ExitCode {
    tracing::error!("{}", error);
    eprintln!("nodecheck: {error}");
    ExitCode::from(u8::try_from(error.exit_code()).unwrap_or(2))
}

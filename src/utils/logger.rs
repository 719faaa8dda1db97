//! Logging utilities
//!
//! Diagnostics go to stderr so that stdout carries only the report.

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Harness log verbosity, independent of report verbosity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Filter directive limiting output to this crate
    fn directive(self) -> String {
        format!("nodecheck={}", self.to_tracing_level())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Install the stderr subscriber; a second call is a no-op
pub fn init_logger(level: LogLevel) {
    let result = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level.directive()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();

    if result.is_err() {
        tracing::debug!("Logger already initialised");
    }
}

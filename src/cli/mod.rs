//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::Parser;
use std::path::PathBuf;

/// Node health-check harness
#[derive(Parser, Debug, Default)]
#[command(name = "nodecheck")]
#[command(version)]
#[command(about = "Run a directory of TAP diagnostic tests and report node health")]
#[command(long_about = None)]
pub struct Args {
    /// Stop the run at the first failing test
    #[arg(short = 'f', long)]
    pub first_fail: bool,

    /// List tests with their descriptions instead of running them
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Print nothing; report only through the exit code
    #[arg(short, long)]
    pub quiet: bool,

    /// Stream test output as it is produced
    #[arg(short, long)]
    pub verbose: bool,

    /// Print failing tests only
    #[arg(short = 'F', long)]
    pub failures_only: bool,

    /// Disable colored output
    #[arg(short = 'n', long)]
    pub no_color: bool,

    /// Print each test's prototype configuration fragment
    #[arg(short = 'c', long)]
    pub emit_config: bool,

    /// Run only the quick sanity subset of each test
    #[arg(short, long)]
    pub sanity: bool,

    /// Repeat the run until interrupted
    #[arg(short = 'r', long)]
    pub forever: bool,

    /// Directory containing the test executables
    #[arg(short = 'd', long, value_name = "DIR")]
    pub test_dir: Option<PathBuf>,

    /// Number of tests to run concurrently
    #[arg(short = 'j', long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Harness configuration file (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level for diagnostics on stderr (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Tests to run (default: every test in the directory)
    #[arg(value_name = "TEST")]
    pub tests: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["nodecheck", "-f", "-v", "-j", "8", "disk", "net"]);
        assert!(args.first_fail);
        assert!(args.verbose);
        assert_eq!(args.jobs, Some(8));
        assert_eq!(args.tests, vec!["disk".to_string(), "net".to_string()]);
    }

    #[test]
    fn test_short_flags() {
        let args = Args::parse_from([
            "nodecheck", "-q", "-F", "-n", "-c", "-s", "-r", "-l", "-d", "/opt/tests",
        ]);
        assert!(args.quiet);
        assert!(args.failures_only);
        assert!(args.no_color);
        assert!(args.emit_config);
        assert!(args.sanity);
        assert!(args.forever);
        assert!(args.list);
        assert_eq!(args.test_dir, Some(PathBuf::from("/opt/tests")));
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["nodecheck"]);
        assert!(!args.quiet);
        assert!(args.jobs.is_none());
        assert!(args.tests.is_empty());
    }
}

//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;
use std::path::PathBuf;

/// Environment variable prefix
const ENV_PREFIX: &str = "NODECHECK";

/// Variable exported to every test process with the resolved test directory
pub const TEST_DIR_VAR: &str = "NODECHECK_TEST_DIR";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Test directory from NODECHECK_TEST_DIR
    pub test_dir: Option<PathBuf>,
    /// Concurrency from NODECHECK_JOBS
    pub jobs: Option<usize>,
    /// Test file extension from NODECHECK_EXTENSION
    pub extension: Option<String>,
    /// NODECHECK_NO_COLOR or the conventional NO_COLOR
    pub no_color: Option<bool>,
    /// Config file from NODECHECK_CONFIG
    pub config_file: Option<PathBuf>,
    /// Log level from NODECHECK_LOG
    pub log_level: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        let no_color = get_env_bool("NO_COLOR").or_else(|| {
            env::var("NO_COLOR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(|_| true)
        });

        Self {
            test_dir: get_env("TEST_DIR").map(PathBuf::from),
            jobs: get_env_parse("JOBS"),
            extension: get_env("EXTENSION"),
            no_color,
            config_file: get_env("CONFIG").map(PathBuf::from),
            log_level: get_env("LOG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.test_dir.is_some()
            || self.jobs.is_some()
            || self.extension.is_some()
            || self.no_color.is_some()
            || self.config_file.is_some()
            || self.log_level.is_some()
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables (useful for testing)
#[cfg(test)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

#[cfg(test)]
impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    pub fn test_dir(mut self, dir: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_TEST_DIR"), dir.into()));
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_JOBS"), jobs.to_string()));
        self
    }

    pub fn extension(mut self, ext: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_EXTENSION"), ext.into()));
        self
    }

    pub fn no_color(mut self, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_NO_COLOR"), value.into()));
        self
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        for (key, value) in self.vars {
            env::set_var(key, value);
        }

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
#[cfg(test)]
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

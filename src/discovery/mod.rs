//! Test discovery
//!
//! Resolves the ordered list of test executables for a run, either from
//! explicit names or by scanning the test directory.

use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::config::RunConfig;
use crate::error::HarnessError;
use crate::models::Test;

/// Resolve the tests for one pass
///
/// Explicit names resolve to `<test_dir>/<name>.<extension>`; if any of
/// them is missing nothing runs. Without names, every matching file in the
/// directory is returned, sorted by file name.
pub fn discover(config: &RunConfig) -> Result<Vec<Test>, HarnessError> {
    let tests = if config.names.is_empty() {
        scan(config)?
    } else {
        resolve_names(config)?
    };

    info!(
        "Discovered {} test(s) in {}",
        tests.len(),
        config.test_dir.display()
    );
    Ok(tests)
}

fn resolve_names(config: &RunConfig) -> Result<Vec<Test>, HarnessError> {
    let mode = config.invocation_mode();
    let mut tests = Vec::with_capacity(config.names.len());
    let mut missing = Vec::new();

    for name in &config.names {
        let path = config
            .test_dir
            .join(format!("{name}.{}", config.extension));

        if is_test_file(&path) {
            tests.push(Test::new(tests.len(), name.clone(), path, mode));
        } else {
            debug!("Test {} not found at {}", name, path.display());
            missing.push(name.clone());
        }
    }

    if !missing.is_empty() {
        return Err(HarnessError::TestsNotFound {
            dir: config.test_dir.clone(),
            names: missing,
        });
    }

    Ok(tests)
}

fn scan(config: &RunConfig) -> Result<Vec<Test>, HarnessError> {
    let unreadable = |source| HarnessError::TestDirUnreadable {
        path: config.test_dir.clone(),
        source,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(&config.test_dir).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        let matches = path
            .extension()
            .map(|ext| ext == config.extension.as_str())
            .unwrap_or(false);
        if matches && is_test_file(&path) {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mode = config.invocation_mode();
    Ok(paths
        .into_iter()
        .enumerate()
        .map(|(position, path)| {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            Test::new(position, name, path, mode)
        })
        .collect())
}

/// Regular file (following symlinks) whose metadata is readable
fn is_test_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

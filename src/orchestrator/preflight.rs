//! Preflight checks, run before any directory is deleted or tool started.
//!
//! - Every project must either exist locally or have a repository URL.
//!   A violation fails with `MissingRepository` so no project is built.
//! - The host tools the run will actually need must be locatable.

use std::path::Path;

use crate::config::BootstrapConfig;
use crate::error::{AcquireError, PipelineError};
use crate::source::git;
use crate::system::CommandRunner;

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Name of the check
    pub name: String,
    /// Whether the check passed
    pub passed: bool,
    /// Human-readable message
    pub message: String,
    /// Optional suggestion for fixing the issue
    pub suggestion: Option<String>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn fail(
        name: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn errors(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    /// Log every check; failures at error level.
    pub fn log_summary(&self) {
        for check in &self.checks {
            if check.passed {
                log::debug!("[Preflight] [OK] {}: {}", check.name, check.message);
            } else {
                log::error!("[Preflight] [FAIL] {}: {}", check.name, check.message);
                if let Some(suggestion) = &check.suggestion {
                    log::error!("[Preflight]        Suggestion: {}", suggestion);
                }
            }
        }
    }
}

/// Fail with `MissingRepository` for any project that would need cloning
/// but has no URL. Returns whether any project will call git.
pub fn check_repositories(config: &BootstrapConfig, source_root: &Path) -> Result<bool, AcquireError> {
    let manifest = &config.workspace.manifest_file;
    let mut needs_git = false;

    for project in &config.projects {
        let dir = source_root.join(&project.name);
        let must_clone = !dir.exists()
            || (!dir.join(manifest).is_file() && config.workspace.reclone_invalid);

        if must_clone {
            if project.repository.is_none() {
                return Err(AcquireError::MissingRepository(project.name.clone()));
            }
            needs_git = true;
        } else if git::has_metadata(&dir) {
            needs_git = true;
        }
    }

    Ok(needs_git)
}

/// Check that each required tool resolves to an executable.
pub fn check_host_tools(runner: &dyn CommandRunner, config: &BootstrapConfig, needs_git: bool) -> Vec<CheckResult> {
    let toolchain = &config.toolchain;
    let mut tools = vec![
        (toolchain.cmake.as_str(), "Install CMake (3.20 or newer)"),
        (toolchain.ninja.as_str(), "Install the Ninja build system"),
    ];
    if needs_git {
        tools.insert(0, (toolchain.git.as_str(), "Install git"));
    }

    tools
        .into_iter()
        .map(|(tool, suggestion)| match runner.locate(tool) {
            Some(path) => CheckResult::pass(tool, format!("found at {}", path.display())),
            None => CheckResult::fail(tool, "not found", suggestion),
        })
        .collect()
}

/// Run every preflight check.
pub fn run_preflight(
    runner: &dyn CommandRunner,
    config: &BootstrapConfig,
    source_root: &Path,
) -> Result<PreflightReport, PipelineError> {
    let needs_git = check_repositories(config, source_root)?;
    let report = PreflightReport {
        checks: check_host_tools(runner, config, needs_git),
    };
    report.log_summary();

    if !report.is_ok() {
        let missing: Vec<_> = report.errors().iter().map(|c| c.name.clone()).collect();
        return Err(PipelineError::Preflight(format!(
            "missing host tools: {}",
            missing.join(", ")
        )));
    }
    Ok(report)
}

//! Ensures a project's source tree is present and looks buildable.
//!
//! Decision order for one project directory:
//!
//! 1. Missing: clone it (needs a repository URL).
//! 2. Present without the build manifest: delete it and clone again.
//! 3. Present with the manifest and git metadata: pull and update submodules.
//!    A failed update is only a warning.
//! 4. Whatever happened above, the manifest must exist afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::AcquireError;
use crate::models::ProjectSpec;
use crate::source::git::GitClient;

/// What the acquirer did to a project directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceAction {
    /// Directory did not exist and was cloned.
    Cloned,
    /// Directory had no manifest and was replaced by a fresh clone.
    Recloned,
    /// Existing checkout was pulled and its submodules updated.
    Updated,
    /// Existing checkout could not be updated; the old state is used.
    UpdateFailed,
    /// Existing valid tree without git metadata, used as is.
    Reused,
}

impl fmt::Display for SourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SourceAction::Cloned => "cloned",
            SourceAction::Recloned => "re-cloned",
            SourceAction::Updated => "updated",
            SourceAction::UpdateFailed => "update failed, using existing tree",
            SourceAction::Reused => "reused",
        };
        f.write_str(text)
    }
}

pub struct SourceAcquirer<'a> {
    git: GitClient<'a>,
    manifest_file: &'a str,
    reclone_invalid: bool,
}

impl<'a> SourceAcquirer<'a> {
    pub fn new(git: GitClient<'a>, manifest_file: &'a str, reclone_invalid: bool) -> Self {
        SourceAcquirer {
            git,
            manifest_file,
            reclone_invalid,
        }
    }

    /// Whether `project_dir` contains the build manifest.
    pub fn is_valid(&self, project_dir: &Path) -> bool {
        project_dir.join(self.manifest_file).is_file()
    }

    /// Make sure `project_dir` holds a buildable tree for `project`.
    pub fn ensure(&self, project: &ProjectSpec, project_dir: &Path) -> Result<SourceAction, AcquireError> {
        let action = if !project_dir.exists() {
            let url = require_url(project)?;
            log::info!("==> Cloning project '{}' from {}", project.name, url);
            self.clone_into(project, url, project_dir)?;
            SourceAction::Cloned
        } else if !self.is_valid(project_dir) {
            if !self.reclone_invalid {
                return Err(AcquireError::InvalidProject(project.name.clone()));
            }
            // Check the URL before deleting anything.
            let url = require_url(project)?;
            log::warn!(
                "'{}' does not appear to be a CMake project. Re-cloning...",
                project.name
            );
            remove_path(project_dir)?;
            self.clone_into(project, url, project_dir)?;
            SourceAction::Recloned
        } else if self.git.has_metadata(project_dir) {
            self.update(project, project_dir)
        } else {
            log::debug!("'{}' has no git metadata; using it as is", project.name);
            SourceAction::Reused
        };

        if !self.is_valid(project_dir) {
            return Err(AcquireError::InvalidProject(project.name.clone()));
        }

        Ok(action)
    }

    fn clone_into(&self, project: &ProjectSpec, url: &str, project_dir: &Path) -> Result<(), AcquireError> {
        let output = self.git.clone_recursive(url, project_dir)?;
        if !output.success() {
            return Err(AcquireError::CloneFailed {
                project: project.name.clone(),
                code: output.code,
            });
        }
        Ok(())
    }

    /// Pull, then update submodules. Never fatal.
    fn update(&self, project: &ProjectSpec, project_dir: &Path) -> SourceAction {
        log::info!("==> Pulling latest changes for '{}'", project.name);

        let pulled = self.git.pull(project_dir).map(|o| o.success());
        let updated = match pulled {
            Ok(true) => self
                .git
                .update_submodules(project_dir)
                .map(|o| o.success()),
            other => other,
        };

        match updated {
            Ok(true) => SourceAction::Updated,
            Ok(false) => {
                log::warn!(
                    "Failed to pull latest changes for '{}' but project appears to be valid. Continuing...",
                    project.name
                );
                SourceAction::UpdateFailed
            }
            Err(e) => {
                log::warn!(
                    "Failed to pull latest changes for '{}' ({}) but project appears to be valid. Continuing...",
                    project.name,
                    e
                );
                SourceAction::UpdateFailed
            }
        }
    }
}

fn require_url(project: &ProjectSpec) -> Result<&str, AcquireError> {
    project
        .repository
        .as_deref()
        .ok_or_else(|| AcquireError::MissingRepository(project.name.clone()))
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

//! Git plumbing for project checkouts.
//!
//! Network operations (clone, pull, submodule update) go through the `git`
//! executable via a [`CommandRunner`], so credentials helpers and submodule
//! configuration behave exactly as on the command line. Read-only inspection
//! of a checkout uses `git2`.

use std::path::{Path, PathBuf};

use git2::Repository;
use thiserror::Error;

use crate::error::ProcessError;
use crate::system::{CommandRunner, Invocation, ProcessOutput};

/// Errors from local repository inspection.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Git2 error: {0}")]
    Git2(#[from] git2::Error),
}

/// Result type for git inspection
pub type GitResult<T> = Result<T, GitError>;

/// Runs git commands for one configured `git` executable.
pub struct GitClient<'a> {
    runner: &'a dyn CommandRunner,
    program: &'a str,
}

impl<'a> GitClient<'a> {
    pub fn new(runner: &'a dyn CommandRunner, program: &'a str) -> Self {
        GitClient { runner, program }
    }

    /// `git clone --recursive <url> <target>`, run from the target's parent.
    pub fn clone_recursive(&self, url: &str, target: &Path) -> Result<ProcessOutput, ProcessError> {
        let cwd = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        log::debug!("[Git] Cloning {} into {}", url, target.display());
        self.runner.run(
            &Invocation::new(self.program, cwd)
                .args(["clone", "--recursive", url])
                .arg(target.display().to_string()),
        )
    }

    /// `git pull` inside the checkout.
    pub fn pull(&self, repo_dir: &Path) -> Result<ProcessOutput, ProcessError> {
        self.runner
            .run(&Invocation::new(self.program, repo_dir).arg("pull"))
    }

    /// Bring every submodule to the tip of its tracked branch.
    pub fn update_submodules(&self, repo_dir: &Path) -> Result<ProcessOutput, ProcessError> {
        self.runner.run(
            &Invocation::new(self.program, repo_dir)
                .args(["submodule", "update", "--init", "--recursive", "--remote"]),
        )
    }

    /// Whether `dir` is the top of a git checkout.
    pub fn has_metadata(&self, dir: &Path) -> bool {
        has_metadata(dir)
    }
}

/// Whether `dir` itself is a git working tree (not merely nested in one).
pub fn has_metadata(dir: &Path) -> bool {
    if !dir.join(".git").exists() {
        return false;
    }
    Repository::open(dir).is_ok()
}

/// Full hash of the commit checked out in `repo_dir`.
pub fn head_commit(repo_dir: &Path) -> GitResult<String> {
    let repo = Repository::open(repo_dir)?;
    let head = repo
        .head()
        .map_err(|e| GitError::Repository(format!("Failed to read HEAD: {}", e)))?;
    let commit_id = head
        .target()
        .ok_or_else(|| GitError::Repository("HEAD is not a direct reference".to_string()))?;
    Ok(commit_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingRunner {
        calls: RefCell<Vec<Invocation>>,
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
            self.calls.borrow_mut().push(invocation.clone());
            Ok(ProcessOutput::default())
        }
    }

    #[test]
    fn test_clone_runs_from_parent_directory() {
        let runner = RecordingRunner::default();
        let git = GitClient::new(&runner, "git");
        git.clone_recursive("https://example.com/boot.git", Path::new("/work/SparkBoot"))
            .unwrap();

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].cwd, PathBuf::from("/work"));
        assert_eq!(
            calls[0].args,
            vec!["clone", "--recursive", "https://example.com/boot.git", "/work/SparkBoot"]
        );
    }

    #[test]
    fn test_update_commands_run_inside_checkout() {
        let runner = RecordingRunner::default();
        let git = GitClient::new(&runner, "/usr/bin/git");
        git.pull(Path::new("/work/SparkKernel")).unwrap();
        git.update_submodules(Path::new("/work/SparkKernel")).unwrap();

        let calls = runner.calls.borrow();
        assert!(calls.iter().all(|c| c.cwd == Path::new("/work/SparkKernel")));
        assert!(calls.iter().all(|c| c.program == "/usr/bin/git"));
        assert_eq!(calls[0].args, vec!["pull"]);
        assert_eq!(calls[1].args[0], "submodule");
    }

    #[test]
    fn test_metadata_detection() {
        let temp_dir = TempDir::new().unwrap();
        let plain = temp_dir.path().join("plain");
        std::fs::create_dir_all(&plain).unwrap();
        assert!(!has_metadata(&plain));

        let repo = temp_dir.path().join("repo");
        Repository::init(&repo).unwrap();
        assert!(has_metadata(&repo));
        assert!(!has_metadata(&repo.join("missing")));
    }

    #[test]
    fn test_head_commit_of_unborn_branch_fails() {
        let temp_dir = TempDir::new().unwrap();
        Repository::init(temp_dir.path()).unwrap();
        assert!(head_commit(temp_dir.path()).is_err());
    }

    #[test]
    fn test_git_error_display() {
        let err = GitError::Repository("HEAD is not a direct reference".to_string());
        assert_eq!(err.to_string(), "Repository error: HEAD is not a direct reference");
    }
}

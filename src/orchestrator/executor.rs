//! Build execution: configure with CMake, compile with Ninja.
//!
//! Every run starts from an empty build directory. Both tools run with the
//! build directory as their working directory; the source directory is
//! passed to CMake as an absolute path.

use std::path::Path;

use crate::config::ToolchainSettings;
use crate::error::BuildError;
use crate::models::{ProjectSpec, ProjectWorkspace};
use crate::system::{CommandRunner, Invocation};

/// Delete `dir` if present and create it again, empty.
pub fn recreate_dir(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)
}

pub struct BuildInvoker<'a> {
    runner: &'a dyn CommandRunner,
    toolchain: &'a ToolchainSettings,
}

impl<'a> BuildInvoker<'a> {
    pub fn new(runner: &'a dyn CommandRunner, toolchain: &'a ToolchainSettings) -> Self {
        BuildInvoker { runner, toolchain }
    }

    /// The configure invocation for `workspace`.
    pub fn configure_invocation(&self, workspace: &ProjectWorkspace) -> Invocation {
        Invocation::new(&self.toolchain.cmake, &workspace.build_dir)
            .args(self.toolchain.configure_args(&workspace.project_dir))
    }

    /// The compile invocation for `workspace`.
    pub fn build_invocation(&self, workspace: &ProjectWorkspace) -> Invocation {
        Invocation::new(&self.toolchain.ninja, &workspace.build_dir)
    }

    /// Recreate the build directory, then configure and compile.
    pub fn build(&self, project: &ProjectSpec, workspace: &ProjectWorkspace) -> Result<(), BuildError> {
        recreate_dir(&workspace.build_dir)?;

        let configure = self.configure_invocation(workspace);
        log::debug!("[Build] {}", configure.display());
        let output = self.runner.run(&configure)?;
        if !output.success() {
            log::error!("CMake exited with exit code {}", output.code);
            return Err(BuildError::ConfigureFailed {
                project: project.name.clone(),
                code: output.code,
            });
        }

        let compile = self.build_invocation(workspace);
        log::debug!("[Build] {}", compile.display());
        let output = self.runner.run(&compile)?;
        if !output.success() {
            log::error!("Ninja exited with exit code {}", output.code);
            return Err(BuildError::BuildFailed {
                project: project.name.clone(),
                code: output.code,
            });
        }

        Ok(())
    }
}

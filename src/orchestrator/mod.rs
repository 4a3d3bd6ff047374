//! Bootstrap pipeline: Preflight -> PrepareOutput -> Building -> Bundling.
//!
//! Projects are acquired and built strictly in configuration order. The first
//! failure aborts the run; artifacts of projects built before it stay on disk
//! and no image is produced.

pub mod executor;
pub mod preflight;
pub mod state;

use chrono::Utc;
use std::path::{Path, PathBuf};

pub use executor::{recreate_dir, BuildInvoker};
pub use preflight::{run_preflight, CheckResult, PreflightReport};
pub use state::{ImageEntryRecord, PipelinePhase, ProjectRecord, RunReport, RunState};

use crate::config::BootstrapConfig;
use crate::error::Result;
use crate::image::assembler;
use crate::models::{BuildTarget, ImageDescriptor};
use crate::source::{git, GitClient, SourceAcquirer};
use crate::system::paths::absolutize;
use crate::system::CommandRunner;

/// One configured bootstrap pipeline.
pub struct Pipeline<'a> {
    config: &'a BootstrapConfig,
    runner: &'a dyn CommandRunner,
    /// Directory relative config paths are resolved against.
    base_dir: PathBuf,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a BootstrapConfig, runner: &'a dyn CommandRunner, base_dir: impl AsRef<Path>) -> Self {
        Pipeline {
            config,
            runner,
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// Absolute directory holding the project checkouts.
    pub fn source_root(&self) -> PathBuf {
        absolutize(&self.base_dir, &self.config.workspace.source_root)
    }

    /// Target with an absolute output root.
    pub fn target(&self, name: &str) -> Result<BuildTarget> {
        let output_base = absolutize(&self.base_dir, &self.config.workspace.output_base);
        Ok(BuildTarget::new(name, &output_base)?)
    }

    /// Run every phase for `target_name`.
    pub fn run(&self, target_name: &str) -> Result<RunReport> {
        let mut state = RunState::new(target_name);
        let result = self.execute(target_name, &mut state);
        match &result {
            Ok(_) => {
                state.transition_to(PipelinePhase::Completed);
            }
            Err(e) => {
                log::debug!("[Pipeline] Failed during {}: {}", state.phase.as_str(), e);
                state.fail();
            }
        }
        result
    }

    fn execute(&self, target_name: &str, state: &mut RunState) -> Result<RunReport> {
        let target = self.target(target_name)?;
        let source_root = self.source_root();

        let image_path = target.output_root.join(&self.config.image.file_name);
        let report_path = target.output_root.join(RunReport::FILE_NAME);

        // Outputs of an earlier run never outlive the start of this one,
        // whichever phase fails.
        remove_stale(&image_path)?;
        remove_stale(&report_path)?;

        state.transition_to(PipelinePhase::Preflight);
        run_preflight(self.runner, self.config, &source_root)?;

        state.transition_to(PipelinePhase::PrepareOutput);
        log::info!("==> Making directories...");
        if self.config.workspace.clean_output {
            recreate_dir(&target.output_root)?;
        } else {
            std::fs::create_dir_all(&target.output_root)?;
        }

        state.transition_to(PipelinePhase::Building);
        log::info!("==> Building components...");
        let acquirer = SourceAcquirer::new(
            GitClient::new(self.runner, &self.config.toolchain.git),
            &self.config.workspace.manifest_file,
            self.config.workspace.reclone_invalid,
        );
        let builder = BuildInvoker::new(self.runner, &self.config.toolchain);

        for project in &self.config.projects {
            log::info!("Building project '{}'", project.name);
            let workspace = target.workspace(project, &source_root);

            let action = acquirer.ensure(project, &workspace.project_dir)?;
            log::debug!("[Pipeline] '{}' sources {}", project.name, action);
            let commit = git::head_commit(&workspace.project_dir).ok();

            builder.build(project, &workspace)?;
            state.projects.push(ProjectRecord {
                name: project.name.clone(),
                action,
                commit,
                build_dir: workspace.build_dir,
            });
        }

        state.transition_to(PipelinePhase::Bundling);
        log::info!("==> Bundling image...");
        let descriptor = ImageDescriptor {
            image_path,
            boot_entry: self.config.image.boot_entry.clone(),
            volume_label: self.config.image.volume_label.clone(),
        };
        let image = assembler::assemble(
            &target.output_root,
            &self.config.artifacts,
            &descriptor,
            &self.config.image,
        )?;

        let report = RunReport {
            target: target.name.clone(),
            started_at: state.started_at,
            finished_at: Utc::now(),
            projects: state.projects.clone(),
            image: image.path,
            image_size: image.size,
            entries: image
                .entries
                .into_iter()
                .map(|e| ImageEntryRecord {
                    image_path: e.image_path,
                    source: e.source,
                    size: e.size,
                })
                .collect(),
        };

        if let Err(e) = report.write_to(&report_path) {
            log::warn!("Could not write {}: {}", report_path.display(), e);
        }

        Ok(report)
    }
}

fn remove_stale(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

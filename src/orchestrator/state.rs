//! Run state and phase tracking.
//!
//! - `PipelinePhase`: discrete stages of one bootstrap run
//! - `RunState`: what has happened so far, updated by the pipeline
//! - `RunReport`: JSON summary written next to the image after a successful run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::source::SourceAction;

/// Stages of a bootstrap run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    /// Configuration loaded, nothing touched yet
    Init,
    /// Repository and host tool checks
    Preflight,
    /// Output root being recreated
    PrepareOutput,
    /// Acquiring and building projects
    Building,
    /// Writing the ISO image
    Bundling,
    Completed,
    Failed,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Init => "init",
            PipelinePhase::Preflight => "preflight",
            PipelinePhase::PrepareOutput => "prepare_output",
            PipelinePhase::Building => "building",
            PipelinePhase::Bundling => "bundling",
            PipelinePhase::Completed => "completed",
            PipelinePhase::Failed => "failed",
        }
    }

    /// Get all valid phase transitions FROM this phase.
    pub fn valid_next_phases(&self) -> Vec<PipelinePhase> {
        match self {
            PipelinePhase::Init => vec![PipelinePhase::Preflight, PipelinePhase::Failed],
            PipelinePhase::Preflight => vec![PipelinePhase::PrepareOutput, PipelinePhase::Failed],
            PipelinePhase::PrepareOutput => vec![PipelinePhase::Building, PipelinePhase::Failed],
            PipelinePhase::Building => vec![PipelinePhase::Bundling, PipelinePhase::Failed],
            PipelinePhase::Bundling => vec![PipelinePhase::Completed, PipelinePhase::Failed],
            PipelinePhase::Completed => vec![],
            PipelinePhase::Failed => vec![],
        }
    }

    pub fn can_transition_to(&self, next: PipelinePhase) -> bool {
        self.valid_next_phases().contains(&next)
    }
}

/// Outcome for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub name: String,
    pub action: SourceAction,
    /// Checked-out commit, when the tree is a git checkout
    pub commit: Option<String>,
    pub build_dir: PathBuf,
}

/// Mutable state of one run.
#[derive(Debug, Clone)]
pub struct RunState {
    pub target: String,
    pub phase: PipelinePhase,
    pub projects: Vec<ProjectRecord>,
    pub started_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(target: &str) -> Self {
        RunState {
            target: target.to_string(),
            phase: PipelinePhase::Init,
            projects: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Move to `next`, ignoring transitions the phase graph does not allow.
    pub fn transition_to(&mut self, next: PipelinePhase) -> bool {
        if !self.phase.can_transition_to(next) {
            log::debug!(
                "[State] Ignoring transition {} -> {}",
                self.phase.as_str(),
                next.as_str()
            );
            return false;
        }
        log::debug!("[State] {} -> {}", self.phase.as_str(), next.as_str());
        self.phase = next;
        true
    }

    pub fn fail(&mut self) {
        self.transition_to(PipelinePhase::Failed);
    }
}

/// One bundled image entry in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntryRecord {
    pub image_path: String,
    pub source: PathBuf,
    pub size: u64,
}

/// JSON summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub projects: Vec<ProjectRecord>,
    pub image: PathBuf,
    pub image_size: u64,
    pub entries: Vec<ImageEntryRecord>,
}

impl RunReport {
    /// File name of the report inside the output root.
    pub const FILE_NAME: &'static str = "bootstrap-report.json";

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut state = RunState::new("x86_64-Debug");
        for phase in [
            PipelinePhase::Preflight,
            PipelinePhase::PrepareOutput,
            PipelinePhase::Building,
            PipelinePhase::Bundling,
            PipelinePhase::Completed,
        ] {
            assert!(state.transition_to(phase));
        }
        assert_eq!(state.phase, PipelinePhase::Completed);
    }

    #[test]
    fn test_skipping_phases_is_rejected() {
        let mut state = RunState::new("x86_64-Debug");
        assert!(!state.transition_to(PipelinePhase::Bundling));
        assert_eq!(state.phase, PipelinePhase::Init);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(PipelinePhase::Completed.valid_next_phases().is_empty());
        assert!(PipelinePhase::Failed.valid_next_phases().is_empty());
        assert!(PipelinePhase::Building.can_transition_to(PipelinePhase::Failed));
    }

    #[test]
    fn test_report_serializes_actions_in_snake_case() {
        let now = Utc::now();
        let report = RunReport {
            target: "x86_64-Debug".to_string(),
            started_at: now,
            finished_at: now,
            projects: vec![ProjectRecord {
                name: "SparkBoot".to_string(),
                action: SourceAction::Cloned,
                commit: None,
                build_dir: PathBuf::from("out/x86_64-Debug/SparkBoot"),
            }],
            image: PathBuf::from("out/x86_64-Debug/spark.iso"),
            image_size: 2048,
            entries: Vec::new(),
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"action\":\"cloned\""));

        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}

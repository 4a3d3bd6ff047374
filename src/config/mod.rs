//! Configuration module for the bootstrap pipeline.
//!
//! The project list, the artifact mapping, image settings and the
//! cross-build toolchain used to be compile-time tables. They now live in a
//! [`BootstrapConfig`] that is loaded from TOML (see [`loader`]), checked by
//! [`validator`], and passed into the orchestrator.
//!
//! # Module Structure
//!
//! - `loader`: Locates and parses `bootstrap.toml`
//! - `validator`: Rejects inconsistent configurations before the pipeline starts
//!
//! # Defaults
//!
//! Every field has a default, so an empty file (or no file at all) yields the
//! stock Spark OS layout: `SparkBoot` and `SparkKernel` cloned from GitHub,
//! bundled into `spark.iso` with `BOOTX64.EFI` as the boot entry.

pub mod loader;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::{ArtifactMapping, ProjectSpec};

/// Complete bootstrap configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub workspace: WorkspaceSettings,

    /// Projects in build order.
    pub projects: Vec<ProjectSpec>,

    /// Artifacts in image order.
    pub artifacts: ArtifactMapping,

    pub image: ImageSettings,

    pub toolchain: ToolchainSettings,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig {
            workspace: WorkspaceSettings::default(),
            projects: vec![
                ProjectSpec::new(
                    "SparkBoot",
                    Some("https://github.com/Official-Spark-OS/SparkBoot.git"),
                ),
                ProjectSpec::new(
                    "SparkKernel",
                    Some("https://github.com/Official-Spark-OS/SparkKernel.git"),
                ),
            ],
            artifacts: ArtifactMapping::new()
                .with("EFI/BOOT/BOOTX64.EFI", "SparkBoot/BOOTX64.EFI")
                .with("system/kernel.bin", "SparkKernel/kernel.bin"),
            image: ImageSettings::default(),
            toolchain: ToolchainSettings::default(),
        }
    }
}

/// Where sources live, where output goes, and how destructive a run may be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    /// Directory holding one checkout per project.
    pub source_root: PathBuf,

    /// Parent of the per-target output roots.
    pub output_base: PathBuf,

    /// File whose presence marks a checkout as buildable.
    pub manifest_file: String,

    /// Directory for session log files.
    pub log_dir: PathBuf,

    /// Remove `output_base/<target>` before building.
    pub clean_output: bool,

    /// Delete and re-clone checkouts that lack the manifest file.
    pub reclone_invalid: bool,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        WorkspaceSettings {
            source_root: PathBuf::from("."),
            output_base: PathBuf::from("out"),
            manifest_file: "CMakeLists.txt".to_string(),
            log_dir: PathBuf::from("out/logs"),
            clean_output: true,
            reclone_invalid: true,
        }
    }
}

/// ISO image parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub file_name: String,
    pub volume_label: String,

    /// Image path of the El Torito boot entry; must be one of the mapped entries.
    pub boot_entry: String,
    pub boot_load_segment: u16,

    /// Number of 512-byte sectors the firmware loads.
    pub boot_load_size: u16,

    /// Name of the boot catalog file in the image root.
    pub boot_catalog: String,

    pub joliet: bool,
    pub rock_ridge: bool,
    pub pad: bool,

    /// Fixed timestamp for every date in the image; falls back to
    /// `SOURCE_DATE_EPOCH`, then 0.
    pub source_date_epoch: Option<i64>,
}

impl Default for ImageSettings {
    fn default() -> Self {
        ImageSettings {
            file_name: "spark.iso".to_string(),
            volume_label: "SPARK_OS".to_string(),
            boot_entry: "EFI/BOOT/BOOTX64.EFI".to_string(),
            boot_load_segment: 0,
            boot_load_size: 4,
            boot_catalog: "boot.catalog".to_string(),
            joliet: true,
            rock_ridge: true,
            pad: true,
            source_date_epoch: None,
        }
    }
}

impl ImageSettings {
    /// Timestamp used for the volume and every directory record.
    pub fn resolved_epoch(&self) -> i64 {
        if let Some(epoch) = self.source_date_epoch {
            return epoch;
        }
        std::env::var("SOURCE_DATE_EPOCH")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// External tools and the fixed cross-build configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainSettings {
    pub git: String,
    pub cmake: String,
    pub ninja: String,
    pub system_name: String,
    pub c_compiler: String,
    pub cxx_compiler: String,
    pub asm_compiler: String,
    pub generator: String,
    pub extra_configure_args: Vec<String>,

    /// Kill any external process running longer than this.
    pub timeout_secs: Option<u64>,
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        ToolchainSettings {
            git: "git".to_string(),
            cmake: "cmake".to_string(),
            ninja: "ninja".to_string(),
            system_name: "Generic".to_string(),
            c_compiler: "clang".to_string(),
            cxx_compiler: "clang++".to_string(),
            asm_compiler: "nasm".to_string(),
            generator: "Ninja".to_string(),
            extra_configure_args: Vec::new(),
            timeout_secs: None,
        }
    }
}

impl ToolchainSettings {
    /// Arguments for the configure step, source directory last.
    pub fn configure_args(&self, project_dir: &std::path::Path) -> Vec<String> {
        let mut args = vec![
            format!("-DCMAKE_SYSTEM_NAME={}", self.system_name),
            format!("-DCMAKE_C_COMPILER={}", self.c_compiler),
            format!("-DCMAKE_CXX_COMPILER={}", self.cxx_compiler),
            format!("-DCMAKE_ASM_NASM_COMPILER={}", self.asm_compiler),
            "-G".to_string(),
            self.generator.clone(),
        ];
        args.extend(self.extra_configure_args.iter().cloned());
        args.push(project_dir.display().to_string());
        args
    }
}

//! Core data types for the bootstrapper.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Target profile used when none is given on the command line.
pub const DEFAULT_TARGET: &str = "x86_64-Debug";

/// One source project to fetch and build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSpec {
    /// Project identifier; also the checkout directory and build directory name.
    pub name: String,

    /// Where to clone the project from when no usable checkout exists.
    #[serde(default)]
    pub repository: Option<String>,
}

impl ProjectSpec {
    pub fn new(name: impl Into<String>, repository: Option<&str>) -> Self {
        ProjectSpec {
            name: name.into(),
            repository: repository.map(str::to_string),
        }
    }
}

/// Pairs an image path with a build artifact relative to the output root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Path the artifact occupies inside the image, e.g. `EFI/BOOT/BOOTX64.EFI`.
    pub image_path: String,

    /// Location relative to the target output root, e.g. `SparkBoot/BOOTX64.EFI`.
    pub source: String,
}

/// Ordered set of artifacts to bundle. Order is preserved into the image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactMapping(pub Vec<ArtifactEntry>);

impl ArtifactMapping {
    pub fn new() -> Self {
        ArtifactMapping(Vec::new())
    }

    /// Append a pair, keeping insertion order.
    pub fn with(mut self, image_path: &str, source: &str) -> Self {
        self.0.push(ArtifactEntry {
            image_path: image_path.to_string(),
            source: source.to_string(),
        });
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArtifactEntry> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_image_path(&self, image_path: &str) -> bool {
        let wanted = normalize_image_path(image_path);
        self.0
            .iter()
            .any(|e| normalize_image_path(&e.image_path) == wanted)
    }
}

/// Strip leading/trailing separators so `/EFI/BOOT/X` and `EFI/BOOT/X` compare equal.
pub fn normalize_image_path(path: &str) -> &str {
    path.trim_matches('/')
}

/// Build target derived once from the target profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    pub name: String,
    pub output_root: PathBuf,
}

impl BuildTarget {
    /// `output_root = output_base/<name>`.
    ///
    /// The name must be a single, ordinary path component because the
    /// output root is removed recursively at the start of every run.
    pub fn new(name: &str, output_base: &Path) -> Result<Self, ConfigError> {
        let trimmed = name.trim();
        let invalid = trimmed.is_empty()
            || trimmed == "."
            || trimmed == ".."
            || trimmed.contains('/')
            || trimmed.contains('\\');
        if invalid {
            return Err(ConfigError::InvalidTarget(name.to_string()));
        }

        Ok(BuildTarget {
            name: trimmed.to_string(),
            output_root: output_base.join(trimmed),
        })
    }

    /// Per-project workspace for this target.
    pub fn workspace(&self, project: &ProjectSpec, source_root: &Path) -> ProjectWorkspace {
        ProjectWorkspace {
            project_dir: source_root.join(&project.name),
            build_dir: self.output_root.join(&project.name),
        }
    }
}

/// Source tree and per-target build directory of one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectWorkspace {
    pub project_dir: PathBuf,
    pub build_dir: PathBuf,
}

/// Everything needed to produce the final image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub image_path: PathBuf,
    pub boot_entry: String,
    pub volume_label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_target_output_root() {
        let target = BuildTarget::new("x86_64-Debug", Path::new("out")).unwrap();
        assert_eq!(target.output_root, PathBuf::from("out/x86_64-Debug"));
    }

    #[test]
    fn test_build_target_rejects_traversal() {
        for bad in ["", "  ", ".", "..", "../etc", "a/b", "a\\b"] {
            assert!(BuildTarget::new(bad, Path::new("out")).is_err(), "{:?}", bad);
        }
    }

    #[test]
    fn test_workspace_paths() {
        let target = BuildTarget::new("x86_64-Release", Path::new("/w/out")).unwrap();
        let ws = target.workspace(&ProjectSpec::new("SparkKernel", None), Path::new("/w"));
        assert_eq!(ws.project_dir, PathBuf::from("/w/SparkKernel"));
        assert_eq!(ws.build_dir, PathBuf::from("/w/out/x86_64-Release/SparkKernel"));
    }

    #[test]
    fn test_mapping_keeps_order_and_matches_boot_entry() {
        let mapping = ArtifactMapping::new()
            .with("system/kernel.bin", "SparkKernel/kernel.bin")
            .with("EFI/BOOT/BOOTX64.EFI", "SparkBoot/BOOTX64.EFI");
        let paths: Vec<_> = mapping.iter().map(|e| e.image_path.as_str()).collect();
        assert_eq!(paths, vec!["system/kernel.bin", "EFI/BOOT/BOOTX64.EFI"]);
        assert!(mapping.contains_image_path("/EFI/BOOT/BOOTX64.EFI"));
        assert!(!mapping.contains_image_path("EFI/BOOT/BOOTIA32.EFI"));
    }
}

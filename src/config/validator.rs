//! Configuration validation.
//!
//! Runs before the pipeline touches the filesystem, so a bad table can never
//! cause the output root or a checkout to be deleted.

use std::collections::HashSet;
use std::path::{Component, Path};

use crate::config::BootstrapConfig;
use crate::error::ConfigError;
use crate::models::normalize_image_path;

/// Validate the whole configuration, reporting the first problem found.
pub fn validate_config(config: &BootstrapConfig) -> Result<(), ConfigError> {
    validate_projects(config)?;
    validate_artifacts(config)?;
    validate_image(config)?;
    Ok(())
}

fn validate_projects(config: &BootstrapConfig) -> Result<(), ConfigError> {
    if config.projects.is_empty() {
        return Err(ConfigError::ValidationFailed(
            "At least one project must be configured".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for project in &config.projects {
        if !is_single_component(&project.name) {
            return Err(ConfigError::ValidationFailed(format!(
                "Project name '{}' must be a single directory name",
                project.name
            )));
        }
        if !seen.insert(project.name.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Project '{}' is listed more than once",
                project.name
            )));
        }
        if let Some(url) = &project.repository {
            if url.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "Project '{}' has an empty repository URL",
                    project.name
                )));
            }
        }
    }

    if config.workspace.manifest_file.trim().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "workspace.manifest_file cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_artifacts(config: &BootstrapConfig) -> Result<(), ConfigError> {
    if config.artifacts.is_empty() {
        return Err(ConfigError::ValidationFailed(
            "The artifact mapping is empty; nothing would be bundled".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for entry in config.artifacts.iter() {
        let image_path = normalize_image_path(&entry.image_path);
        if image_path.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Artifact image_path cannot be empty".to_string(),
            ));
        }
        if !seen.insert(image_path) {
            return Err(ConfigError::ValidationFailed(format!(
                "Image path '{}' is mapped more than once",
                entry.image_path
            )));
        }
        if !is_plain_relative(Path::new(&entry.source)) {
            return Err(ConfigError::ValidationFailed(format!(
                "Artifact source '{}' must be relative to the output root",
                entry.source
            )));
        }
    }

    Ok(())
}

fn validate_image(config: &BootstrapConfig) -> Result<(), ConfigError> {
    let image = &config.image;

    if !is_single_component(&image.file_name) {
        return Err(ConfigError::ValidationFailed(format!(
            "Image file name '{}' must be a plain file name",
            image.file_name
        )));
    }
    if image.volume_label.trim().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Volume label cannot be empty".to_string(),
        ));
    }
    if image.boot_load_size == 0 {
        return Err(ConfigError::ValidationFailed(
            "boot_load_size must be at least one sector".to_string(),
        ));
    }
    if !config.artifacts.contains_image_path(&image.boot_entry) {
        return Err(ConfigError::ValidationFailed(format!(
            "Boot entry '{}' is not one of the mapped image paths",
            image.boot_entry
        )));
    }
    if config.artifacts.contains_image_path(&image.boot_catalog) {
        return Err(ConfigError::ValidationFailed(format!(
            "Boot catalog name '{}' clashes with a mapped artifact",
            image.boot_catalog
        )));
    }

    Ok(())
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains('\\')
}

fn is_plain_relative(path: &Path) -> bool {
    path.components().count() > 0
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

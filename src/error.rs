//! Unified error type hierarchy for the Spark OS bootstrapper
//!
//! Provides structured error handling with AcquireError, BuildError, ImageError,
//! ConfigError, ProcessError and the pipeline-level PipelineError.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures while spawning or waiting on an external process.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program}' did not finish within {secs}s and was killed")]
    TimedOut { program: String, secs: u64 },
}

/// Source tree acquisition errors (clone / update / manifest gate).
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("Project '{0}' does not exist and isn't linked to a git repository")]
    MissingRepository(String),

    #[error("Failed to clone '{project}' (git exited with code {code})")]
    CloneFailed { project: String, code: i32 },

    #[error("Project '{0}' is missing its build manifest or does not exist")]
    InvalidProject(String),

    #[error("Process error while acquiring sources: {0}")]
    Process(#[from] ProcessError),

    #[error("IO error during source acquisition: {0}")]
    Io(#[from] io::Error),
}

/// Build invocation errors. Both exit-code variants are fatal to the run.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Configure step for '{project}' exited with code {code}")]
    ConfigureFailed { project: String, code: i32 },

    #[error("Build step for '{project}' exited with code {code}")]
    BuildFailed { project: String, code: i32 },

    #[error("Process error during build: {0}")]
    Process(#[from] ProcessError),

    #[error("IO error while preparing build directory: {0}")]
    Io(#[from] io::Error),
}

/// Image assembly errors.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Required artifact missing: {0}")]
    MissingArtifact(PathBuf),

    #[error("Writing ISO file failed with code {code} ({message})")]
    WriteFailed { code: i32, message: String },

    #[error("Boot entry '{0}' is not part of the image")]
    BootEntryMissing(String),

    #[error("Invalid image entry path: '{0}'")]
    InvalidEntryPath(String),

    #[error("Image entry '{0}' collides with an existing entry")]
    NameCollision(String),

    #[error("Image entry '{0}' exceeds the 4 GiB ISO 9660 file size limit")]
    EntryTooLarge(String),

    #[error("Entry '{path}' declared {expected} bytes but received {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },
}

impl From<io::Error> for ImageError {
    fn from(e: io::Error) -> Self {
        ImageError::WriteFailed {
            code: e.raw_os_error().unwrap_or(-1),
            message: e.to_string(),
        }
    }
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid TOML in config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid target profile '{0}'")]
    InvalidTarget(String),

    #[error("IO error during config operations: {0}")]
    Io(#[from] io::Error),
}

/// Top-level error for one bootstrap run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Preflight checks failed: {0}")]
    Preflight(String),

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("IO error while preparing output tree: {0}")]
    Io(#[from] io::Error),
}

/// Result alias used across the pipeline.
pub type Result<T> = std::result::Result<T, PipelineError>;

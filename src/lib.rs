//! Spark OS Bootstrapper
//!
//! Fetches the Spark OS component projects, cross-builds each one with CMake
//! and Ninja, and bundles the resulting artifacts into a bootable ISO image.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Core data structures and types
//! - **config**: `bootstrap.toml` loading and validation
//! - **system**: OS abstraction (process execution, path lookup)
//! - **log_collector**: Console and session-file logging backend
//! - **source**: Project checkout acquisition (clone, re-clone, update)
//! - **orchestrator**: Preflight, build invocation and run state
//! - **image**: ISO 9660 writer and artifact bundling

// Core foundational modules
pub mod error;
pub mod models;

// Configuration management module
pub mod config;

// System abstraction module (process execution, tool lookup)
pub mod system;

// Decoupled logging backend
pub mod log_collector;

// Source acquisition
pub mod source;

// Pipeline orchestration and state tracking
pub mod orchestrator;

// Bootable image creation
pub mod image;

// Re-export the log crate for macro usage
pub use log;

// Re-export log collector for use throughout the system
pub use log_collector::{LogCollector, LogLine};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

// Re-export error types for easy access
pub use error::{
    AcquireError, BuildError, ConfigError, ImageError, PipelineError, ProcessError, Result,
};

// Re-export model types for easy access
pub use models::{
    ArtifactEntry, ArtifactMapping, BuildTarget, ImageDescriptor, ProjectSpec, ProjectWorkspace,
    DEFAULT_TARGET,
};

pub use config::BootstrapConfig;
pub use orchestrator::{Pipeline, PipelinePhase, RunReport};
pub use source::SourceAction;
pub use system::{CommandRunner, Invocation, ProcessOutput, SystemRunner};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

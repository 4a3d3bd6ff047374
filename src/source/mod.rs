//! Project source management.
//!
//! - `acquirer`: clone / re-clone / update policy per project directory
//! - `git`: git command plumbing and checkout inspection

pub mod acquirer;
pub mod git;

pub use acquirer::{SourceAcquirer, SourceAction};
pub use git::{GitClient, GitError};

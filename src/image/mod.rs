//! Bootable image creation.
//!
//! - `iso9660`: streaming ISO 9660 writer (Joliet, Rock Ridge, El Torito)
//! - `assembler`: maps build artifacts into the image

pub mod assembler;
pub mod iso9660;

pub use assembler::{assemble, AssembledImage, ResolvedArtifact};
pub use iso9660::{ArchiveWriter, EntryHeader, IsoOptions, IsoWriter};

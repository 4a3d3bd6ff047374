//! Bundles build artifacts into the bootable image.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::ImageSettings;
use crate::error::ImageError;
use crate::image::iso9660::{ArchiveWriter, BootOptions, EntryHeader, IsoOptions, IsoWriter};
use crate::models::{normalize_image_path, ArtifactMapping, ImageDescriptor};

const COPY_CHUNK: usize = 64 * 1024;

/// One artifact resolved against the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub image_path: String,
    pub source: PathBuf,
    pub size: u64,
}

/// Result of a successful assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledImage {
    pub path: PathBuf,
    pub size: u64,
    pub entries: Vec<ResolvedArtifact>,
}

/// Stat every mapped source; the first missing one fails the whole image.
pub fn resolve_artifacts(output_root: &Path, mapping: &ArtifactMapping) -> Result<Vec<ResolvedArtifact>, ImageError> {
    mapping
        .iter()
        .map(|entry| {
            let source = output_root.join(&entry.source);
            let metadata = std::fs::metadata(&source)
                .map_err(|_| ImageError::MissingArtifact(source.clone()))?;
            if !metadata.is_file() {
                return Err(ImageError::MissingArtifact(source));
            }
            Ok(ResolvedArtifact {
                image_path: normalize_image_path(&entry.image_path).to_string(),
                source,
                size: metadata.len(),
            })
        })
        .collect()
}

/// Volume options for `descriptor` under `settings`.
pub fn iso_options(descriptor: &ImageDescriptor, settings: &ImageSettings) -> IsoOptions {
    IsoOptions {
        volume_label: descriptor.volume_label.clone(),
        joliet: settings.joliet,
        rock_ridge: settings.rock_ridge,
        pad: settings.pad,
        boot: Some(BootOptions {
            entry: normalize_image_path(&descriptor.boot_entry).to_string(),
            catalog_name: settings.boot_catalog.clone(),
            load_segment: settings.boot_load_segment,
            load_size: settings.boot_load_size,
        }),
        timestamp: settings.resolved_epoch(),
    }
}

/// Write each artifact as a header followed by its bytes, in mapping order.
pub fn write_entries<W: ArchiveWriter>(writer: &mut W, artifacts: &[ResolvedArtifact]) -> Result<(), ImageError> {
    let mut buffer = vec![0u8; COPY_CHUNK];
    for artifact in artifacts {
        log::debug!(
            "[Image] {} <- {} ({} bytes)",
            artifact.image_path,
            artifact.source.display(),
            artifact.size
        );
        writer.write_header(EntryHeader::file(&artifact.image_path, artifact.size))?;

        let mut file = File::open(&artifact.source)
            .map_err(|_| ImageError::MissingArtifact(artifact.source.clone()))?;
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            writer.write_data(&buffer[..read])?;
        }
    }
    Ok(())
}

/// Build the image described by `descriptor` from `mapping`.
///
/// Nothing is written at `descriptor.image_path` unless every artifact was
/// bundled successfully.
pub fn assemble(
    output_root: &Path,
    mapping: &ArtifactMapping,
    descriptor: &ImageDescriptor,
    settings: &ImageSettings,
) -> Result<AssembledImage, ImageError> {
    let artifacts = resolve_artifacts(output_root, mapping)?;

    let mut writer = IsoWriter::create(&descriptor.image_path, iso_options(descriptor, settings))?;
    write_entries(&mut writer, &artifacts)?;
    let size = writer.finish()?;

    log::info!(
        "Wrote {} ({} entries, {} bytes)",
        descriptor.image_path.display(),
        artifacts.len(),
        size
    );

    Ok(AssembledImage {
        path: descriptor.image_path.clone(),
        size,
        entries: artifacts,
    })
}

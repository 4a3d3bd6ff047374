mod common;

use std::path::Path;

use common::{IsoImage, SECTOR};
use spark_bootstrap::config::ImageSettings;
use spark_bootstrap::error::ImageError;
use spark_bootstrap::image::assembler::assemble;
use spark_bootstrap::image::iso9660::{ArchiveWriter, EntryHeader, IsoOptions, IsoWriter};
use spark_bootstrap::models::{ArtifactMapping, ImageDescriptor};
use tempfile::TempDir;

fn settings() -> ImageSettings {
    ImageSettings {
        source_date_epoch: Some(1_600_000_000),
        ..ImageSettings::default()
    }
}

fn descriptor(output_root: &Path) -> ImageDescriptor {
    ImageDescriptor {
        image_path: output_root.join("spark.iso"),
        boot_entry: "EFI/BOOT/BOOTX64.EFI".to_string(),
        volume_label: "SPARK_OS".to_string(),
    }
}

fn stock_outputs(output_root: &Path, kernel: &[u8]) {
    std::fs::create_dir_all(output_root.join("SparkBoot")).unwrap();
    std::fs::create_dir_all(output_root.join("SparkKernel")).unwrap();
    std::fs::write(output_root.join("SparkBoot/BOOTX64.EFI"), vec![0x4d; 3000]).unwrap();
    std::fs::write(output_root.join("SparkKernel/kernel.bin"), kernel).unwrap();
}

fn stock_mapping() -> ArtifactMapping {
    ArtifactMapping::new()
        .with("EFI/BOOT/BOOTX64.EFI", "SparkBoot/BOOTX64.EFI")
        .with("system/kernel.bin", "SparkKernel/kernel.bin")
}

#[test]
fn test_image_contains_mapped_entries_and_boot_catalog() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    stock_outputs(root, b"kernel image bytes");

    let image = assemble(root, &stock_mapping(), &descriptor(root), &settings()).unwrap();
    assert_eq!(image.entries.len(), 2);

    let iso = IsoImage::open(&image.path);
    assert_eq!(iso.bytes.len() as u64, image.size);
    assert_eq!(iso.volume_sectors() as usize * SECTOR, iso.bytes.len());
    assert_eq!(iso.volume_id(), "SPARK_OS");

    let mut joliet: Vec<_> = iso.joliet_files().into_iter().map(|f| f.path).collect();
    joliet.sort();
    assert_eq!(
        joliet,
        vec!["EFI/BOOT/BOOTX64.EFI", "boot.catalog", "system/kernel.bin"]
    );

    let files = iso.rock_ridge_files();
    let kernel = files.iter().find(|f| f.path == "system/kernel.bin").unwrap();
    assert_eq!(iso.file_data(kernel), b"kernel image bytes");
    let loader = files.iter().find(|f| f.path == "EFI/BOOT/BOOTX64.EFI").unwrap();
    assert_eq!(iso.file_data(loader), vec![0x4d; 3000].as_slice());

    let primary: Vec<_> = iso.primary_identifiers().into_iter().map(|f| f.path).collect();
    assert!(primary.contains(&"SYSTEM/KERNEL.BIN;1".to_string()));
    assert!(primary.contains(&"EFI/BOOT/BOOTX64.EFI;1".to_string()));
}

#[test]
fn test_boot_catalog_points_at_boot_entry() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    stock_outputs(root, b"k");

    let image = assemble(root, &stock_mapping(), &descriptor(root), &settings()).unwrap();
    let iso = IsoImage::open(&image.path);

    let catalog_sector = iso.boot_catalog_sector().expect("boot record present");
    let catalog = iso.sector(catalog_sector);

    let validation = &catalog[..32];
    assert_eq!(validation[0], 1);
    assert_eq!(&validation[30..32], &[0x55, 0xAA]);
    let sum = validation
        .chunks(2)
        .fold(0u16, |acc, w| acc.wrapping_add(u16::from_le_bytes([w[0], w[1]])));
    assert_eq!(sum, 0);

    let default = &catalog[32..64];
    assert_eq!(default[0], 0x88);
    assert_eq!(default[1], 0);
    assert_eq!(u16::from_le_bytes([default[6], default[7]]), 4);
    let load_rba = u32::from_le_bytes([default[8], default[9], default[10], default[11]]);

    let loader = iso
        .joliet_files()
        .into_iter()
        .find(|f| f.path == "EFI/BOOT/BOOTX64.EFI")
        .unwrap();
    assert_eq!(load_rba, loader.extent);

    let catalog_file = iso
        .joliet_files()
        .into_iter()
        .find(|f| f.path == "boot.catalog")
        .unwrap();
    assert_eq!(catalog_file.extent, catalog_sector);
}

#[test]
fn test_zero_byte_artifact_is_a_valid_entry() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    stock_outputs(root, b"");

    let image = assemble(root, &stock_mapping(), &descriptor(root), &settings()).unwrap();
    let iso = IsoImage::open(&image.path);
    let kernel = iso
        .joliet_files()
        .into_iter()
        .find(|f| f.path == "system/kernel.bin")
        .expect("zero-byte entry listed");
    assert_eq!(kernel.size, 0);
    assert_eq!(image.entries[1].size, 0);
}

#[test]
fn test_identical_inputs_give_identical_images() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    stock_outputs(root, &[1, 2, 3, 4, 5]);

    let first = assemble(root, &stock_mapping(), &descriptor(root), &settings()).unwrap();
    let first_bytes = std::fs::read(&first.path).unwrap();
    let second = assemble(root, &stock_mapping(), &descriptor(root), &settings()).unwrap();
    let second_bytes = std::fs::read(&second.path).unwrap();

    assert_eq!(first_bytes, second_bytes);
}

#[test]
fn test_missing_artifact_leaves_no_image() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::create_dir_all(root.join("SparkBoot")).unwrap();
    std::fs::write(root.join("SparkBoot/BOOTX64.EFI"), b"efi").unwrap();

    let err = assemble(root, &stock_mapping(), &descriptor(root), &settings()).unwrap_err();
    assert!(matches!(err, ImageError::MissingArtifact(p) if p.ends_with("SparkKernel/kernel.bin")));
    assert!(!root.join("spark.iso").exists());

    let leftovers: Vec<_> = std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temporary files left: {:?}", leftovers);
}

#[test]
fn test_unfinished_writer_does_not_create_image() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("spark.iso");
    {
        let mut writer = IsoWriter::create(&path, IsoOptions::default()).unwrap();
        writer.write_header(EntryHeader::file("a.bin", 3)).unwrap();
        writer.write_data(b"abc").unwrap();
    }
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_large_directory_spans_sectors() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("many.iso");
    let mut writer = IsoWriter::create(&path, IsoOptions::default()).unwrap();

    let names: Vec<String> = (0..80)
        .map(|i| format!("modules/driver_with_long_name_{:03}.ko", i))
        .collect();
    for name in &names {
        writer.write_header(EntryHeader::file(name, 1)).unwrap();
        writer.write_data(b"x").unwrap();
    }
    writer.finish().unwrap();

    let iso = IsoImage::open(&path);
    let mut joliet: Vec<_> = iso.joliet_files().into_iter().map(|f| f.path).collect();
    joliet.sort();
    assert_eq!(joliet, names);

    let mut rock_ridge: Vec<_> = iso.rock_ridge_files().into_iter().map(|f| f.path).collect();
    rock_ridge.sort();
    assert_eq!(rock_ridge, names);
}

#[test]
fn test_padding_and_extensions_are_optional() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    stock_outputs(root, b"kernel");

    let padded = assemble(root, &stock_mapping(), &descriptor(root), &settings()).unwrap();

    let plain_settings = ImageSettings {
        pad: false,
        joliet: false,
        rock_ridge: false,
        ..settings()
    };
    let mut plain_descriptor = descriptor(root);
    plain_descriptor.image_path = root.join("plain.iso");
    let plain = assemble(root, &stock_mapping(), &plain_descriptor, &plain_settings).unwrap();

    assert!(padded.size >= plain.size + 150 * SECTOR as u64);
    let iso = IsoImage::open(&plain.path);
    assert!(iso.descriptors().iter().all(|(t, _)| *t != 2));
    let primary: Vec<_> = iso.primary_identifiers().into_iter().map(|f| f.path).collect();
    assert!(primary.contains(&"BOOT.CATALOG;1".to_string()));
}

#[test]
fn test_names_that_mangle_alike_stay_distinct() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::create_dir_all(root.join("SparkKernel")).unwrap();
    std::fs::write(root.join("SparkKernel/kernel-a.bin"), b"dash").unwrap();
    std::fs::write(root.join("SparkKernel/kernel_a.bin"), b"underscore").unwrap();
    std::fs::write(root.join("SparkKernel/BOOTX64.EFI"), b"efi").unwrap();

    let mapping = ArtifactMapping::new()
        .with("EFI/BOOT/BOOTX64.EFI", "SparkKernel/BOOTX64.EFI")
        .with("system/kernel-a.bin", "SparkKernel/kernel-a.bin")
        .with("system/kernel_a.bin", "SparkKernel/kernel_a.bin");
    let image = assemble(root, &mapping, &descriptor(root), &settings()).unwrap();
    let iso = IsoImage::open(&image.path);

    let mut primary: Vec<_> = iso
        .primary_identifiers()
        .into_iter()
        .map(|f| f.path)
        .filter(|p| p.starts_with("SYSTEM/"))
        .collect();
    primary.sort();
    assert_eq!(primary, vec!["SYSTEM/KERNEL_A.BIN;1", "SYSTEM/KERNEL_A_1.BIN;1"]);

    let files = iso.rock_ridge_files();
    let dash = files.iter().find(|f| f.path == "system/kernel-a.bin").unwrap();
    let underscore = files.iter().find(|f| f.path == "system/kernel_a.bin").unwrap();
    assert_eq!(iso.file_data(dash), b"dash");
    assert_eq!(iso.file_data(underscore), b"underscore");
}

//! ISO 9660 image writer with Joliet, Rock Ridge and El Torito support.
//!
//! Entries are streamed in through [`ArchiveWriter`]: a header announcing the
//! path and size, followed by exactly that many bytes of data. File data is
//! staged in an anonymous temporary file. [`ArchiveWriter::finish`] lays out
//! the volume, writes it into a temporary file beside the destination and
//! renames it into place. An unfinished or failed writer leaves the
//! destination untouched.
//!
//! # Volume layout
//!
//! ```text
//! 0..16   system area (zeros)
//! 16      primary volume descriptor
//! 17      El Torito boot record          (boot enabled)
//! ..      Joliet supplementary descriptor (joliet enabled)
//! ..      descriptor set terminator
//! ..      path tables  (L + M, primary then Joliet)
//! ..      directory extents (primary tree, then Joliet tree)
//! ..      Rock Ridge continuation area   (rock ridge enabled)
//! ..      boot catalog                   (boot enabled)
//! ..      file data, in the order the entries were written
//! ..      150 sectors of zero padding    (pad enabled)
//! ```
//!
//! Directory records inside each extent are sorted by identifier, which the
//! format requires; file data keeps the caller's order.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::ImageError;

pub const SECTOR_SIZE: usize = 2048;
const SYSTEM_AREA_SECTORS: u32 = 16;
const PAD_SECTORS: u32 = 150;
const MAX_RECORD_LEN: usize = 255;

/// Primary (level 2) identifiers: name + '.' + extension.
const MAX_ISO_FILE_ID: usize = 30;
const MAX_ISO_DIR_ID: usize = 31;
const MAX_JOLIET_CHARS: usize = 64;

const FLAG_DIRECTORY: u8 = 0x02;

const FILE_MODE: u32 = 0o100644;
const DIR_MODE: u32 = 0o040755;

const RRIP_ID: &str = "RRIP_1991A";
const RRIP_DESCRIPTOR: &str =
    "THE ROCK RIDGE INTERCHANGE PROTOCOL PROVIDES SUPPORT FOR POSIX FILE SYSTEM SEMANTICS";
const RRIP_SOURCE: &str = "PLEASE CONTACT DISC PUBLISHER FOR SPECIFICATION SOURCE.  \
SEE PUBLISHER IDENTIFIER IN PRIMARY VOLUME DESCRIPTOR FOR CONTACT INFORMATION.";

const APPLICATION_ID: &str = "SPARK BOOTSTRAP";

/// Kind of entry announced by a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Metadata written ahead of an entry's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub path: String,
    pub size: u64,
    pub kind: EntryKind,
}

impl EntryHeader {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        EntryHeader {
            path: path.into(),
            size,
            kind: EntryKind::File,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        EntryHeader {
            path: path.into(),
            size: 0,
            kind: EntryKind::Directory,
        }
    }
}

/// El Torito boot catalog settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootOptions {
    /// Image path of the boot file.
    pub entry: String,
    /// Name of the catalog file placed in the root directory.
    pub catalog_name: String,
    pub load_segment: u16,
    /// 512-byte sectors loaded by the firmware.
    pub load_size: u16,
}

/// Volume-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoOptions {
    pub volume_label: String,
    pub joliet: bool,
    pub rock_ridge: bool,
    pub pad: bool,
    pub boot: Option<BootOptions>,
    /// Seconds since the Unix epoch used for every timestamp in the image.
    pub timestamp: i64,
}

impl Default for IsoOptions {
    fn default() -> Self {
        IsoOptions {
            volume_label: "CDROM".to_string(),
            joliet: true,
            rock_ridge: true,
            pad: true,
            boot: None,
            timestamp: 0,
        }
    }
}

/// Streaming archive writer contract used by the image assembler.
pub trait ArchiveWriter {
    /// Start a new entry. The previous entry must have received all its data.
    fn write_header(&mut self, header: EntryHeader) -> Result<(), ImageError>;

    /// Append data to the current entry.
    fn write_data(&mut self, data: &[u8]) -> Result<usize, ImageError>;

    /// Finalize the archive. Returns the size of the written image in bytes.
    fn finish(self) -> Result<u64, ImageError>
    where
        Self: Sized;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Dir(usize),
    File(usize),
    Catalog,
}

#[derive(Debug, Clone)]
struct Child {
    name: String,
    target: Target,
}

#[derive(Debug, Clone)]
struct DirInfo {
    parent: usize,
    children: Vec<Child>,
}

#[derive(Debug, Clone)]
struct StagedFile {
    path: String,
    offset: u64,
    size: u64,
}

#[derive(Debug, Clone)]
struct Pending {
    file: usize,
    remaining: u64,
}

/// ISO 9660 implementation of [`ArchiveWriter`].
pub struct IsoWriter {
    destination: PathBuf,
    options: IsoOptions,
    staging: File,
    staged_len: u64,
    files: Vec<StagedFile>,
    dirs: Vec<DirInfo>,
    pending: Option<Pending>,
}

impl IsoWriter {
    /// Prepare a writer for `destination`. Nothing is created at the
    /// destination until [`ArchiveWriter::finish`] succeeds.
    pub fn create(destination: impl AsRef<Path>, options: IsoOptions) -> Result<Self, ImageError> {
        Ok(IsoWriter {
            destination: destination.as_ref().to_path_buf(),
            options,
            staging: tempfile::tempfile()?,
            staged_len: 0,
            files: Vec::new(),
            dirs: vec![DirInfo {
                parent: 0,
                children: Vec::new(),
            }],
            pending: None,
        })
    }

    fn complete_pending(&mut self) -> Result<(), ImageError> {
        if let Some(pending) = self.pending.take() {
            if pending.remaining != 0 {
                let file = &self.files[pending.file];
                return Err(ImageError::SizeMismatch {
                    path: file.path.clone(),
                    expected: file.size,
                    actual: file.size - pending.remaining,
                });
            }
        }
        Ok(())
    }

    /// Walk (and create) the directories leading to `components`' parent.
    fn parent_dir_for(&mut self, path: &str, components: &[&str]) -> Result<usize, ImageError> {
        let mut dir = 0;
        for component in components {
            let existing = self.dirs[dir]
                .children
                .iter()
                .find(|c| c.name == *component)
                .map(|c| c.target);
            dir = match existing {
                Some(Target::Dir(sub)) => sub,
                Some(_) => return Err(ImageError::NameCollision(path.to_string())),
                None => {
                    let sub = self.dirs.len();
                    self.dirs.push(DirInfo {
                        parent: dir,
                        children: Vec::new(),
                    });
                    self.dirs[dir].children.push(Child {
                        name: component.to_string(),
                        target: Target::Dir(sub),
                    });
                    sub
                }
            };
        }
        Ok(dir)
    }

    fn lookup(&self, path: &str) -> Option<Target> {
        let components = split_entry_path(path).ok()?;
        let (last, parents) = components.split_last()?;
        let mut dir = 0;
        for component in parents {
            match self.dirs[dir].children.iter().find(|c| c.name == *component)?.target {
                Target::Dir(sub) => dir = sub,
                _ => return None,
            }
        }
        self.dirs[dir]
            .children
            .iter()
            .find(|c| c.name == *last)
            .map(|c| c.target)
    }
}

impl ArchiveWriter for IsoWriter {
    fn write_header(&mut self, header: EntryHeader) -> Result<(), ImageError> {
        self.complete_pending()?;

        let components = split_entry_path(&header.path)?;
        let (last, parents) = components
            .split_last()
            .ok_or_else(|| ImageError::InvalidEntryPath(header.path.clone()))?;
        let dir = self.parent_dir_for(&header.path, parents)?;

        let existing = self.dirs[dir]
            .children
            .iter()
            .find(|c| c.name == *last)
            .map(|c| c.target);

        match header.kind {
            EntryKind::Directory => match existing {
                Some(Target::Dir(_)) => Ok(()),
                Some(_) => Err(ImageError::NameCollision(header.path)),
                None => {
                    let sub = self.dirs.len();
                    self.dirs.push(DirInfo {
                        parent: dir,
                        children: Vec::new(),
                    });
                    self.dirs[dir].children.push(Child {
                        name: last.to_string(),
                        target: Target::Dir(sub),
                    });
                    Ok(())
                }
            },
            EntryKind::File => {
                if existing.is_some() {
                    return Err(ImageError::NameCollision(header.path));
                }
                if header.size > u64::from(u32::MAX) {
                    return Err(ImageError::EntryTooLarge(header.path));
                }

                let index = self.files.len();
                self.dirs[dir].children.push(Child {
                    name: last.to_string(),
                    target: Target::File(index),
                });
                self.files.push(StagedFile {
                    path: header.path,
                    offset: self.staged_len,
                    size: header.size,
                });
                if header.size > 0 {
                    self.pending = Some(Pending {
                        file: index,
                        remaining: header.size,
                    });
                }
                Ok(())
            }
        }
    }

    fn write_data(&mut self, data: &[u8]) -> Result<usize, ImageError> {
        if data.is_empty() {
            return Ok(0);
        }
        let pending = match self.pending.as_mut() {
            Some(p) => p,
            None => {
                let path = self.files.last().map(|f| f.path.clone()).unwrap_or_default();
                let expected = self.files.last().map(|f| f.size).unwrap_or(0);
                return Err(ImageError::SizeMismatch {
                    path,
                    expected,
                    actual: expected + data.len() as u64,
                });
            }
        };

        let len = data.len() as u64;
        if len > pending.remaining {
            let file = &self.files[pending.file];
            return Err(ImageError::SizeMismatch {
                path: file.path.clone(),
                expected: file.size,
                actual: file.size - pending.remaining + len,
            });
        }

        self.staging.write_all(data)?;
        self.staged_len += len;
        pending.remaining -= len;
        Ok(data.len())
    }

    fn finish(mut self) -> Result<u64, ImageError> {
        self.complete_pending()?;

        let boot = match self.options.boot.clone() {
            Some(boot) => {
                let file = match self.lookup(&boot.entry) {
                    Some(Target::File(index)) => index,
                    _ => return Err(ImageError::BootEntryMissing(boot.entry)),
                };
                let catalog = split_entry_path(&boot.catalog_name)?;
                if catalog.len() != 1 {
                    return Err(ImageError::InvalidEntryPath(boot.catalog_name));
                }
                if self.dirs[0].children.iter().any(|c| c.name == catalog[0]) {
                    return Err(ImageError::NameCollision(boot.catalog_name));
                }
                self.dirs[0].children.push(Child {
                    name: catalog[0].to_string(),
                    target: Target::Catalog,
                });
                Some((boot, file))
            }
            None => None,
        };

        let layout = VolumeLayout::compute(&self.dirs, &self.files, &self.options, boot.is_some())?;
        let metadata = layout.render(&self.dirs, &self.files, &self.options, boot.as_ref())?;

        let parent = self
            .destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::Builder::new()
            .prefix(".iso-")
            .suffix(".tmp")
            .tempfile_in(parent)?;

        {
            let mut out = BufWriter::new(temp.as_file_mut());
            out.write_all(&metadata)?;

            let mut written = metadata.len() as u64;
            for (file, extent) in self.files.iter().zip(&layout.file_extents) {
                if file.size == 0 {
                    continue;
                }
                debug_assert_eq!(written, u64::from(*extent) * SECTOR_SIZE as u64);
                self.staging.seek(SeekFrom::Start(file.offset))?;
                let copied = io::copy(&mut (&mut self.staging).take(file.size), &mut out)?;
                if copied != file.size {
                    return Err(ImageError::WriteFailed {
                        code: -1,
                        message: format!("staged data for '{}' is truncated", file.path),
                    });
                }
                let padded = sectors_for(file.size) * SECTOR_SIZE as u64;
                write_zeros(&mut out, padded - file.size)?;
                written += padded;
            }

            let total = u64::from(layout.total_sectors) * SECTOR_SIZE as u64;
            write_zeros(&mut out, total - written)?;
            out.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.persist(&self.destination)
            .map_err(|e| ImageError::from(e.error))?;

        Ok(u64::from(layout.total_sectors) * SECTOR_SIZE as u64)
    }
}

/// Split an image path into components, rejecting empty, `.` and `..` parts.
fn split_entry_path(path: &str) -> Result<Vec<&str>, ImageError> {
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    if components.is_empty() || components.iter().any(|c| *c == "." || *c == "..") {
        return Err(ImageError::InvalidEntryPath(path.to_string()));
    }
    Ok(components)
}

fn sectors_for(bytes: u64) -> u64 {
    bytes.div_ceil(SECTOR_SIZE as u64)
}

fn write_zeros<W: Write>(out: &mut W, mut count: u64) -> io::Result<()> {
    let zeros = [0u8; SECTOR_SIZE];
    while count > 0 {
        let chunk = count.min(SECTOR_SIZE as u64) as usize;
        out.write_all(&zeros[..chunk])?;
        count -= chunk as u64;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

fn d_char(c: char) -> char {
    let c = c.to_ascii_uppercase();
    if c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' {
        c
    } else {
        '_'
    }
}

/// Primary-tree identifier: uppercase d-characters, `NAME.EXT;1` for files.
pub fn iso_identifier(name: &str, is_dir: bool) -> String {
    if is_dir {
        let id: String = name.chars().map(d_char).take(MAX_ISO_DIR_ID).collect();
        return if id.is_empty() { "_".to_string() } else { id };
    }

    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i + 1..]),
        _ => (name, ""),
    };
    let ext: String = ext.chars().map(d_char).take(8).collect();
    let stem_room = MAX_ISO_FILE_ID - 1 - ext.len();
    let mut stem: String = stem.chars().map(d_char).take(stem_room).collect();
    if stem.is_empty() {
        stem.push('_');
    }
    format!("{}.{};1", stem, ext)
}

/// Joliet identifier as UCS-2 big endian bytes.
pub fn joliet_identifier(name: &str, is_dir: bool) -> Vec<u8> {
    let limit = if is_dir {
        MAX_JOLIET_CHARS
    } else {
        MAX_JOLIET_CHARS - 2
    };
    let mut text: String = name
        .chars()
        .map(|c| match c {
            '*' | '/' | ':' | ';' | '?' | '\\' => '_',
            c if (c as u32) > 0xFFFF || c.is_control() => '_',
            c => c,
        })
        .take(limit)
        .collect();
    if !is_dir {
        text.push_str(";1");
    }
    ucs2(&text)
}

/// `id` with a numeric suffix, shortened to stay within the identifier
/// limits: `_N` before the extension for the primary tree, `~N` before
/// `;1` for Joliet.
fn serial_identifier(id: &[u8], flavor: Flavor, is_dir: bool, serial: usize) -> Vec<u8> {
    match flavor {
        Flavor::Primary => {
            let text = String::from_utf8_lossy(id);
            let text: &str = &text;
            let suffix = format!("_{}", serial);
            if is_dir {
                let keep = MAX_ISO_DIR_ID.saturating_sub(suffix.len()).min(text.len());
                return format!("{}{}", &text[..keep], suffix).into_bytes();
            }
            let body = text.strip_suffix(";1").unwrap_or(text);
            let (stem, ext) = body.rsplit_once('.').unwrap_or((body, ""));
            let keep = (MAX_ISO_FILE_ID - 1 - ext.len())
                .saturating_sub(suffix.len())
                .min(stem.len());
            format!("{}{}.{};1", &stem[..keep], suffix, ext).into_bytes()
        }
        Flavor::Joliet => {
            let mut units: Vec<u16> = id
                .chunks(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            let limit = if is_dir {
                MAX_JOLIET_CHARS
            } else {
                units.truncate(units.len().saturating_sub(2));
                MAX_JOLIET_CHARS - 2
            };
            let suffix: Vec<u16> = format!("~{}", serial).encode_utf16().collect();
            units.truncate(limit.saturating_sub(suffix.len()));
            units.extend(suffix);
            if !is_dir {
                units.extend(";1".encode_utf16());
            }
            units.iter().flat_map(|u| u.to_be_bytes()).collect()
        }
    }
}

fn ucs2(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
}

fn volume_identifier(label: &str) -> String {
    label.chars().map(d_char).take(32).collect()
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

fn both16(v: u16) -> [u8; 4] {
    let le = v.to_le_bytes();
    let be = v.to_be_bytes();
    [le[0], le[1], be[0], be[1]]
}

fn both32(v: u32) -> [u8; 8] {
    let le = v.to_le_bytes();
    let be = v.to_be_bytes();
    [le[0], le[1], le[2], le[3], be[0], be[1], be[2], be[3]]
}

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Fill a fixed-width text field, padding with spaces (UCS-2 spaces for Joliet).
fn put_text(buf: &mut [u8], offset: usize, width: usize, text: &str, joliet: bool) {
    let field = &mut buf[offset..offset + width];
    if joliet {
        for pair in field.chunks_mut(2) {
            pair[0] = 0x00;
            if pair.len() > 1 {
                pair[1] = b' ';
            }
        }
        let encoded = ucs2(text);
        let len = encoded.len().min(width - width % 2);
        field[..len].copy_from_slice(&encoded[..len]);
    } else {
        field.fill(b' ');
        let bytes = text.as_bytes();
        let len = bytes.len().min(width);
        field[..len].copy_from_slice(&bytes[..len]);
    }
}

fn datetime(timestamp: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_default()
}

/// 7-byte directory record timestamp.
fn record_time(timestamp: i64) -> [u8; 7] {
    let dt = datetime(timestamp);
    let years = (dt.year() - 1900).clamp(0, 255) as u8;
    [
        years,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
        0,
    ]
}

/// 17-byte volume descriptor timestamp.
fn volume_time(timestamp: i64) -> [u8; 17] {
    let dt = datetime(timestamp);
    let mut out = [b'0'; 17];
    out[16] = 0;
    if (1..=9999).contains(&dt.year()) {
        let text = dt.format("%Y%m%d%H%M%S00").to_string();
        out[..16].copy_from_slice(&text.as_bytes()[..16]);
    }
    out
}

fn unset_volume_time() -> [u8; 17] {
    let mut out = [b'0'; 17];
    out[16] = 0;
    out
}

// ---------------------------------------------------------------------------
// Rock Ridge system use entries
// ---------------------------------------------------------------------------

fn susp_sp() -> Vec<u8> {
    vec![b'S', b'P', 7, 1, 0xBE, 0xEF, 0]
}

fn susp_px(mode: u32, links: u32) -> Vec<u8> {
    let mut out = vec![b'P', b'X', 36, 1];
    out.extend_from_slice(&both32(mode));
    out.extend_from_slice(&both32(links));
    out.extend_from_slice(&both32(0));
    out.extend_from_slice(&both32(0));
    out
}

fn susp_nm(name: &str) -> Vec<u8> {
    let bytes = name.as_bytes();
    let mut out = vec![b'N', b'M', (5 + bytes.len()).min(255) as u8, 1, 0];
    out.extend_from_slice(&bytes[..bytes.len().min(250)]);
    out
}

fn susp_ce(block: u32, length: u32) -> Vec<u8> {
    let mut out = vec![b'C', b'E', 28, 1];
    out.extend_from_slice(&both32(block));
    out.extend_from_slice(&both32(0));
    out.extend_from_slice(&both32(length));
    out
}

fn susp_er() -> Vec<u8> {
    let len = 8 + RRIP_ID.len() + RRIP_DESCRIPTOR.len() + RRIP_SOURCE.len();
    let mut out = vec![
        b'E',
        b'R',
        len as u8,
        1,
        RRIP_ID.len() as u8,
        RRIP_DESCRIPTOR.len() as u8,
        RRIP_SOURCE.len() as u8,
        1,
    ];
    out.extend_from_slice(RRIP_ID.as_bytes());
    out.extend_from_slice(RRIP_DESCRIPTOR.as_bytes());
    out.extend_from_slice(RRIP_SOURCE.as_bytes());
    out
}

fn pad_even(mut su: Vec<u8>) -> Vec<u8> {
    if su.len() % 2 == 1 {
        su.push(0);
    }
    su
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Primary,
    Joliet,
}

/// One record of a directory extent, before extents are known.
#[derive(Debug, Clone)]
enum RecordSpec {
    Dot,
    DotDot,
    Child { id: Vec<u8>, child: usize },
}

#[derive(Debug, Clone)]
struct TreeLayout {
    flavor: Flavor,
    rock_ridge: bool,
    /// Per directory: records in on-disk order.
    records: Vec<Vec<RecordSpec>>,
    /// Per directory: identifier inside its parent.
    dir_ids: Vec<Vec<u8>>,
    /// Directories in path table order.
    order: Vec<usize>,
    /// Path table number per directory.
    number: Vec<u16>,
    sizes: Vec<u32>,
    extents: Vec<u32>,
    path_table_size: u32,
    path_table_l: u32,
    path_table_m: u32,
}

impl TreeLayout {
    fn build(dirs: &[DirInfo], flavor: Flavor, rock_ridge: bool) -> Result<Self, ImageError> {
        let mut records = Vec::with_capacity(dirs.len());
        let mut dir_ids = vec![vec![0u8]; dirs.len()];

        for dir in dirs {
            let mut ids: Vec<(Vec<u8>, usize)> = Vec::with_capacity(dir.children.len());
            for (index, child) in dir.children.iter().enumerate() {
                let is_dir = matches!(child.target, Target::Dir(_));
                let base = match flavor {
                    Flavor::Primary => iso_identifier(&child.name, is_dir).into_bytes(),
                    Flavor::Joliet => joliet_identifier(&child.name, is_dir),
                };
                let mut id = base.clone();
                let mut serial = 1;
                while ids.iter().any(|(existing, _)| *existing == id) {
                    id = serial_identifier(&base, flavor, is_dir, serial);
                    serial += 1;
                }
                if serial > 1 {
                    log::debug!("[Image] '{}' renamed to avoid an identifier clash", child.name);
                }
                if let Target::Dir(sub) = child.target {
                    dir_ids[sub] = id.clone();
                }
                ids.push((id, index));
            }
            ids.sort();

            let mut list = vec![RecordSpec::Dot, RecordSpec::DotDot];
            list.extend(ids.into_iter().map(|(id, child)| RecordSpec::Child { id, child }));
            records.push(list);
        }

        let mut order = vec![0usize];
        let mut cursor = 0;
        while cursor < order.len() {
            let dir = order[cursor];
            for record in &records[dir] {
                if let RecordSpec::Child { child, .. } = record {
                    if let Target::Dir(sub) = dirs[dir].children[*child].target {
                        order.push(sub);
                    }
                }
            }
            cursor += 1;
        }

        let mut number = vec![0u16; dirs.len()];
        for (position, dir) in order.iter().enumerate() {
            number[*dir] = u16::try_from(position + 1)
                .map_err(|_| ImageError::EntryTooLarge("directory count".to_string()))?;
        }

        let mut layout = TreeLayout {
            flavor,
            rock_ridge: rock_ridge && flavor == Flavor::Primary,
            records,
            dir_ids,
            order,
            number,
            sizes: vec![0; dirs.len()],
            extents: vec![0; dirs.len()],
            path_table_size: 0,
            path_table_l: 0,
            path_table_m: 0,
        };

        for dir in 0..dirs.len() {
            let mut used = 0usize;
            let mut sectors = 1u32;
            for record in &layout.records[dir] {
                let len = layout.record_len(dirs, dir, record)?;
                if used + len > SECTOR_SIZE {
                    sectors += 1;
                    used = 0;
                }
                used += len;
            }
            layout.sizes[dir] = sectors * SECTOR_SIZE as u32;
        }

        layout.path_table_size = layout
            .order
            .iter()
            .map(|d| {
                let id_len = layout.dir_ids[*d].len() as u32;
                8 + id_len + (id_len % 2)
            })
            .sum();

        Ok(layout)
    }

    fn path_table_sectors(&self) -> u32 {
        sectors_for(u64::from(self.path_table_size)) as u32
    }

    fn record_id<'a>(&self, record: &'a RecordSpec) -> &'a [u8] {
        match record {
            RecordSpec::Dot => &[0],
            RecordSpec::DotDot => &[1],
            RecordSpec::Child { id, .. } => id,
        }
    }

    fn system_use(
        &self,
        dirs: &[DirInfo],
        dir: usize,
        record: &RecordSpec,
        continuation: u32,
    ) -> Vec<u8> {
        if !self.rock_ridge {
            return Vec::new();
        }
        match record {
            RecordSpec::Dot if dir == 0 => {
                let mut su = susp_sp();
                su.extend(susp_px(DIR_MODE, 2));
                su.extend(susp_ce(continuation, susp_er().len() as u32));
                pad_even(su)
            }
            RecordSpec::Dot | RecordSpec::DotDot => susp_px(DIR_MODE, 2),
            RecordSpec::Child { child, .. } => {
                let child = &dirs[dir].children[*child];
                let mode = match child.target {
                    Target::Dir(_) => DIR_MODE,
                    _ => FILE_MODE,
                };
                let links = if mode == DIR_MODE { 2 } else { 1 };
                let mut su = susp_px(mode, links);
                su.extend(susp_nm(&child.name));
                pad_even(su)
            }
        }
    }

    fn record_len(
        &self,
        dirs: &[DirInfo],
        dir: usize,
        record: &RecordSpec,
    ) -> Result<usize, ImageError> {
        let id_len = self.record_id(record).len();
        let len = 33 + id_len + (1 - id_len % 2) + self.system_use(dirs, dir, record, 0).len();
        if len > MAX_RECORD_LEN {
            let name = match record {
                RecordSpec::Child { child, .. } => dirs[dir].children[*child].name.clone(),
                _ => String::from("."),
            };
            return Err(ImageError::InvalidEntryPath(name));
        }
        Ok(len)
    }
}

struct VolumeLayout {
    primary: TreeLayout,
    joliet: Option<TreeLayout>,
    boot_record_sector: Option<u32>,
    joliet_descriptor_sector: Option<u32>,
    terminator_sector: u32,
    continuation_sector: Option<u32>,
    catalog_sector: Option<u32>,
    first_data_sector: u32,
    file_extents: Vec<u32>,
    total_sectors: u32,
}

fn checked_sector(value: u64) -> Result<u32, ImageError> {
    u32::try_from(value).map_err(|_| ImageError::EntryTooLarge("volume".to_string()))
}

impl VolumeLayout {
    fn compute(
        dirs: &[DirInfo],
        files: &[StagedFile],
        options: &IsoOptions,
        boot: bool,
    ) -> Result<Self, ImageError> {
        let mut primary = TreeLayout::build(dirs, Flavor::Primary, options.rock_ridge)?;
        let mut joliet = if options.joliet {
            Some(TreeLayout::build(dirs, Flavor::Joliet, false)?)
        } else {
            None
        };

        let mut next = SYSTEM_AREA_SECTORS + 1;
        let boot_record_sector = boot.then(|| {
            next += 1;
            next - 1
        });
        let joliet_descriptor_sector = joliet.as_ref().map(|_| {
            next += 1;
            next - 1
        });
        let terminator_sector = next;
        next += 1;

        for tree in std::iter::once(&mut primary).chain(joliet.as_mut()) {
            tree.path_table_l = next;
            next += tree.path_table_sectors();
            tree.path_table_m = next;
            next += tree.path_table_sectors();
        }

        for tree in std::iter::once(&mut primary).chain(joliet.as_mut()) {
            for position in 0..tree.order.len() {
                let dir = tree.order[position];
                tree.extents[dir] = next;
                next += tree.sizes[dir] / SECTOR_SIZE as u32;
            }
        }

        let continuation_sector = options.rock_ridge.then(|| {
            next += 1;
            next - 1
        });
        let catalog_sector = boot.then(|| {
            next += 1;
            next - 1
        });

        let first_data_sector = next;
        let mut cursor = u64::from(next);
        let mut file_extents = Vec::with_capacity(files.len());
        for file in files {
            if file.size == 0 {
                file_extents.push(0);
            } else {
                file_extents.push(checked_sector(cursor)?);
                cursor += sectors_for(file.size);
            }
        }
        if options.pad {
            cursor += u64::from(PAD_SECTORS);
        }

        Ok(VolumeLayout {
            primary,
            joliet,
            boot_record_sector,
            joliet_descriptor_sector,
            terminator_sector,
            continuation_sector,
            catalog_sector,
            first_data_sector,
            file_extents,
            total_sectors: checked_sector(cursor)?,
        })
    }

    /// Extent and size for a directory child.
    fn child_extent(&self, tree: &TreeLayout, files: &[StagedFile], target: Target) -> (u32, u32, u8) {
        match target {
            Target::Dir(sub) => (tree.extents[sub], tree.sizes[sub], FLAG_DIRECTORY),
            Target::File(index) => (self.file_extents[index], files[index].size as u32, 0),
            Target::Catalog => (self.catalog_sector.unwrap_or(0), SECTOR_SIZE as u32, 0),
        }
    }

    /// Render every sector before the file data.
    fn render(
        &self,
        dirs: &[DirInfo],
        files: &[StagedFile],
        options: &IsoOptions,
        boot: Option<&(BootOptions, usize)>,
    ) -> Result<Vec<u8>, ImageError> {
        let mut buf = vec![0u8; self.first_data_sector as usize * SECTOR_SIZE];
        let stamp = record_time(options.timestamp);

        self.render_descriptor(&mut buf, 16, &self.primary, options);
        if let (Some(sector), Some(tree)) = (self.joliet_descriptor_sector, self.joliet.as_ref()) {
            self.render_descriptor(&mut buf, sector, tree, options);
        }

        let term = self.terminator_sector as usize * SECTOR_SIZE;
        buf[term] = 255;
        put(&mut buf, term + 1, b"CD001");
        buf[term + 6] = 1;

        for tree in std::iter::once(&self.primary).chain(self.joliet.as_ref()) {
            self.render_path_tables(&mut buf, tree, dirs);
            for dir in 0..dirs.len() {
                self.render_directory(&mut buf, tree, dirs, files, dir, &stamp)?;
            }
        }

        if let Some(sector) = self.continuation_sector {
            put(&mut buf, sector as usize * SECTOR_SIZE, &susp_er());
        }

        if let (Some((boot, file)), Some(catalog), Some(record)) =
            (boot, self.catalog_sector, self.boot_record_sector)
        {
            let offset = record as usize * SECTOR_SIZE;
            buf[offset] = 0;
            put(&mut buf, offset + 1, b"CD001");
            buf[offset + 6] = 1;
            put(&mut buf, offset + 7, b"EL TORITO SPECIFICATION");
            put(&mut buf, offset + 71, &catalog.to_le_bytes());

            let catalog_offset = catalog as usize * SECTOR_SIZE;
            put(&mut buf, catalog_offset, &validation_entry());
            put(
                &mut buf,
                catalog_offset + 32,
                &default_entry(boot, self.file_extents[*file]),
            );
        }

        Ok(buf)
    }

    fn render_descriptor(&self, buf: &mut [u8], sector: u32, tree: &TreeLayout, options: &IsoOptions) {
        let joliet = tree.flavor == Flavor::Joliet;
        let d = sector as usize * SECTOR_SIZE;
        buf[d] = if joliet { 2 } else { 1 };
        put(buf, d + 1, b"CD001");
        buf[d + 6] = 1;

        let label = volume_identifier(&options.volume_label);
        put_text(buf, d + 8, 32, "", joliet);
        if joliet {
            let short: String = options.volume_label.chars().take(16).collect();
            put_text(buf, d + 40, 32, &short, true);
            put(buf, d + 88, &[0x25, 0x2F, 0x45]);
        } else {
            put_text(buf, d + 40, 32, &label, false);
        }

        put(buf, d + 80, &both32(self.total_sectors));
        put(buf, d + 120, &both16(1));
        put(buf, d + 124, &both16(1));
        put(buf, d + 128, &both16(SECTOR_SIZE as u16));
        put(buf, d + 132, &both32(tree.path_table_size));
        put(buf, d + 140, &tree.path_table_l.to_le_bytes());
        put(buf, d + 148, &tree.path_table_m.to_be_bytes());

        let mut root = Vec::with_capacity(34);
        push_record(
            &mut root,
            tree.extents[0],
            tree.sizes[0],
            FLAG_DIRECTORY,
            &[0],
            &[],
            &record_time(options.timestamp),
        );
        put(buf, d + 156, &root);

        put_text(buf, d + 190, 128, "", joliet);
        put_text(buf, d + 318, 128, "", joliet);
        put_text(buf, d + 446, 128, "", joliet);
        put_text(buf, d + 574, 128, APPLICATION_ID, joliet);
        put_text(buf, d + 702, 37, "", joliet);
        put_text(buf, d + 739, 37, "", joliet);
        put_text(buf, d + 776, 37, "", joliet);

        let created = volume_time(options.timestamp);
        put(buf, d + 813, &created);
        put(buf, d + 830, &created);
        put(buf, d + 847, &unset_volume_time());
        put(buf, d + 864, &created);
        buf[d + 881] = 1;
    }

    fn render_path_tables(&self, buf: &mut [u8], tree: &TreeLayout, dirs: &[DirInfo]) {
        let mut little = Vec::with_capacity(tree.path_table_size as usize);
        let mut big = Vec::with_capacity(tree.path_table_size as usize);

        for dir in &tree.order {
            let id = &tree.dir_ids[*dir];
            let parent = tree.number[dirs[*dir].parent];
            let extent = tree.extents[*dir];

            for (table, le) in [(&mut little, true), (&mut big, false)] {
                table.push(id.len() as u8);
                table.push(0);
                if le {
                    table.extend_from_slice(&extent.to_le_bytes());
                    table.extend_from_slice(&parent.to_le_bytes());
                } else {
                    table.extend_from_slice(&extent.to_be_bytes());
                    table.extend_from_slice(&parent.to_be_bytes());
                }
                table.extend_from_slice(id);
                if id.len() % 2 == 1 {
                    table.push(0);
                }
            }
        }

        put(buf, tree.path_table_l as usize * SECTOR_SIZE, &little);
        put(buf, tree.path_table_m as usize * SECTOR_SIZE, &big);
    }

    fn render_directory(
        &self,
        buf: &mut [u8],
        tree: &TreeLayout,
        dirs: &[DirInfo],
        files: &[StagedFile],
        dir: usize,
        stamp: &[u8; 7],
    ) -> Result<(), ImageError> {
        let start = tree.extents[dir] as usize * SECTOR_SIZE;
        let mut extent = Vec::with_capacity(tree.sizes[dir] as usize);
        let continuation = self.continuation_sector.unwrap_or(0);

        for record in &tree.records[dir] {
            let (target_extent, size, flags) = match record {
                RecordSpec::Dot => (tree.extents[dir], tree.sizes[dir], FLAG_DIRECTORY),
                RecordSpec::DotDot => {
                    let parent = dirs[dir].parent;
                    (tree.extents[parent], tree.sizes[parent], FLAG_DIRECTORY)
                }
                RecordSpec::Child { child, .. } => {
                    self.child_extent(tree, files, dirs[dir].children[*child].target)
                }
            };

            let su = tree.system_use(dirs, dir, record, continuation);
            let len = tree.record_len(dirs, dir, record)?;
            let used = extent.len() % SECTOR_SIZE;
            if used + len > SECTOR_SIZE {
                extent.resize(extent.len() + SECTOR_SIZE - used, 0);
            }
            push_record(&mut extent, target_extent, size, flags, tree.record_id(record), &su, stamp);
        }

        put(buf, start, &extent);
        Ok(())
    }
}

fn push_record(
    out: &mut Vec<u8>,
    extent: u32,
    size: u32,
    flags: u8,
    id: &[u8],
    su: &[u8],
    stamp: &[u8; 7],
) {
    let pad = 1 - id.len() % 2;
    let len = 33 + id.len() + pad + su.len();
    out.push(len as u8);
    out.push(0);
    out.extend_from_slice(&both32(extent));
    out.extend_from_slice(&both32(size));
    out.extend_from_slice(stamp);
    out.push(flags);
    out.push(0);
    out.push(0);
    out.extend_from_slice(&both16(1));
    out.push(id.len() as u8);
    out.extend_from_slice(id);
    if pad == 1 {
        out.push(0);
    }
    out.extend_from_slice(su);
}

/// El Torito validation entry: x86 platform, checksummed, 0x55AA key.
fn validation_entry() -> [u8; 32] {
    let mut entry = [0u8; 32];
    entry[0] = 1;
    entry[1] = 0;
    put(&mut entry, 4, APPLICATION_ID.as_bytes());
    entry[30] = 0x55;
    entry[31] = 0xAA;

    let sum = entry
        .chunks(2)
        .fold(0u16, |acc, w| acc.wrapping_add(u16::from_le_bytes([w[0], w[1]])));
    let checksum = 0u16.wrapping_sub(sum);
    put(&mut entry, 28, &checksum.to_le_bytes());
    entry
}

/// El Torito default entry: bootable, no emulation.
fn default_entry(boot: &BootOptions, load_rba: u32) -> [u8; 32] {
    let mut entry = [0u8; 32];
    entry[0] = 0x88;
    entry[1] = 0;
    put(&mut entry, 2, &boot.load_segment.to_le_bytes());
    entry[4] = 0;
    put(&mut entry, 6, &boot.load_size.to_le_bytes());
    put(&mut entry, 8, &load_rba.to_le_bytes());
    entry
}

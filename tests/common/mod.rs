//! Shared helpers for integration tests: a scripted tool runner and a small
//! ISO 9660 reader used to verify produced images.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use spark_bootstrap::error::ProcessError;
use spark_bootstrap::system::{CommandRunner, Invocation, ProcessOutput};

pub const SECTOR: usize = 2048;

/// Simulates git, cmake and ninja.
///
/// - `git clone`: creates the target directory with a `CMakeLists.txt`
/// - `git pull` / `git submodule`: returns `update_code`
/// - `cmake`: writes `CMakeCache.txt` into the build dir
/// - `ninja`: writes the configured outputs for the project into the build dir
///
/// Projects are identified by the final component of the build/target dir.
#[derive(Default)]
pub struct ScriptedRunner {
    pub calls: RefCell<Vec<Invocation>>,
    pub clone_code: i32,
    pub update_code: i32,
    pub configure_codes: HashMap<String, i32>,
    pub build_codes: HashMap<String, i32>,
    pub outputs: HashMap<String, Vec<(String, Vec<u8>)>>,
    /// Programs `locate` reports as not installed.
    pub missing_tools: Vec<String>,
}

impl ScriptedRunner {
    /// Runner whose builds produce the stock Spark OS artifacts.
    pub fn spark() -> Self {
        ScriptedRunner::default()
            .with_output("SparkBoot", "BOOTX64.EFI", b"MZ-spark-boot-loader".to_vec())
            .with_output("SparkKernel", "kernel.bin", vec![0x7f; 5000])
    }

    pub fn with_output(mut self, project: &str, file: &str, data: Vec<u8>) -> Self {
        self.outputs
            .entry(project.to_string())
            .or_default()
            .push((file.to_string(), data));
        self
    }

    pub fn failing_build(mut self, project: &str, code: i32) -> Self {
        self.build_codes.insert(project.to_string(), code);
        self
    }

    pub fn failing_configure(mut self, project: &str, code: i32) -> Self {
        self.configure_codes.insert(project.to_string(), code);
        self
    }

    pub fn without_tool(mut self, program: &str) -> Self {
        self.missing_tools.push(program.to_string());
        self
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.program.clone()).collect()
    }

    pub fn count(&self, program: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.program == program).count()
    }
}

fn project_of(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        self.calls.borrow_mut().push(invocation.clone());
        let code = match invocation.program.as_str() {
            "git" => match invocation.args.first().map(String::as_str) {
                Some("clone") => {
                    if self.clone_code == 0 {
                        let target = PathBuf::from(invocation.args.last().unwrap());
                        std::fs::create_dir_all(&target).unwrap();
                        std::fs::write(target.join("CMakeLists.txt"), "project(spark)").unwrap();
                    }
                    self.clone_code
                }
                _ => self.update_code,
            },
            "cmake" => {
                assert!(invocation.cwd.is_dir(), "build dir must exist before configure");
                std::fs::write(invocation.cwd.join("CMakeCache.txt"), "").unwrap();
                *self
                    .configure_codes
                    .get(&project_of(&invocation.cwd))
                    .unwrap_or(&0)
            }
            "ninja" => {
                let project = project_of(&invocation.cwd);
                let code = *self.build_codes.get(&project).unwrap_or(&0);
                if code == 0 {
                    for (file, data) in self.outputs.get(&project).into_iter().flatten() {
                        std::fs::write(invocation.cwd.join(file), data).unwrap();
                    }
                }
                code
            }
            other => panic!("unexpected program {}", other),
        };
        Ok(ProcessOutput {
            code,
            ..ProcessOutput::default()
        })
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        if self.missing_tools.iter().any(|m| m == program) {
            return None;
        }
        Some(PathBuf::from("/usr/bin").join(program))
    }
}

/// Create `<root>/<name>/CMakeLists.txt`.
pub fn local_project(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("CMakeLists.txt"), "project(local)").unwrap();
    dir
}

/// One file found while walking a directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoFile {
    pub path: String,
    pub extent: u32,
    pub size: u32,
}

/// Minimal read-only view of an ISO image.
pub struct IsoImage {
    pub bytes: Vec<u8>,
}

fn le32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

impl IsoImage {
    pub fn open(path: &Path) -> Self {
        IsoImage {
            bytes: std::fs::read(path).unwrap(),
        }
    }

    pub fn sector(&self, n: u32) -> &[u8] {
        let start = n as usize * SECTOR;
        &self.bytes[start..start + SECTOR]
    }

    /// `(type, sector)` for every volume descriptor up to the terminator.
    pub fn descriptors(&self) -> Vec<(u8, u32)> {
        let mut found = Vec::new();
        let mut sector = 16;
        loop {
            let d = self.sector(sector);
            assert_eq!(&d[1..6], b"CD001", "descriptor {} lacks CD001", sector);
            found.push((d[0], sector));
            if d[0] == 255 {
                return found;
            }
            sector += 1;
        }
    }

    fn descriptor(&self, kind: u8) -> &[u8] {
        let (_, sector) = self
            .descriptors()
            .into_iter()
            .find(|(t, _)| *t == kind)
            .unwrap_or_else(|| panic!("no descriptor of type {}", kind));
        self.sector(sector)
    }

    pub fn volume_id(&self) -> String {
        String::from_utf8_lossy(&self.descriptor(1)[40..72])
            .trim_end()
            .to_string()
    }

    pub fn volume_sectors(&self) -> u32 {
        le32(&self.descriptor(1)[80..84])
    }

    pub fn file_data(&self, file: &IsoFile) -> &[u8] {
        let start = file.extent as usize * SECTOR;
        &self.bytes[start..start + file.size as usize]
    }

    /// Files of the Joliet tree.
    pub fn joliet_files(&self) -> Vec<IsoFile> {
        let root = &self.descriptor(2)[156..190];
        let mut out = Vec::new();
        self.walk(le32(&root[2..]), le32(&root[10..]), "", &mut out, &|id, _| {
            let units: Vec<u16> = id
                .chunks(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            let name = String::from_utf16_lossy(&units);
            name.trim_end_matches(";1").to_string()
        });
        out
    }

    /// Files of the primary tree, named by Rock Ridge `NM` entries.
    pub fn rock_ridge_files(&self) -> Vec<IsoFile> {
        let root = &self.descriptor(1)[156..190];
        let mut out = Vec::new();
        self.walk(le32(&root[2..]), le32(&root[10..]), "", &mut out, &|id, su| {
            nm_name(su).unwrap_or_else(|| String::from_utf8_lossy(id).to_string())
        });
        out
    }

    /// Files of the primary tree by raw ISO identifier.
    pub fn primary_identifiers(&self) -> Vec<IsoFile> {
        let root = &self.descriptor(1)[156..190];
        let mut out = Vec::new();
        self.walk(le32(&root[2..]), le32(&root[10..]), "", &mut out, &|id, _| {
            String::from_utf8_lossy(id).to_string()
        });
        out
    }

    fn walk(
        &self,
        extent: u32,
        size: u32,
        prefix: &str,
        out: &mut Vec<IsoFile>,
        name_of: &dyn Fn(&[u8], &[u8]) -> String,
    ) {
        let data = &self.bytes[extent as usize * SECTOR..(extent + size / SECTOR as u32) as usize * SECTOR];
        let mut pos = 0;
        while pos < data.len() {
            let len = data[pos] as usize;
            if len == 0 {
                pos = (pos / SECTOR + 1) * SECTOR;
                continue;
            }
            let record = &data[pos..pos + len];
            assert_eq!(pos / SECTOR, (pos + len - 1) / SECTOR, "record crosses a sector boundary");
            pos += len;

            let id_len = record[32] as usize;
            let id = &record[33..33 + id_len];
            if id == [0] || id == [1] {
                continue;
            }
            let su_start = 33 + id_len + (1 - id_len % 2);
            let name = name_of(id, &record[su_start..]);
            let path = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };

            let child_extent = le32(&record[2..]);
            let child_size = le32(&record[10..]);
            if record[25] & 0x02 != 0 {
                self.walk(child_extent, child_size, &path, out, name_of);
            } else {
                out.push(IsoFile {
                    path,
                    extent: child_extent,
                    size: child_size,
                });
            }
        }
    }

    /// Sector of the El Torito boot catalog, if a boot record exists.
    pub fn boot_catalog_sector(&self) -> Option<u32> {
        self.descriptors()
            .into_iter()
            .find(|(t, _)| *t == 0)
            .map(|(_, s)| {
                let d = self.sector(s);
                assert_eq!(&d[7..30], b"EL TORITO SPECIFICATION");
                le32(&d[71..75])
            })
    }
}

fn nm_name(su: &[u8]) -> Option<String> {
    let mut pos = 0;
    while pos + 4 <= su.len() {
        let len = su[pos + 2] as usize;
        if len < 4 {
            return None;
        }
        if &su[pos..pos + 2] == b"NM" {
            return Some(String::from_utf8_lossy(&su[pos + 5..pos + len]).to_string());
        }
        pos += len;
    }
    None
}

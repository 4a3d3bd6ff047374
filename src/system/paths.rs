//! Path helpers: executable lookup and absolute path resolution.

use std::path::{Component, Path, PathBuf};

/// Find `program` the way the OS would when spawning it.
///
/// Names containing a separator are checked as given; bare names are
/// searched on `PATH`.
pub fn find_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

/// Make `path` absolute against `base` without touching the filesystem.
///
/// External tools get absolute paths so their meaning does not depend on
/// the directory they are started in.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    joined
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_find_existing_tool() {
        // sh should exist on any Unix system
        assert!(find_executable("sh").is_some());
    }

    #[test]
    fn test_find_nonexistent_tool() {
        assert!(find_executable("definitely_not_a_real_command_12345").is_none());
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize(Path::new("/work"), Path::new("out/x86_64-Debug")),
            PathBuf::from("/work/out/x86_64-Debug")
        );
        assert_eq!(
            absolutize(Path::new("/work"), Path::new("/abs")),
            PathBuf::from("/abs")
        );
        assert_eq!(
            absolutize(Path::new("/work"), Path::new(".")).join("SparkBoot"),
            PathBuf::from("/work/SparkBoot")
        );
    }
}

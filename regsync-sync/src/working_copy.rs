//! Filesystem operations on working-copy entries.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use filetime::FileTime;

use crate::error::{io_err, MessageCode, SyncError};
use crate::location::refined_path_to_print;
use crate::meta_store::META_DIR;

pub const MINE_SUFFIX: &str = ".mine";
pub const SERVER_SUFFIX: &str = ".server";

/// What currently sits at a working-copy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Missing,
    File,
    Directory,
}

impl EntryKind {
    /// An existing entry whose type contradicts the registry node.
    pub fn contradicts(self, is_collection: bool) -> bool {
        match self {
            Self::Missing => false,
            Self::File => is_collection,
            Self::Directory => !is_collection,
        }
    }
}

pub fn probe(path: &Path) -> Result<EntryKind, SyncError> {
    match fs::metadata(path) {
        Ok(md) if md.is_dir() => Ok(EntryKind::Directory),
        Ok(_) => Ok(EntryKind::File),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EntryKind::Missing),
        Err(e) => Err(io_err(MessageCode::FileReadFailed, path, e)),
    }
}

/// Reject child names that would escape their parent directory or land on
/// the meta directory.
pub fn checked_child_name(name: Option<&str>, parent: &str) -> Result<String, SyncError> {
    match name {
        Some(name)
            if !name.is_empty()
                && name != "."
                && name != ".."
                && name != META_DIR
                && !name.contains('/')
                && !name.contains('\\') =>
        {
            Ok(name.to_owned())
        }
        Some(name) => Err(SyncError::new(MessageCode::MalformedDump)
            .with("registry path", parent)
            .with("name", name)),
        None => Err(SyncError::new(MessageCode::MalformedDump).with("registry path", parent)),
    }
}

/// Create `dir` (and missing parents). An existing directory is fine.
pub fn create_dir(dir: &Path) -> Result<(), SyncError> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(_) if dir.is_dir() => Ok(()),
        Err(e) => Err(io_err(MessageCode::FileCreationFailed, dir, e)),
    }
}

/// Replace the contents of `path` with `bytes`.
///
/// A failure to flush to stable storage after a successful write is logged
/// only.
pub fn write_content(path: &Path, bytes: &[u8]) -> Result<(), SyncError> {
    let mut file =
        fs::File::create(path).map_err(|e| io_err(MessageCode::FileCreationFailed, path, e))?;
    file.write_all(bytes)
        .map_err(|e| io_err(MessageCode::ContentWriteFailed, path, e))?;
    if let Err(e) = file.sync_all() {
        tracing::error!("failed to flush {}: {e}", path.display());
    }
    tracing::debug!("wrote: {}", path.display());
    Ok(())
}

/// Stamp `path` with the server's modification time. Best effort.
pub fn apply_last_modified(path: &Path, last_modified: Option<i64>) {
    let Some(ms) = last_modified else {
        return;
    };
    let nanos = (ms.rem_euclid(1000) * 1_000_000) as u32;
    let stamp = FileTime::from_unix_time(ms.div_euclid(1000), nanos);
    if let Err(e) = filetime::set_file_mtime(path, stamp) {
        tracing::warn!("cannot set mtime of {}: {e}", path.display());
    }
}

/// `a.txt` → `a.txt<suffix>` in the same directory.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

pub fn rename(from: &Path, to: &Path) -> Result<(), SyncError> {
    fs::rename(from, to).map_err(|e| {
        io_err(MessageCode::RenameFailed, from, e).with("target", to.display())
    })
}

/// Sorted entry names of `dir`. An unreadable directory lists as empty.
pub fn listing(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("cannot list {}: {e}", dir.display());
            return Vec::new();
        }
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

/// Remove a file or a whole directory tree.
pub fn remove_entry(path: &Path, is_dir: bool) -> Result<(), SyncError> {
    let result = if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| io_err(MessageCode::DeleteFailed, path, e))
}

/// How a working-copy path is shown in notices.
pub fn display_path(path: &Path) -> String {
    refined_path_to_print(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn probe_reports_kinds() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("f");
        fs::write(&file, b"x").unwrap();
        assert_eq!(probe(tmp.path()).unwrap(), EntryKind::Directory);
        assert_eq!(probe(&file).unwrap(), EntryKind::File);
        assert_eq!(probe(&tmp.path().join("nope")).unwrap(), EntryKind::Missing);
        assert!(EntryKind::File.contradicts(true));
        assert!(EntryKind::Directory.contradicts(false));
        assert!(!EntryKind::Missing.contradicts(true));
    }

    #[test]
    fn unsafe_child_names_are_rejected() {
        for bad in ["", ".", "..", ".meta", "a/b", "a\\b"] {
            let err = checked_child_name(Some(bad), "/p").unwrap_err();
            assert_eq!(err.code(), MessageCode::MalformedDump, "name {bad:?}");
        }
        assert!(checked_child_name(None, "/p").is_err());
        assert_eq!(checked_child_name(Some("ok.txt"), "/p").unwrap(), "ok.txt");
    }

    #[test]
    fn suffix_keeps_the_directory() {
        assert_eq!(
            with_suffix(Path::new("/wc/a.txt"), MINE_SUFFIX),
            PathBuf::from("/wc/a.txt.mine")
        );
    }

    #[test]
    fn apply_last_modified_sets_mtime() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("f");
        fs::write(&file, b"x").unwrap();
        apply_last_modified(&file, Some(1_600_000_000_500));
        let md = fs::metadata(&file).unwrap();
        let mtime = FileTime::from_last_modification_time(&md);
        assert_eq!(mtime.unix_seconds(), 1_600_000_000);
    }

    #[test]
    fn listing_is_sorted_and_tolerates_missing_dirs() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b"), b"").unwrap();
        fs::write(tmp.path().join("a"), b"").unwrap();
        assert_eq!(listing(tmp.path()), vec!["a".to_owned(), "b".to_owned()]);
        assert!(listing(&tmp.path().join("missing")).is_empty());
    }
}

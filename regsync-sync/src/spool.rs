//! Transient on-disk copy of a dump.
//!
//! A dump is streamed to a named temp file first and walked from there, so
//! the registry connection is not held open while the working copy is
//! being written.

use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use regsync_core::{DumpError, DumpReader, Registry, RegistryError};
use tempfile::NamedTempFile;

use crate::error::{MessageCode, SyncError};

pub struct DumpSpool {
    file: NamedTempFile,
}

impl DumpSpool {
    /// Create an empty spool in `dir`, or the OS temp dir.
    pub fn create(dir: Option<&Path>) -> Result<Self, SyncError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("regsync-dump-").suffix(".xml");
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| SyncError::new(MessageCode::TempSpoolIo).caused_by(e))?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Stream the dump of `path` from `registry` into the spool.
    ///
    /// Registry failures map to `ResourceMissingOrDenied` (or
    /// `RegistryUnreachable`); local write failures to `TempSpoolIo`.
    pub fn fill(&mut self, registry: &dyn Registry, path: &str) -> Result<(), SyncError> {
        let spool_path = self.file.path().to_path_buf();
        let mut out = BufWriter::new(self.file.as_file_mut());
        match registry.dump(path, &mut out) {
            Ok(()) => {}
            Err(RegistryError::Io(e)) | Err(RegistryError::Dump(DumpError::Io(e))) => {
                return Err(SyncError::new(MessageCode::TempSpoolIo)
                    .with_path(&spool_path)
                    .caused_by(e))
            }
            Err(e) => return Err(registry_failure(e, path)),
        }
        out.flush().map_err(|e| {
            SyncError::new(MessageCode::TempSpoolIo)
                .with_path(&spool_path)
                .caused_by(e)
        })
    }

    /// A fresh reader positioned at the start of the spooled dump.
    pub fn reader(&self) -> Result<DumpReader<BufReader<std::fs::File>>, SyncError> {
        let file = self.file.reopen().map_err(|e| {
            SyncError::new(MessageCode::TempSpoolRead)
                .with_path(self.file.path())
                .caused_by(e)
        })?;
        Ok(DumpReader::new(BufReader::new(file)))
    }

    /// Delete the spool file. The returned error is reported, not fatal.
    pub fn remove(self) -> Result<(), SyncError> {
        let path: PathBuf = self.file.path().to_path_buf();
        self.file.close().map_err(|e| {
            SyncError::new(MessageCode::CleanupFailed)
                .with_path(&path)
                .caused_by(e)
        })
    }
}

/// Spool the dump of `path`, hand a reader over it to `walk`, then delete
/// the spool whatever the outcome.
///
/// A cleanup failure does not fail the walk; it is logged and returned
/// alongside the result.
pub(crate) fn with_spooled_dump<T>(
    registry: &dyn Registry,
    path: &str,
    spool_dir: Option<&Path>,
    walk: impl FnOnce(&mut DumpReader<BufReader<std::fs::File>>) -> Result<T, SyncError>,
) -> Result<(T, Option<SyncError>), SyncError> {
    let mut spool = DumpSpool::create(spool_dir)?;
    let walked = spool.fill(registry, path).and_then(|_| {
        let mut reader = spool.reader()?;
        walk(&mut reader)
    });
    let cleanup = spool.remove().err();
    if let Some(err) = &cleanup {
        tracing::warn!("{err}");
    }
    walked.map(|value| (value, cleanup))
}

/// Map a registry failure on `path` to the user-facing code.
///
/// Missing resources and denied access stay indistinguishable.
pub(crate) fn registry_failure(err: RegistryError, path: &str) -> SyncError {
    let code = match &err {
        RegistryError::Unreachable { .. } => MessageCode::RegistryUnreachable,
        _ => MessageCode::ResourceMissingOrDenied,
    };
    SyncError::new(code).with("registry path", path).caused_by(err)
}

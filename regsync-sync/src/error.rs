//! Error and message types for regsync-sync.
//!
//! Every failure is a [`SyncError`]: a [`MessageCode`] naming what went
//! wrong, ordered context pairs naming where, and an optional typed cause.
//! The same codes double as the notices and prompts a
//! [`UserInputCallback`](crate::callback::UserInputCallback) receives.

use std::fmt;
use std::path::Path;

use thiserror::Error;

use regsync_core::{DumpError, RegistryError};

/// Everything the engines can report, fail with, or ask about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    // Failures.
    PathMissing,
    RegistryUnreachable,
    ResourceMissingOrDenied,
    DumpingNonCollection,
    DumpFailed,
    TempSpoolIo,
    TempSpoolRead,
    StreamRead,
    MalformedDump,
    FileCreationFailed,
    FileReadFailed,
    ContentWriteFailed,
    RenameFailed,
    MetaDirCreationFailed,
    MetaFileWriteFailed,
    MetaFileReadFailed,
    StaleDumpFormat,
    CollectionResourceSameName,
    CheckoutBeforeUpdate,
    DeleteFailed,
    NameDecodeFailed,
    CleanupFailed,

    // Notices.
    Added,
    Overwritten,
    NotOverwritten,
    Updated,
    Conflicted,
    Deleted,
    NotDeleted,

    // Prompts.
    FileOverwriteConfirmation,
    KeepDeletedFile,
    FileDeleteConfirmation,
    DirectoryDeleteConfirmation,
}

impl MessageCode {
    /// Short human description; context is appended by the caller.
    pub fn describe(self) -> &'static str {
        match self {
            Self::PathMissing => "no registry path given to check out",
            Self::RegistryUnreachable => "cannot connect to the registry",
            Self::ResourceMissingOrDenied => "resource does not exist or access is denied",
            Self::DumpingNonCollection => "only collections can be checked out",
            Self::DumpFailed => "failed to dump the resource",
            Self::TempSpoolIo => "failed to spool the dump to a temporary file",
            Self::TempSpoolRead => "failed to read the spooled dump",
            Self::StreamRead => "failed to read the dump stream",
            Self::MalformedDump => "the dump is malformed",
            Self::FileCreationFailed => "failed to create file",
            Self::FileReadFailed => "failed to read file",
            Self::ContentWriteFailed => "failed to write content",
            Self::RenameFailed => "failed to rename file",
            Self::MetaDirCreationFailed => "failed to create meta directory",
            Self::MetaFileWriteFailed => "failed to write meta file",
            Self::MetaFileReadFailed => "resource metadata is corrupted",
            Self::StaleDumpFormat => "the registry sent a dump without versions; upgrade the registry",
            Self::CollectionResourceSameName => {
                "a collection and a resource share the same name"
            }
            Self::CheckoutBeforeUpdate => "not a working copy; check out before updating",
            Self::DeleteFailed => "failed to delete",
            Self::NameDecodeFailed => "cannot decode file name",
            Self::CleanupFailed => "failed to clean up the temporary dump file",
            Self::Added => "added",
            Self::Overwritten => "overwritten",
            Self::NotOverwritten => "kept local copy",
            Self::Updated => "updated",
            Self::Conflicted => "conflicted",
            Self::Deleted => "deleted",
            Self::NotDeleted => "left in place",
            Self::FileOverwriteConfirmation => "file exists; overwrite with the registry copy?",
            Self::KeepDeletedFile => "file was deleted locally; keep it deleted?",
            Self::FileDeleteConfirmation => {
                "removed from the registry but modified locally; delete it?"
            }
            Self::DirectoryDeleteConfirmation => "collection removed from the registry; delete it?",
        }
    }

    pub fn is_prompt(self) -> bool {
        matches!(
            self,
            Self::FileOverwriteConfirmation
                | Self::KeepDeletedFile
                | Self::FileDeleteConfirmation
                | Self::DirectoryDeleteConfirmation
        )
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Concrete cause carried by a [`SyncError`].
#[derive(Debug, Error)]
pub enum Cause {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Dump(#[from] DumpError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// The single error type of the sync engines and commands.
#[derive(Debug, Error)]
#[error("{code}{}{}", render_context(.context), render_cause(.cause))]
pub struct SyncError {
    code: MessageCode,
    context: Vec<(&'static str, String)>,
    #[source]
    cause: Option<Cause>,
}

impl SyncError {
    pub fn new(code: MessageCode) -> Self {
        Self {
            code,
            context: Vec::new(),
            cause: None,
        }
    }

    /// Append a context pair.
    pub fn with(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.context.push((key, value.to_string()));
        self
    }

    pub fn with_path(self, path: &Path) -> Self {
        self.with("path", path.display())
    }

    pub fn caused_by(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn code(&self) -> MessageCode {
        self.code
    }

    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// First context value recorded under `key`.
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl From<DumpError> for SyncError {
    fn from(err: DumpError) -> Self {
        let code = match err {
            DumpError::MissingAttribute { .. }
            | DumpError::UnexpectedElement { .. }
            | DumpError::Content { .. }
            | DumpError::LastModified { .. } => MessageCode::MalformedDump,
            _ => MessageCode::StreamRead,
        };
        SyncError::new(code).caused_by(err)
    }
}

/// Convenience constructor for an I/O failure at `path`.
pub(crate) fn io_err(code: MessageCode, path: &Path, source: std::io::Error) -> SyncError {
    SyncError::new(code).with_path(path).caused_by(source)
}

fn render_context(context: &[(&'static str, String)]) -> String {
    context
        .iter()
        .map(|(k, v)| format!(" [{k}: {v}]"))
        .collect()
}

fn render_cause(cause: &Option<Cause>) -> String {
    cause
        .as_ref()
        .map(|c| format!(": {c}"))
        .unwrap_or_default()
}

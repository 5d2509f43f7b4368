//! Update: three-way merge of a fresh dump into an existing working copy.
//!
//! For each resource the engine compares three states: the bytes on disk,
//! the digest and version in the meta record, and the version in the dump.
//!
//! ```text
//! local edits  server changed  action
//! no           no              no-op (meta refreshed if it differs)
//! yes          no              keep local bytes, refresh meta
//! no           yes             overwrite with server bytes
//! yes          yes             conflict unless both sides hold the same bytes
//! ```
//!
//! A conflict moves the local file to `<name>.mine`, writes the server bytes
//! to `<name>.server` and marks the meta record `conflicting`. After the
//! children of a changed collection are processed, tracked entries the dump
//! no longer lists are deleted.

use std::collections::BTreeSet;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use regsync_core::types::{child_path, ROOT_PATH};
use regsync_core::{ChildrenBlock, DumpReader, Registry, SyncConfig};

use crate::callback::{confirm_or_default, ConfirmContext, Message, UserInputCallback};
use crate::error::{io_err, MessageCode, SyncError};
use crate::hasher;
use crate::location::RegistryLocation;
use crate::meta_store::{self, MetaRecord, META_DIR};
use crate::spool::{registry_failure, with_spooled_dump};
use crate::working_copy::{self, EntryKind, MINE_SUFFIX, SERVER_SUFFIX};

/// Behaviour switches for an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// No prompts, no notices, no deletions, no conflict artifacts.
    pub silent: bool,
    /// Resolve conflicts by taking the server bytes.
    pub ignore_conflicts: bool,
}

/// Counters reported by an update.
#[derive(Debug, Default)]
pub struct UpdateSummary {
    pub added: usize,
    pub updated: usize,
    pub conflicted: usize,
    pub deleted: usize,
    pub not_deleted: usize,
    /// The spool could not be deleted; the update itself succeeded.
    pub cleanup_error: Option<SyncError>,
}

impl UpdateSummary {
    /// Whether files were added, updated or deleted. Conflicts alone do not
    /// count; see [`UpdateSummary::conflicted`].
    pub fn any_change(&self) -> bool {
        self.added + self.updated + self.deleted > 0
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct UpdateEngine<'a> {
    options: UpdateOptions,
    registry_url: Option<&'a str>,
    callback: Option<&'a dyn UserInputCallback>,
    summary: UpdateSummary,
}

impl<'a> UpdateEngine<'a> {
    pub fn new(options: UpdateOptions, callback: Option<&'a dyn UserInputCallback>) -> Self {
        Self {
            options,
            registry_url: None,
            callback,
            summary: UpdateSummary::default(),
        }
    }

    pub fn with_registry_url(mut self, registry_url: Option<&'a str>) -> Self {
        self.registry_url = registry_url;
        self
    }

    /// Merge the dump under `reader` into `working_dir`, which maps to
    /// `registry_path`. The working directory itself is not counted.
    pub fn run<R: BufRead>(
        mut self,
        reader: &mut DumpReader<R>,
        working_dir: &Path,
        registry_path: &str,
    ) -> Result<UpdateSummary, SyncError> {
        self.visit(reader, working_dir, registry_path, true)?;
        Ok(self.summary)
    }

    fn visit<R: BufRead>(
        &mut self,
        reader: &mut DumpReader<R>,
        file_path: &Path,
        path: &str,
        is_root: bool,
    ) -> Result<(), SyncError> {
        let node = reader.read_node()?.ok_or_else(|| {
            SyncError::new(MessageCode::MalformedDump).with("registry path", path)
        })?;
        let meta_path = meta_store::meta_file_path(file_path, node.is_collection);
        let shown = working_copy::display_path(file_path);
        let mut record = MetaRecord::from_dump(&node, path, self.registry_url);
        let server_md5 = record.md5.clone();

        let kind = working_copy::probe(file_path)?;
        let is_updating = kind != EntryKind::Missing;
        let mut target = file_path.to_path_buf();
        let mut conflicting = false;
        let mut collection_unchanged = false;

        if is_updating {
            if kind.contradicts(node.is_collection) {
                return Err(SyncError::new(MessageCode::CollectionResourceSameName)
                    .with_path(file_path));
            }
            match meta_store::read_if_exists(&meta_path)? {
                Some(local) => {
                    let server_version = node.version.clone().ok_or_else(|| {
                        SyncError::new(MessageCode::StaleDumpFormat).with_path(file_path)
                    })?;
                    let local_version = match &local.version {
                        Some(v) => v.clone(),
                        None => {
                            meta_store::write(&meta_path, &record)?;
                            server_version.clone()
                        }
                    };
                    let server_changed = local_version != server_version;

                    if node.is_collection {
                        if !server_changed {
                            if local != record {
                                meta_store::write(&meta_path, &record)?;
                            }
                            collection_unchanged = true;
                        }
                    } else {
                        let current_md5 = hasher::file_digest(file_path)
                            .map_err(|e| io_err(MessageCode::FileReadFailed, file_path, e))?;
                        let locally_edited = local.md5.as_deref() != Some(current_md5.as_str());
                        if !server_changed {
                            if local != record {
                                meta_store::write(&meta_path, &record)?;
                            }
                            tracing::debug!(
                                "{}: {shown}",
                                if locally_edited { "local edits kept" } else { "unchanged" }
                            );
                            reader.close_node()?;
                            return Ok(());
                        }
                        if locally_edited && server_md5.as_deref() != Some(current_md5.as_str()) {
                            conflicting = true;
                        }
                    }
                }
                None => conflicting = !node.is_collection,
            }

            if conflicting {
                if self.options.ignore_conflicts {
                    tracing::info!("conflict on {shown}: taking the registry copy");
                } else if self.options.silent {
                    tracing::info!("conflict on {shown}: left untouched");
                    if !is_root {
                        self.summary.conflicted += 1;
                    }
                    reader.close_node()?;
                    return Ok(());
                } else {
                    let mine = working_copy::with_suffix(file_path, MINE_SUFFIX);
                    working_copy::rename(file_path, &mine)?;
                    target = working_copy::with_suffix(file_path, SERVER_SUFFIX);
                    record.conflicting = true;
                    record.md5 = None;
                    tracing::warn!("conflict on {shown}: local copy moved to {}", mine.display());
                }
            }
        } else {
            match meta_store::read_if_exists(&meta_path)? {
                // The file sits at <name>.mine until the user resolves it.
                Some(local) if local.conflicting && !node.is_collection => {
                    let server_changed = local.version != node.version;
                    if !server_changed || self.options.silent {
                        if server_changed && !is_root {
                            self.summary.conflicted += 1;
                        }
                        tracing::debug!("unresolved conflict on {shown}");
                        reader.close_node()?;
                        return Ok(());
                    }
                    conflicting = true;
                    if self.options.ignore_conflicts {
                        tracing::info!("conflict on {shown}: taking the registry copy");
                    } else {
                        target = working_copy::with_suffix(file_path, SERVER_SUFFIX);
                        record.conflicting = true;
                        record.md5 = None;
                        tracing::warn!("conflict on {shown}: refreshing {}", target.display());
                    }
                }
                Some(_) => {
                    let keep_deleted = self.options.silent
                        || confirm_or_default(
                            self.callback,
                            &Message::new(MessageCode::KeepDeletedFile, shown.as_str()),
                            ConfirmContext::Delete,
                        );
                    if keep_deleted {
                        tracing::debug!("keeping local deletion of {shown}");
                        reader.close_node()?;
                        return Ok(());
                    }
                }
                None => {}
            }
            if node.is_collection {
                working_copy::create_dir(file_path)?;
            }
        }

        if node.is_collection {
            meta_store::ensure_meta_dir(&file_path.join(META_DIR))?;
        } else {
            let unchanged = target.is_file()
                && hasher::file_digest(&target).ok().as_deref() == server_md5.as_deref();
            if !unchanged {
                working_copy::write_content(&target, node.content.as_deref().unwrap_or_default())?;
                working_copy::apply_last_modified(&target, node.last_modified);
            }
        }

        let block = if node.is_collection {
            reader.open_children()?
        } else {
            ChildrenBlock::Absent
        };
        let mut seen = BTreeSet::new();
        if block == ChildrenBlock::Entries {
            while reader.next_child()? {
                let name = working_copy::checked_child_name(reader.attribute("name"), path)?;
                self.visit(reader, &file_path.join(&name), &child_path(path, &name), false)?;
                seen.insert(name);
            }
        }
        reader.close_node()?;

        if node.is_collection && !collection_unchanged && !self.options.silent {
            let listed = (block == ChildrenBlock::Entries).then_some(&seen);
            self.sweep(file_path, listed)?;
        }
        if collection_unchanged {
            return Ok(());
        }

        meta_store::write(&meta_path, &record)?;
        if node.is_collection && !is_updating {
            working_copy::apply_last_modified(file_path, node.last_modified);
        }
        if !is_root {
            let code = if conflicting {
                self.summary.conflicted += 1;
                MessageCode::Conflicted
            } else if is_updating {
                self.summary.updated += 1;
                MessageCode::Updated
            } else {
                self.summary.added += 1;
                MessageCode::Added
            };
            self.notify(code, &shown);
        }
        Ok(())
    }

    /// Delete tracked entries of `dir` missing from `listed`; `None` means
    /// the dump listed nothing.
    fn sweep(&mut self, dir: &Path, listed: Option<&BTreeSet<String>>) -> Result<(), SyncError> {
        for name in working_copy::listing(dir) {
            if name == META_DIR || listed.is_some_and(|l| l.contains(&name)) {
                continue;
            }
            let entry = dir.join(&name);
            let is_dir = entry.is_dir();
            let meta_path = meta_store::meta_file_path(&entry, is_dir);
            if !meta_path.exists() {
                continue;
            }
            self.delete_tracked(&entry, is_dir, &meta_path)?;
        }

        // Conflicted resources have no file under their own name.
        for name in meta_store::tracked_resource_names(dir) {
            if listed.is_some_and(|l| l.contains(&name)) {
                continue;
            }
            let entry = dir.join(&name);
            if entry.exists() {
                continue;
            }
            let meta_path = meta_store::meta_file_path(&entry, false);
            if meta_store::read(&meta_path).is_ok_and(|r| r.conflicting) {
                self.drop_conflict(&entry, &meta_path)?;
            }
        }
        Ok(())
    }

    /// Forget a conflict on a resource the registry no longer has. The local
    /// bytes in `<name>.mine` stay.
    fn drop_conflict(&mut self, entry: &Path, meta_path: &Path) -> Result<(), SyncError> {
        let server_copy = working_copy::with_suffix(entry, SERVER_SUFFIX);
        if server_copy.is_file() {
            working_copy::remove_entry(&server_copy, false)?;
        }
        working_copy::remove_entry(meta_path, false)?;
        let shown = working_copy::display_path(entry);
        self.summary.deleted += 1;
        self.notify(MessageCode::Deleted, &shown);
        Ok(())
    }

    fn delete_tracked(&mut self, entry: &Path, is_dir: bool, meta_path: &Path) -> Result<(), SyncError> {
        let shown = working_copy::display_path(entry);
        let confirmed = if is_dir {
            confirm_or_default(
                self.callback,
                &Message::new(MessageCode::DirectoryDeleteConfirmation, shown.as_str()),
                ConfirmContext::Delete,
            )
        } else {
            let recorded = meta_store::read(meta_path).ok().and_then(|r| r.md5);
            let current = hasher::file_digest(entry).ok();
            let pristine = recorded.is_some() && recorded == current;
            pristine
                || confirm_or_default(
                    self.callback,
                    &Message::new(MessageCode::FileDeleteConfirmation, shown.as_str()),
                    ConfirmContext::Delete,
                )
        };

        if !confirmed {
            self.summary.not_deleted += 1;
            self.notify(MessageCode::NotDeleted, &shown);
            return Ok(());
        }
        working_copy::remove_entry(entry, is_dir)?;
        if !is_dir {
            working_copy::remove_entry(meta_path, false)?;
        }
        self.summary.deleted += 1;
        self.notify(MessageCode::Deleted, &shown);
        Ok(())
    }

    fn notify(&self, code: MessageCode, shown: &str) {
        tracing::info!("{code}: {shown}");
        if self.options.silent {
            return;
        }
        if let Some(cb) = self.callback {
            cb.display(&Message::new(code, shown));
        }
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A resolved `update [url]` invocation.
#[derive(Debug, Clone)]
pub struct UpdateCommand {
    location: RegistryLocation,
    working_dir: PathBuf,
    options: UpdateOptions,
    username: Option<String>,
    spool_dir: Option<PathBuf>,
}

impl UpdateCommand {
    /// Update `working_dir` from `user_url`, or from wherever the working
    /// copy was checked out from when no url is given.
    pub fn new(user_url: Option<&str>, working_dir: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let working_dir = working_dir.into();
        let location = match user_url {
            Some(url) => RegistryLocation::parse(url)?,
            None => location_of_working_copy(&working_dir)?,
        };
        Ok(Self {
            location,
            working_dir,
            options: UpdateOptions::default(),
            username: None,
            spool_dir: None,
        })
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.options.silent = silent;
        self
    }

    pub fn ignore_conflicts(mut self, ignore: bool) -> Self {
        self.options.ignore_conflicts = ignore;
        self
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    /// Pick up the ignore-conflicts switch, spool location and default
    /// username from `config`.
    pub fn with_config(mut self, config: &SyncConfig) -> Self {
        self.options.ignore_conflicts |= config.ignore_conflicts;
        self.spool_dir = config.spool_dir.clone();
        if self.username.is_none() {
            self.username = config.username.clone();
        }
        self
    }

    pub fn location(&self) -> &RegistryLocation {
        &self.location
    }

    pub fn options(&self) -> UpdateOptions {
        self.options
    }

    pub fn execute(
        &self,
        registry: &dyn Registry,
        callback: Option<&dyn UserInputCallback>,
    ) -> Result<UpdateSummary, SyncError> {
        self.update(registry, callback)
            .map_err(|err| self.location.annotate(err, self.username.as_deref()))
    }

    fn update(
        &self,
        registry: &dyn Registry,
        callback: Option<&dyn UserInputCallback>,
    ) -> Result<UpdateSummary, SyncError> {
        let path = self.location.path.as_str();
        match registry.resource_exists(path) {
            Ok(true) => {}
            Ok(false) => {
                return Err(SyncError::new(MessageCode::ResourceMissingOrDenied)
                    .with("registry path", path))
            }
            Err(e) => return Err(registry_failure(e, path)),
        }

        let engine = UpdateEngine::new(self.options, callback)
            .with_registry_url(self.location.registry_url.as_deref());
        let (mut summary, cleanup) =
            with_spooled_dump(registry, path, self.spool_dir.as_deref(), |reader| {
                engine.run(reader, &self.working_dir, path)
            })?;
        summary.cleanup_error = cleanup;
        tracing::info!(
            "updated {} from {} ({} added, {} updated, {} conflicted, {} deleted)",
            self.working_dir.display(),
            self.location,
            summary.added,
            summary.updated,
            summary.conflicted,
            summary.deleted
        );
        Ok(summary)
    }
}

/// Registry location recorded in the root meta record of `working_dir`.
pub fn location_of_working_copy(working_dir: &Path) -> Result<RegistryLocation, SyncError> {
    let meta_path = meta_store::meta_file_path(working_dir, true);
    let Some(record) = meta_store::read_if_exists(&meta_path)? else {
        return Err(SyncError::new(MessageCode::CheckoutBeforeUpdate).with_path(working_dir));
    };
    let path = if record.path.is_empty() {
        ROOT_PATH.to_owned()
    } else {
        record.path
    };
    Ok(RegistryLocation {
        registry_url: record.registry_url,
        path,
    })
}

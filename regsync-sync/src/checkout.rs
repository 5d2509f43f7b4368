//! Checkout: materialise a registry subtree as a working copy.
//!
//! [`CheckoutCommand`] resolves the target, spools the dump and drives a
//! [`CheckoutEngine`] over it. The engine can also be driven directly with
//! any [`DumpReader`].

use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use regsync_core::types::child_path;
use regsync_core::{ChildrenBlock, DumpReader, Registry, SyncConfig};

use crate::callback::{confirm_or_default, ConfirmContext, Message, UserInputCallback};
use crate::error::{io_err, MessageCode, SyncError};
use crate::location::RegistryLocation;
use crate::meta_store::{self, MetaRecord};
use crate::spool::{registry_failure, with_spooled_dump};
use crate::working_copy::{self, EntryKind};

/// Counters reported by a checkout.
#[derive(Debug, Default)]
pub struct CheckoutSummary {
    pub added: usize,
    pub overwritten: usize,
    pub not_overwritten: usize,
    /// Set when the dump was written to a file instead of a working copy.
    pub output_file: Option<PathBuf>,
    /// The spool could not be deleted; the checkout itself succeeded.
    pub cleanup_error: Option<SyncError>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Recursive walk writing dump nodes and their meta records to disk.
pub struct CheckoutEngine<'a> {
    registry_url: Option<&'a str>,
    callback: Option<&'a dyn UserInputCallback>,
    summary: CheckoutSummary,
}

impl<'a> CheckoutEngine<'a> {
    pub fn new(callback: Option<&'a dyn UserInputCallback>) -> Self {
        Self {
            registry_url: None,
            callback,
            summary: CheckoutSummary::default(),
        }
    }

    /// Registry url recorded in every meta record.
    pub fn with_registry_url(mut self, registry_url: Option<&'a str>) -> Self {
        self.registry_url = registry_url;
        self
    }

    /// Check out the dump under `reader` into `working_dir`, which maps to
    /// `registry_path`. The working directory itself is not counted.
    pub fn run<R: BufRead>(
        mut self,
        reader: &mut DumpReader<R>,
        working_dir: &Path,
        registry_path: &str,
    ) -> Result<CheckoutSummary, SyncError> {
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
        let kind = working_copy::probe(file_path)?;
        if kind.contradicts(node.is_collection) {
            return Err(SyncError::new(MessageCode::CollectionResourceSameName)
                .with_path(file_path));
        }
        let server_changed = meta_store::resource_updated(&meta_path, &node);
        let shown = working_copy::display_path(file_path);

        let mut overwrite = true;
        let mut created_dir = false;
        if node.is_collection {
            if kind == EntryKind::Missing && server_changed {
                working_copy::create_dir(file_path)?;
                created_dir = true;
            } else {
                overwrite = false;
            }
        } else if kind != EntryKind::Missing {
            overwrite = server_changed
                && confirm_or_default(
                    self.callback,
                    &Message::new(MessageCode::FileOverwriteConfirmation, shown.as_str()),
                    ConfirmContext::Overwrite,
                );
        }

        if !node.is_collection && overwrite {
            let bytes = node.content.as_deref().unwrap_or_default();
            working_copy::write_content(file_path, bytes)?;
            working_copy::apply_last_modified(file_path, node.last_modified);
        }
        meta_store::write(
            &meta_path,
            &MetaRecord::from_dump(&node, path, self.registry_url),
        )?;

        if !is_root {
            let code = if kind == EntryKind::Missing {
                self.summary.added += 1;
                MessageCode::Added
            } else if overwrite {
                self.summary.overwritten += 1;
                MessageCode::Overwritten
            } else {
                self.summary.not_overwritten += 1;
                MessageCode::NotOverwritten
            };
            self.notify(code, &shown);
        }

        if node.is_collection && reader.open_children()? == ChildrenBlock::Entries {
            while reader.next_child()? {
                let name = working_copy::checked_child_name(reader.attribute("name"), path)?;
                self.visit(reader, &file_path.join(&name), &child_path(path, &name), false)?;
            }
        }
        reader.close_node()?;
        if created_dir {
            working_copy::apply_last_modified(file_path, node.last_modified);
        }
        Ok(())
    }

    fn notify(&self, code: MessageCode, shown: &str) {
        tracing::info!("{code}: {shown}");
        if let Some(cb) = self.callback {
            cb.display(&Message::new(code, shown));
        }
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A resolved `checkout <url>` invocation.
#[derive(Debug, Clone)]
pub struct CheckoutCommand {
    location: RegistryLocation,
    working_dir: PathBuf,
    output_file: Option<PathBuf>,
    username: Option<String>,
    spool_dir: Option<PathBuf>,
}

impl CheckoutCommand {
    /// Target `user_url` (a registry url or a bare registry path) into
    /// `working_dir`.
    pub fn new(user_url: Option<&str>, working_dir: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let user_url = user_url.ok_or_else(|| SyncError::new(MessageCode::PathMissing))?;
        Ok(Self {
            location: RegistryLocation::parse(user_url)?,
            working_dir: working_dir.into(),
            output_file: None,
            username: None,
            spool_dir: None,
        })
    }

    /// Write the raw dump to `<working dir>/<file>` instead of checking out.
    pub fn with_output_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.output_file = Some(file.into());
        self
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    /// Pick up spool location and default username from `config`.
    pub fn with_config(mut self, config: &SyncConfig) -> Self {
        self.spool_dir = config.spool_dir.clone();
        if self.username.is_none() {
            self.username = config.username.clone();
        }
        self
    }

    pub fn location(&self) -> &RegistryLocation {
        &self.location
    }

    pub fn execute(
        &self,
        registry: &dyn Registry,
        callback: Option<&dyn UserInputCallback>,
    ) -> Result<CheckoutSummary, SyncError> {
        if let Some(file) = &self.output_file {
            return self.dump_to_file(registry, file).map_err(|e| self.annotate(e));
        }
        self.checkout(registry, callback).map_err(|e| self.annotate(e))
    }

    fn checkout(
        &self,
        registry: &dyn Registry,
        callback: Option<&dyn UserInputCallback>,
    ) -> Result<CheckoutSummary, SyncError> {
        let path = self.location.path.as_str();
        let resource = registry.get(path).map_err(|e| registry_failure(e, path))?;
        if !resource.is_collection {
            return Err(
                SyncError::new(MessageCode::DumpingNonCollection).with("registry path", path)
            );
        }

        let engine = CheckoutEngine::new(callback)
            .with_registry_url(self.location.registry_url.as_deref());
        let (mut summary, cleanup) =
            with_spooled_dump(registry, path, self.spool_dir.as_deref(), |reader| {
                engine.run(reader, &self.working_dir, path)
            })?;
        summary.cleanup_error = cleanup;
        tracing::info!(
            "checked out {} into {} ({} added, {} overwritten, {} kept)",
            self.location,
            self.working_dir.display(),
            summary.added,
            summary.overwritten,
            summary.not_overwritten
        );
        Ok(summary)
    }

    fn dump_to_file(&self, registry: &dyn Registry, file: &Path) -> Result<CheckoutSummary, SyncError> {
        let path = self.location.path.as_str();
        match registry.resource_exists(path) {
            Ok(true) => {}
            Ok(false) => {
                return Err(SyncError::new(MessageCode::ResourceMissingOrDenied)
                    .with("registry path", path))
            }
            Err(e) => return Err(registry_failure(e, path)),
        }

        let target = self.working_dir.join(file);
        if let Some(dir) = target.parent() {
            working_copy::create_dir(dir)?;
        }
        let handle =
            File::create(&target).map_err(|e| io_err(MessageCode::FileCreationFailed, &target, e))?;
        let mut out = BufWriter::new(handle);
        registry.dump(path, &mut out).map_err(|e| {
            SyncError::new(MessageCode::DumpFailed)
                .with("registry path", path)
                .caused_by(e)
        })?;
        out.flush()
            .map_err(|e| io_err(MessageCode::DumpFailed, &target, e))?;
        tracing::info!("dumped {} to {}", self.location, target.display());
        Ok(CheckoutSummary {
            output_file: Some(target),
            ..CheckoutSummary::default()
        })
    }

    fn annotate(&self, err: SyncError) -> SyncError {
        self.location.annotate(err, self.username.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regsync_core::MemoryRegistry;
    use std::cell::RefCell;
    use tempfile::TempDir;

    struct Answer {
        overwrite: bool,
        seen: RefCell<Vec<MessageCode>>,
    }

    impl UserInputCallback for Answer {
        fn confirm(&self, message: &Message, _context: ConfirmContext) -> bool {
            self.seen.borrow_mut().push(message.code);
            self.overwrite
        }

        fn display(&self, message: &Message) {
            self.seen.borrow_mut().push(message.code);
        }
    }

    const DUMP: &str = r#"<resource name="proj" isCollection="true"><version>4</version><children>
        <resource name="a.txt" isCollection="false"><version>2</version><lastModified>1600000000000</lastModified><content>YWxwaGE=</content></resource>
        <resource name="docs" isCollection="true"><version>3</version><lastModified>1500000000000</lastModified><children>
            <resource name="b.txt" isCollection="false"><version>3</version><content>YmV0YQ==</content></resource>
        </children></resource>
    </children></resource>"#;

    fn run(wc: &Path, callback: Option<&dyn UserInputCallback>) -> CheckoutSummary {
        let mut reader = DumpReader::new(DUMP.as_bytes());
        CheckoutEngine::new(callback)
            .run(&mut reader, wc, "/proj")
            .expect("checkout")
    }

    #[test]
    fn fresh_checkout_writes_files_and_meta() {
        let tmp = TempDir::new().unwrap();
        let wc = tmp.path().join("wc");
        let summary = run(&wc, None);

        assert_eq!(summary.added, 3);
        assert_eq!(std::fs::read(wc.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(wc.join("docs/b.txt")).unwrap(), b"beta");
        assert!(wc.join(".meta/meta.xml").is_file());
        assert!(wc.join(".meta/meta-a.txt.xml").is_file());
        assert!(wc.join("docs/.meta/meta.xml").is_file());
        assert!(wc.join("docs/.meta/meta-b.txt.xml").is_file());

        let root = meta_store::read(&wc.join(".meta/meta.xml")).unwrap();
        assert_eq!(root.path, "/proj");
        let b = meta_store::read(&wc.join("docs/.meta/meta-b.txt.xml")).unwrap();
        assert_eq!(b.path, "/proj/docs/b.txt");
        assert_eq!(b.md5.as_deref(), Some(crate::hasher::digest(b"beta").as_str()));
    }

    #[test]
    fn last_modified_is_applied_after_writing() {
        let tmp = TempDir::new().unwrap();
        run(tmp.path(), None);
        let md = std::fs::metadata(tmp.path().join("a.txt")).unwrap();
        let mtime = filetime::FileTime::from_last_modification_time(&md);
        assert_eq!(mtime.unix_seconds(), 1_600_000_000);
    }

    #[test]
    fn created_directories_take_the_registry_mtime() {
        let tmp = TempDir::new().unwrap();
        run(tmp.path(), None);
        let md = std::fs::metadata(tmp.path().join("docs")).unwrap();
        let mtime = filetime::FileTime::from_last_modification_time(&md);
        assert_eq!(mtime.unix_seconds(), 1_500_000_000);
    }

    #[test]
    fn second_checkout_keeps_unchanged_files() {
        let tmp = TempDir::new().unwrap();
        run(tmp.path(), None);
        std::fs::write(tmp.path().join("a.txt"), b"local edit").unwrap();
        let summary = run(tmp.path(), None);
        assert_eq!(summary.added, 0);
        assert_eq!(summary.overwritten, 0);
        assert_eq!(summary.not_overwritten, 3);
        assert_eq!(std::fs::read(tmp.path().join("a.txt")).unwrap(), b"local edit");
    }

    #[test]
    fn declined_overwrite_keeps_local_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"unrelated").unwrap();
        let answer = Answer {
            overwrite: false,
            seen: RefCell::new(Vec::new()),
        };
        let summary = run(tmp.path(), Some(&answer));
        assert_eq!(summary.not_overwritten, 1);
        assert_eq!(std::fs::read(tmp.path().join("a.txt")).unwrap(), b"unrelated");
        assert!(answer
            .seen
            .borrow()
            .contains(&MessageCode::FileOverwriteConfirmation));
    }

    #[test]
    fn type_mismatch_is_fatal() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("docs"), b"a file, not a dir").unwrap();
        let mut reader = DumpReader::new(DUMP.as_bytes());
        let err = CheckoutEngine::new(None)
            .run(&mut reader, tmp.path(), "/proj")
            .unwrap_err();
        assert_eq!(err.code(), MessageCode::CollectionResourceSameName);
    }

    #[test]
    fn escaping_child_names_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let dump = r#"<resource name="p" isCollection="true"><version>1</version><children>
            <resource name=".." isCollection="false"><version>1</version><content></content></resource>
        </children></resource>"#;
        let mut reader = DumpReader::new(dump.as_bytes());
        let err = CheckoutEngine::new(None)
            .run(&mut reader, &tmp.path().join("wc"), "/p")
            .unwrap_err();
        assert_eq!(err.code(), MessageCode::MalformedDump);
    }

    #[test]
    fn command_rejects_non_collections_and_missing_urls() {
        let tmp = TempDir::new().unwrap();
        let mut reg = MemoryRegistry::new();
        reg.put("/file.txt", b"x".to_vec()).unwrap();

        let err = CheckoutCommand::new(Some("/file.txt"), tmp.path())
            .unwrap()
            .execute(&reg, None)
            .unwrap_err();
        assert_eq!(err.code(), MessageCode::DumpingNonCollection);

        let err = CheckoutCommand::new(None, tmp.path()).unwrap_err();
        assert_eq!(err.code(), MessageCode::PathMissing);
    }

    #[test]
    fn command_errors_carry_username() {
        let tmp = TempDir::new().unwrap();
        let reg = MemoryRegistry::new();
        let err = CheckoutCommand::new(Some("/missing"), tmp.path())
            .unwrap()
            .with_username(Some("admin".into()))
            .execute(&reg, None)
            .unwrap_err();
        assert_eq!(err.code(), MessageCode::ResourceMissingOrDenied);
        assert_eq!(err.context_value("username"), Some("admin"));
    }

    #[test]
    fn command_errors_carry_registry_url() {
        let tmp = TempDir::new().unwrap();
        let reg = MemoryRegistry::new();
        let err = CheckoutCommand::new(Some("https://h/registry/missing"), tmp.path())
            .unwrap()
            .execute(&reg, None)
            .unwrap_err();
        assert_eq!(err.code(), MessageCode::ResourceMissingOrDenied);
        assert_eq!(err.context_value("registry url"), Some("https://h/registry"));
        assert_eq!(err.context_value("username"), None);
    }

    #[test]
    fn output_file_mode_writes_raw_dump() {
        let tmp = TempDir::new().unwrap();
        let mut reg = MemoryRegistry::new();
        reg.put("/p/a.txt", b"alpha".to_vec()).unwrap();
        let summary = CheckoutCommand::new(Some("/p"), tmp.path())
            .unwrap()
            .with_output_file("p.xml")
            .execute(&reg, None)
            .unwrap();
        let out = summary.output_file.expect("output file");
        assert_eq!(out, tmp.path().join("p.xml"));
        let mut reader = DumpReader::from_file(&out).unwrap();
        assert_eq!(reader.read_node().unwrap().expect("root").name, "p");
        assert!(!tmp.path().join(".meta").exists());
    }
}

use std::cell::RefCell;
use std::fs;
use std::path::Path;

use filetime::{set_file_mtime, FileTime};
use regsync_core::{DumpReader, MemoryRegistry};
use regsync_sync::{
    meta_store, CheckoutCommand, ConfirmContext, Message, MessageCode, UpdateCommand,
    UpdateEngine, UpdateOptions, UpdateSummary, UserInputCallback,
};
use tempfile::TempDir;

struct Recorder {
    answer: bool,
    prompts: RefCell<Vec<MessageCode>>,
    notices: RefCell<Vec<Message>>,
}

impl Recorder {
    fn answering(answer: bool) -> Self {
        Self {
            answer,
            prompts: RefCell::new(Vec::new()),
            notices: RefCell::new(Vec::new()),
        }
    }
}

impl UserInputCallback for Recorder {
    fn confirm(&self, message: &Message, _context: ConfirmContext) -> bool {
        self.prompts.borrow_mut().push(message.code);
        self.answer
    }

    fn display(&self, message: &Message) {
        self.notices.borrow_mut().push(message.clone());
    }
}

fn project() -> MemoryRegistry {
    let mut reg = MemoryRegistry::new();
    reg.put("/p/a.txt", "alpha").expect("put a");
    reg.put("/p/b.txt", "bravo").expect("put b");
    reg.put("/p/c.txt", "charlie").expect("put c");
    reg
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn checkout(reg: &MemoryRegistry, wc: &Path) {
    init_logging();
    CheckoutCommand::new(Some("/p"), wc)
        .expect("command")
        .execute(reg, None)
        .expect("checkout");
}

fn update(reg: &MemoryRegistry, wc: &Path) -> UpdateSummary {
    UpdateCommand::new(Some("/p"), wc)
        .expect("command")
        .execute(reg, None)
        .expect("update")
}

#[test]
fn update_right_after_checkout_changes_nothing() {
    let wc = TempDir::new().expect("wc");
    let reg = project();
    checkout(&reg, wc.path());

    let first = update(&reg, wc.path());
    let second = update(&reg, wc.path());
    assert!(!first.any_change(), "{first:?}");
    assert!(!second.any_change(), "{second:?}");
}

#[test]
fn checkout_counts_overwrites_of_untracked_files() {
    let wc = TempDir::new().expect("wc");
    let mut reg = MemoryRegistry::new();
    reg.put("/p/a.txt", "server a").expect("put a");
    reg.put("/p/b.txt", "server b").expect("put b");
    fs::write(wc.path().join("a.txt"), "local a").expect("seed a");

    let summary = CheckoutCommand::new(Some("/p"), wc.path())
        .expect("command")
        .execute(&reg, None)
        .expect("checkout");
    assert_eq!(summary.added, 1);
    assert_eq!(summary.overwritten, 1);
    assert_eq!(summary.not_overwritten, 0);
    assert_eq!(fs::read_to_string(wc.path().join("a.txt")).unwrap(), "server a");
}

#[test]
fn concurrent_edits_produce_mine_and_server_artifacts() {
    let wc = TempDir::new().expect("wc");
    let mut reg = project();
    checkout(&reg, wc.path());

    fs::write(wc.path().join("a.txt"), "local edit").expect("edit");
    reg.put("/p/a.txt", "server edit").expect("server edit");

    let recorder = Recorder::answering(true);
    let summary = UpdateCommand::new(Some("/p"), wc.path())
        .expect("command")
        .execute(&reg, Some(&recorder))
        .expect("update");

    assert_eq!(summary.conflicted, 1);
    assert!(!wc.path().join("a.txt").exists());
    assert_eq!(
        fs::read_to_string(wc.path().join("a.txt.mine")).unwrap(),
        "local edit"
    );
    assert_eq!(
        fs::read_to_string(wc.path().join("a.txt.server")).unwrap(),
        "server edit"
    );

    let meta = meta_store::read(&meta_store::meta_file_path(&wc.path().join("a.txt"), false))
        .expect("meta");
    assert!(meta.conflicting);
    assert_eq!(meta.md5, None);
    assert!(recorder
        .notices
        .borrow()
        .iter()
        .any(|m| m.code == MessageCode::Conflicted));
}

#[test]
fn unchanged_file_is_not_rewritten() {
    let wc = TempDir::new().expect("wc");
    let mut reg = project();
    checkout(&reg, wc.path());

    let a = wc.path().join("a.txt");
    let old = FileTime::from_unix_time(1_600_000_000, 0);
    set_file_mtime(&a, old).expect("age a");
    reg.put("/p/b.txt", "bravo 2").expect("server edit");

    let summary = update(&reg, wc.path());
    assert_eq!(summary.updated, 1);
    let mtime = FileTime::from_last_modification_time(&fs::metadata(&a).unwrap());
    assert_eq!(mtime, old);
    assert_eq!(fs::read_to_string(wc.path().join("b.txt")).unwrap(), "bravo 2");
}

#[test]
fn entries_removed_on_the_server_are_swept() {
    let wc = TempDir::new().expect("wc");
    let mut reg = project();
    checkout(&reg, wc.path());

    reg.delete("/p/c.txt").expect("delete");
    let summary = update(&reg, wc.path());
    assert_eq!(summary.deleted, 1);
    assert!(!wc.path().join("c.txt").exists());
    assert!(!meta_store::meta_file_path(&wc.path().join("c.txt"), false).exists());
    assert!(wc.path().join("a.txt").exists());
}

#[test]
fn untracked_files_survive_the_sweep() {
    let wc = TempDir::new().expect("wc");
    let mut reg = project();
    checkout(&reg, wc.path());

    fs::write(wc.path().join("notes.md"), "keep me").expect("untracked");
    reg.delete("/p/c.txt").expect("delete");
    update(&reg, wc.path());
    assert!(wc.path().join("notes.md").exists());
}

#[test]
fn locally_modified_file_removed_on_server_asks_first() {
    let wc = TempDir::new().expect("wc");
    let mut reg = project();
    checkout(&reg, wc.path());

    fs::write(wc.path().join("c.txt"), "edited").expect("edit");
    reg.delete("/p/c.txt").expect("delete");

    let recorder = Recorder::answering(false);
    let summary = UpdateCommand::new(Some("/p"), wc.path())
        .expect("command")
        .execute(&reg, Some(&recorder))
        .expect("update");
    assert_eq!(summary.deleted, 0);
    assert_eq!(summary.not_deleted, 1);
    assert_eq!(
        recorder.prompts.borrow().as_slice(),
        &[MessageCode::FileDeleteConfirmation]
    );
    assert!(wc.path().join("c.txt").exists());
}

#[test]
fn silent_update_never_deletes() {
    let wc = TempDir::new().expect("wc");
    let mut reg = project();
    checkout(&reg, wc.path());

    reg.delete("/p/c.txt").expect("delete");
    let recorder = Recorder::answering(true);
    let summary = UpdateCommand::new(Some("/p"), wc.path())
        .expect("command")
        .silent(true)
        .execute(&reg, Some(&recorder))
        .expect("update");
    assert_eq!(summary.deleted, 0);
    assert!(wc.path().join("c.txt").exists());
    assert!(recorder.notices.borrow().is_empty());
    assert!(recorder.prompts.borrow().is_empty());
}

#[test]
fn local_deletion_is_kept_by_default() {
    let wc = TempDir::new().expect("wc");
    let mut reg = project();
    checkout(&reg, wc.path());

    fs::remove_file(wc.path().join("a.txt")).expect("rm");
    reg.put("/p/a.txt", "alpha 2").expect("server edit");
    let summary = update(&reg, wc.path());
    assert!(!wc.path().join("a.txt").exists());
    assert_eq!(summary.added, 0);
}

#[test]
fn declining_to_keep_a_local_deletion_restores_the_file() {
    let wc = TempDir::new().expect("wc");
    let mut reg = project();
    checkout(&reg, wc.path());

    fs::remove_file(wc.path().join("a.txt")).expect("rm");
    reg.put("/p/a.txt", "alpha 2").expect("server edit");

    let recorder = Recorder::answering(false);
    let summary = UpdateCommand::new(Some("/p"), wc.path())
        .expect("command")
        .execute(&reg, Some(&recorder))
        .expect("update");
    assert_eq!(summary.added, 1);
    assert_eq!(fs::read_to_string(wc.path().join("a.txt")).unwrap(), "alpha 2");
    assert!(recorder
        .prompts
        .borrow()
        .contains(&MessageCode::KeepDeletedFile));
}

#[test]
fn empty_children_block_sweeps_only_the_direct_listing() {
    let wc = TempDir::new().expect("wc");
    let checkout_dump = r#"<resource name="p" isCollection="true"><version>1</version><children>
        <resource name="docs" isCollection="true"><version>1</version><children>
            <resource name="x.txt" isCollection="false"><version>1</version><content>eA==</content></resource>
            <resource name="y.txt" isCollection="false"><version>1</version><content>eQ==</content></resource>
        </children></resource>
    </children></resource>"#;
    let mut reader = DumpReader::new(checkout_dump.as_bytes());
    regsync_sync::CheckoutEngine::new(None)
        .run(&mut reader, wc.path(), "/p")
        .expect("checkout");

    let update_dump = r#"<resource name="p" isCollection="true"><version>2</version><children>
        <resource name="docs" isCollection="true"><version>2</version><children></children></resource>
    </children></resource>"#;
    let mut reader = DumpReader::new(update_dump.as_bytes());
    let summary = UpdateEngine::new(UpdateOptions::default(), None)
        .run(&mut reader, wc.path(), "/p")
        .expect("update");

    assert_eq!(summary.updated, 1);
    assert_eq!(summary.deleted, 2);
    assert!(wc.path().join("docs").is_dir());
    assert!(!wc.path().join("docs/x.txt").exists());
}

#[test]
fn update_without_url_uses_the_checked_out_location() {
    let wc = TempDir::new().expect("wc");
    let mut reg = project();
    checkout(&reg, wc.path());
    reg.put("/p/new.txt", "fresh").expect("add");

    let cmd = UpdateCommand::new(None, wc.path()).expect("command");
    assert_eq!(cmd.location().path, "/p");
    let summary = cmd.execute(&reg, None).expect("update");
    assert_eq!(summary.added, 1);
    assert_eq!(fs::read_to_string(wc.path().join("new.txt")).unwrap(), "fresh");
}

#[test]
fn denied_and_missing_targets_report_the_same_code() {
    let wc = TempDir::new().expect("wc");
    let mut reg = project();
    checkout(&reg, wc.path());

    let missing = UpdateCommand::new(Some("/nope"), wc.path())
        .expect("command")
        .execute(&reg, None)
        .unwrap_err();
    reg.deny_access("/p");
    let denied = UpdateCommand::new(Some("/p"), wc.path())
        .expect("command")
        .execute(&reg, None)
        .unwrap_err();
    assert_eq!(missing.code(), MessageCode::ResourceMissingOrDenied);
    assert_eq!(denied.code(), MessageCode::ResourceMissingOrDenied);
}

#[test]
fn new_collections_are_created_with_meta() {
    let wc = TempDir::new().expect("wc");
    let mut reg = project();
    checkout(&reg, wc.path());
    reg.put("/p/sub/inner.txt", "inside").expect("nested");

    let summary = update(&reg, wc.path());
    assert_eq!(summary.added, 2);
    assert!(meta_store::meta_file_path(&wc.path().join("sub"), true).exists());
    assert_eq!(
        fs::read_to_string(wc.path().join("sub/inner.txt")).unwrap(),
        "inside"
    );
}

fn conflict_on_a(reg: &mut MemoryRegistry, wc: &Path) {
    checkout(reg, wc);
    fs::write(wc.join("a.txt"), "local edit").expect("edit");
    reg.put("/p/a.txt", "server edit").expect("server edit");
    let first = update(reg, wc);
    assert_eq!(first.conflicted, 1);
}

#[test]
fn unresolved_conflict_follows_further_server_edits() {
    let wc = TempDir::new().expect("wc");
    let mut reg = project();
    conflict_on_a(&mut reg, wc.path());

    reg.put("/p/a.txt", "server edit again").expect("second edit");
    let recorder = Recorder::answering(false);
    let summary = UpdateCommand::new(Some("/p"), wc.path())
        .expect("command")
        .execute(&reg, Some(&recorder))
        .expect("update");

    assert_eq!(summary.conflicted, 1);
    assert_eq!(summary.added, 0);
    assert!(recorder.prompts.borrow().is_empty());
    assert!(!wc.path().join("a.txt").exists());
    assert_eq!(
        fs::read_to_string(wc.path().join("a.txt.server")).unwrap(),
        "server edit again"
    );
    assert_eq!(
        fs::read_to_string(wc.path().join("a.txt.mine")).unwrap(),
        "local edit"
    );
    let meta = meta_store::read(&meta_store::meta_file_path(&wc.path().join("a.txt"), false))
        .expect("meta");
    assert!(meta.conflicting);

    let quiet = update(&reg, wc.path());
    assert!(!quiet.any_change(), "{quiet:?}");
    assert_eq!(quiet.conflicted, 0);
}

#[test]
fn conflict_on_a_resource_deleted_upstream_is_dropped() {
    let wc = TempDir::new().expect("wc");
    let mut reg = project();
    conflict_on_a(&mut reg, wc.path());

    reg.delete("/p/a.txt").expect("delete");
    let summary = update(&reg, wc.path());

    assert_eq!(summary.deleted, 1);
    assert!(!wc.path().join("a.txt.server").exists());
    assert!(!meta_store::meta_file_path(&wc.path().join("a.txt"), false).exists());
    assert_eq!(
        fs::read_to_string(wc.path().join("a.txt.mine")).unwrap(),
        "local edit"
    );
}

#[test]
fn conflicts_alone_are_not_a_change() {
    let wc = TempDir::new().expect("wc");
    let mut reg = project();
    checkout(&reg, wc.path());
    fs::write(wc.path().join("a.txt"), "local edit").expect("edit");
    reg.put("/p/a.txt", "server edit").expect("server edit");

    let summary = update(&reg, wc.path());
    assert_eq!(summary.conflicted, 1);
    assert!(!summary.any_change(), "{summary:?}");
}

#[test]
fn empty_children_under_an_unchanged_collection_keep_its_files() {
    let wc = TempDir::new().expect("wc");
    let checkout_dump = r#"<resource name="p" isCollection="true"><version>1</version><children>
        <resource name="docs" isCollection="true"><version>1</version><children>
            <resource name="x.txt" isCollection="false"><version>1</version><content>eA==</content></resource>
        </children></resource>
    </children></resource>"#;
    let mut reader = DumpReader::new(checkout_dump.as_bytes());
    regsync_sync::CheckoutEngine::new(None)
        .run(&mut reader, wc.path(), "/p")
        .expect("checkout");

    let update_dump = r#"<resource name="p" isCollection="true"><version>2</version><children>
        <resource name="docs" isCollection="true"><version>1</version><children/></resource>
    </children></resource>"#;
    let mut reader = DumpReader::new(update_dump.as_bytes());
    let summary = UpdateEngine::new(UpdateOptions::default(), None)
        .run(&mut reader, wc.path(), "/p")
        .expect("update");

    assert!(!summary.any_change(), "{summary:?}");
    assert_eq!(summary.conflicted, 0);
    assert_eq!(summary.not_deleted, 0);
    assert_eq!(fs::read_to_string(wc.path().join("docs/x.txt")).unwrap(), "x");
}

#[test]
fn collections_created_by_update_take_the_registry_mtime() {
    let wc = TempDir::new().expect("wc");
    let checkout_dump = r#"<resource name="p" isCollection="true"><version>1</version><children></children></resource>"#;
    let mut reader = DumpReader::new(checkout_dump.as_bytes());
    regsync_sync::CheckoutEngine::new(None)
        .run(&mut reader, wc.path(), "/p")
        .expect("checkout");

    let update_dump = r#"<resource name="p" isCollection="true"><version>2</version><children>
        <resource name="docs" isCollection="true"><version>2</version><lastModified>1500000000000</lastModified><children>
            <resource name="x.txt" isCollection="false"><version>2</version><content>eA==</content></resource>
        </children></resource>
    </children></resource>"#;
    let mut reader = DumpReader::new(update_dump.as_bytes());
    let summary = UpdateEngine::new(UpdateOptions::default(), None)
        .run(&mut reader, wc.path(), "/p")
        .expect("update");

    assert_eq!(summary.added, 2);
    let md = fs::metadata(wc.path().join("docs")).expect("docs");
    assert_eq!(
        FileTime::from_last_modification_time(&md).unix_seconds(),
        1_500_000_000
    );
}

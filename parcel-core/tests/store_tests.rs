//! Metadata store, lock and config integration tests against a real
//! directory layout.

use assert_fs::prelude::*;
use parcel_core::{
    config, lock, paths, Checksum, FileEntry, MetadataStore, PackageRef, PristineStore,
    RevisionId, WcError, WorkingCopyLock, WorkingCopyMeta,
};
use predicates::prelude::predicate;
use rstest::rstest;
use std::fs;

fn meta(revision: &str) -> WorkingCopyMeta {
    let mut meta = WorkingCopyMeta::new(
        &PackageRef::new("openSUSE:Factory", "zlib"),
        "file:///srv/parcel",
        RevisionId::from(revision),
    );
    for name in ["zlib.spec", "zlib.changes"] {
        meta.entries.insert(
            name.to_string(),
            FileEntry::tracked(name, Checksum::of(name.as_bytes())),
        );
    }
    meta
}

// ---------------------------------------------------------------------------
// 1. Layout
// ---------------------------------------------------------------------------

#[test]
fn init_creates_metadata_layout() {
    let wc = assert_fs::TempDir::new().expect("tempdir");
    MetadataStore::init(wc.path(), &meta("5")).expect("init");

    wc.child(".parcel/meta.json").assert(predicate::path::is_file());
    wc.child(".parcel/pristine").assert(predicate::path::is_dir());
    wc.child(".parcel/meta.json.tmp").assert(predicate::path::missing());
    wc.child(".parcel/meta.json")
        .assert(predicate::str::contains("\"revision\": \"5\""));
}

#[test]
#[cfg(unix)]
fn metadata_file_is_private() {
    use std::os::unix::fs::PermissionsExt;
    let wc = assert_fs::TempDir::new().expect("tempdir");
    MetadataStore::init(wc.path(), &meta("5")).expect("init");
    let mode = fs::metadata(paths::meta_path(wc.path()))
        .expect("stat")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}

// ---------------------------------------------------------------------------
// 2. Crash consistency
// ---------------------------------------------------------------------------

#[test]
fn leftover_tmp_from_crashed_writer_is_ignored() {
    let wc = assert_fs::TempDir::new().expect("tempdir");
    let store = MetadataStore::init(wc.path(), &meta("5")).expect("init");
    // A writer that died after writing half of the temp file.
    wc.child(".parcel/meta.json.tmp")
        .write_str("{\"format\": 1, \"revision\": \"6\"")
        .expect("write tmp");

    let loaded = store.load().expect("load");
    assert_eq!(loaded.revision, RevisionId::from("5"));
    assert_eq!(loaded.entries.len(), 2);

    let mut txn = store.begin().expect("begin");
    txn.set_revision(RevisionId::from("6"));
    txn.commit().expect("commit over leftover tmp");
    assert_eq!(store.load().expect("load").revision, RevisionId::from("6"));
}

#[rstest]
#[case::remove_entry(true)]
#[case::keep_entry(false)]
fn aborted_transactions_never_reach_disk(#[case] remove: bool) {
    let wc = assert_fs::TempDir::new().expect("tempdir");
    let store = MetadataStore::init(wc.path(), &meta("5")).expect("init");
    let before = fs::read(paths::meta_path(wc.path())).expect("read");

    let mut txn = store.begin().expect("begin");
    if remove {
        txn.remove("zlib.spec");
    }
    txn.set_revision(RevisionId::from("42"));
    txn.abort();

    let after = fs::read(paths::meta_path(wc.path())).expect("read");
    assert_eq!(before, after);
}

// ---------------------------------------------------------------------------
// 3. Lock + pristine
// ---------------------------------------------------------------------------

#[test]
fn lock_error_names_holder_and_path() {
    let wc = assert_fs::TempDir::new().expect("tempdir");
    MetadataStore::init(wc.path(), &meta("5")).expect("init");
    let _held = WorkingCopyLock::acquire(wc.path(), "update").expect("lock");
    let err = WorkingCopyLock::acquire(wc.path(), "commit").unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("`update`"), "got: {msg}");
    assert!(msg.contains(".parcel"), "got: {msg}");
    assert!(lock::read_holder(wc.path()).expect("read").is_some());
}

#[test]
fn pristine_survives_gc_for_live_checksums() {
    let wc = assert_fs::TempDir::new().expect("tempdir");
    let store = MetadataStore::init(wc.path(), &meta("5")).expect("init");
    let pristine = PristineStore::for_root(wc.path());
    let spec = pristine.put(b"zlib.spec").expect("put");
    pristine.put(b"orphaned").expect("put");

    let live = store.load().expect("load").live_checksums();
    assert_eq!(pristine.gc(&live).expect("gc"), 1);
    assert!(pristine.contains(&spec));
}

// ---------------------------------------------------------------------------
// 4. Config
// ---------------------------------------------------------------------------

#[test]
fn config_roundtrip_and_parse_error_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut cfg = config::Config::default();
    cfg.jobs = 8;
    cfg.remotes
        .insert("local".to_string(), "/srv/parcel".to_string());
    config::save_at(home.path(), &cfg).expect("save");
    assert_eq!(config::load_at(home.path()).expect("load"), cfg);

    home.child(".parcel/config.yaml")
        .write_str("jobs: [not, a, number]\n")
        .expect("write");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, WcError::ConfigParse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

use std::fs;

use parcel_core::{paths, LockHolder, LocalStatus, PackageRef};
use parcel_remote::MemoryRemote;
use parcel_sync::{
    add, checkout, cleanup, compute_status, diff, remove, resolve, revert, ErrorKind, OpAction,
    SyncOptions, WorkingCopy,
};
use rstest::rstest;
use tempfile::TempDir;

fn wc_with(files: &[(&str, &str)]) -> (TempDir, WorkingCopy) {
    let remote = MemoryRemote::new();
    let pkg = PackageRef::new("home:me", "tool");
    remote.create_package(&pkg, files).expect("create package");
    let dir = TempDir::new().expect("tempdir");
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let (wc, _) = rt
        .block_on(checkout(&remote, &pkg, None, dir.path(), &SyncOptions::default()))
        .expect("checkout");
    (dir, wc)
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn status(wc: &WorkingCopy, path: &str) -> Option<LocalStatus> {
    compute_status(wc).expect("status").files.get(path).copied()
}

// ---------------------------------------------------------------------------
// add
// ---------------------------------------------------------------------------

#[test]
fn add_tracks_untracked_file() {
    let (_dir, wc) = wc_with(&[("a", "1")]);
    fs::create_dir_all(wc.file_path("patches")).unwrap();
    fs::write(wc.file_path("patches/new.patch"), "p").unwrap();
    assert_eq!(
        compute_status(&wc).unwrap().untracked,
        vec!["patches/new.patch".to_string()]
    );

    let results = add(&wc, &names(&["patches/new.patch"])).expect("add");
    assert_eq!(results[0].action, OpAction::Added);
    assert_eq!(status(&wc, "patches/new.patch"), Some(LocalStatus::Added));
    assert!(compute_status(&wc).unwrap().untracked.is_empty());
}

#[rstest]
#[case::already_tracked("a", ErrorKind::InvalidRequest)]
#[case::nonexistent("ghost", ErrorKind::InvalidRequest)]
#[case::escapes_root("../outside", ErrorKind::InvalidRequest)]
#[case::metadata_dir(".parcel/meta.json", ErrorKind::InvalidRequest)]
fn add_rejects(#[case] path: &str, #[case] kind: ErrorKind) {
    let (_dir, wc) = wc_with(&[("a", "1")]);
    let before = wc.meta().unwrap();
    let err = add(&wc, &names(&[path])).unwrap_err();
    assert_eq!(err.kind(), kind);
    assert_eq!(wc.meta().unwrap(), before);
}

#[test]
fn one_bad_path_rejects_the_whole_batch() {
    let (_dir, wc) = wc_with(&[("a", "1")]);
    fs::write(wc.file_path("good"), "g").unwrap();
    assert!(add(&wc, &names(&["good", "ghost"])).is_err());
    assert_eq!(status(&wc, "good"), None);
}

// ---------------------------------------------------------------------------
// remove / revert
// ---------------------------------------------------------------------------

#[test]
fn remove_unmodified_deletes_file() {
    let (_dir, wc) = wc_with(&[("a", "1")]);
    let results = remove(&wc, &names(&["a"]), false).expect("remove");
    assert_eq!(results[0].action, OpAction::Removed);
    assert!(!wc.file_path("a").exists());
    assert_eq!(status(&wc, "a"), Some(LocalStatus::Deleted));
}

#[test]
fn remove_keep_local_leaves_file() {
    let (_dir, wc) = wc_with(&[("a", "1")]);
    remove(&wc, &names(&["a"]), true).expect("remove");
    assert!(wc.file_path("a").exists());
    assert_eq!(status(&wc, "a"), Some(LocalStatus::Deleted));
}

#[test]
fn remove_modified_keeps_local_content() {
    let (_dir, wc) = wc_with(&[("a", "1")]);
    fs::write(wc.file_path("a"), "edited").unwrap();
    remove(&wc, &names(&["a"]), false).expect("remove");
    assert_eq!(fs::read_to_string(wc.file_path("a")).unwrap(), "edited");
    assert_eq!(status(&wc, "a"), Some(LocalStatus::Deleted));
}

#[test]
fn remove_added_untracks() {
    let (_dir, wc) = wc_with(&[("a", "1")]);
    fs::write(wc.file_path("b"), "new").unwrap();
    add(&wc, &names(&["b"])).unwrap();
    let results = remove(&wc, &names(&["b"]), false).expect("remove");
    assert_eq!(results[0].action, OpAction::Untracked);
    assert_eq!(status(&wc, "b"), None);
    assert!(wc.file_path("b").exists());
}

#[test]
fn remove_untracked_is_not_tracked() {
    let (_dir, wc) = wc_with(&[("a", "1")]);
    let err = remove(&wc, &names(&["nope"]), false).unwrap_err();
    assert!(err.to_string().contains("not tracked"));
}

#[test]
fn add_cancels_scheduled_deletion() {
    let (_dir, wc) = wc_with(&[("a", "1")]);
    remove(&wc, &names(&["a"]), true).unwrap();
    let results = add(&wc, &names(&["a"])).expect("add");
    assert_eq!(results[0].action, OpAction::Undeleted);
    assert_eq!(status(&wc, "a"), Some(LocalStatus::Unmodified));
}

#[test]
fn revert_restores_base_content() {
    let (_dir, wc) = wc_with(&[("a", "base"), ("b", "keep"), ("c", "gone")]);
    fs::write(wc.file_path("a"), "edited").unwrap();
    remove(&wc, &names(&["b"]), false).unwrap();
    fs::remove_file(wc.file_path("c")).unwrap();

    let results = revert(&wc, &names(&["a", "b", "c"])).expect("revert");
    assert!(results.iter().all(|r| r.action == OpAction::Restored));
    assert_eq!(fs::read_to_string(wc.file_path("a")).unwrap(), "base");
    assert_eq!(fs::read_to_string(wc.file_path("b")).unwrap(), "keep");
    assert_eq!(fs::read_to_string(wc.file_path("c")).unwrap(), "gone");
    assert!(compute_status(&wc).unwrap().is_clean());
}

#[test]
fn revert_of_addition_keeps_file_untracked() {
    let (_dir, wc) = wc_with(&[("a", "1")]);
    fs::write(wc.file_path("b"), "new").unwrap();
    add(&wc, &names(&["b"])).unwrap();
    let results = revert(&wc, &names(&["b", "a"])).expect("revert");
    assert_eq!(results[0].action, OpAction::Untracked);
    assert_eq!(results[1].action, OpAction::Unchanged);
    assert_eq!(compute_status(&wc).unwrap().untracked, vec!["b".to_string()]);
}

#[test]
fn resolve_requires_conflict() {
    let (_dir, wc) = wc_with(&[("a", "1")]);
    let err = resolve(&wc, &names(&["a"])).unwrap_err();
    assert!(err.to_string().contains("not conflicted"));
}

// ---------------------------------------------------------------------------
// diff
// ---------------------------------------------------------------------------

#[test]
fn diff_shows_local_changes_only() {
    let (_dir, wc) = wc_with(&[("hello.spec", "Name: hello\nVersion: 1\n"), ("same", "x")]);
    fs::write(wc.file_path("hello.spec"), "Name: hello\nVersion: 2\n").unwrap();

    let diffs = diff(&wc, &[]).expect("diff");
    assert_eq!(diffs.len(), 1);
    let d = &diffs[0];
    assert_eq!(d.status, LocalStatus::Modified);
    assert!(d.unified_diff.contains("--- a/hello.spec\t(revision 1)"));
    assert!(d.unified_diff.contains("-Version: 1"));
    assert!(d.unified_diff.contains("+Version: 2"));
}

#[test]
fn diff_of_deleted_file_removes_every_line() {
    let (_dir, wc) = wc_with(&[("a", "one\ntwo\n")]);
    remove(&wc, &names(&["a"]), false).unwrap();
    let diffs = diff(&wc, &names(&["a"])).expect("diff");
    assert!(diffs[0].unified_diff.contains("-one"));
    assert!(diffs[0].unified_diff.contains("-two"));
}

// ---------------------------------------------------------------------------
// cleanup
// ---------------------------------------------------------------------------

#[test]
fn cleanup_breaks_stale_lock_and_removes_temp_files() {
    let (_dir, wc) = wc_with(&[("a", "1")]);
    let mut holder = LockHolder::current("update");
    holder.pid = i32::MAX as u32 - 1;
    fs::write(
        paths::lock_path(wc.root()),
        serde_json::to_string(&holder).unwrap(),
    )
    .unwrap();
    fs::write(wc.file_path("a.parcel.tmp"), "half").unwrap();

    let err = add(&wc, &names(&["a"])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WorkingCopyLocked);
    assert!(err.to_string().contains("parcel cleanup"));

    let report = cleanup(&wc, false).expect("cleanup");
    assert!(report.lock_removed);
    assert_eq!(report.tmp_removed, 1);
    assert!(!paths::lock_path(wc.root()).exists());
    assert!(!wc.file_path("a.parcel.tmp").exists());
}

#[test]
fn cleanup_refuses_live_lock_without_force() {
    let (_dir, wc) = wc_with(&[("a", "1")]);
    let held = wc.lock("update").unwrap();
    let err = cleanup(&wc, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WorkingCopyLocked);
    drop(held);
    let report = cleanup(&wc, false).expect("cleanup");
    assert!(!report.lock_removed);
}

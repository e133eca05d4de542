use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;

use parcel_core::{paths, LockHolder, PackageRef};
use parcel_remote::DirRemote;
use tempfile::TempDir;

fn parcel_cmd(home: &Path, cwd: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("parcel"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1")
        .env_remove("PARCEL_REMOTE")
        .current_dir(cwd);
    cmd
}

struct Fixture {
    home: TempDir,
    server: TempDir,
    work: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let fixture = Self {
            home: TempDir::new().expect("home"),
            server: TempDir::new().expect("server"),
            work: TempDir::new().expect("work"),
        };
        DirRemote::new(fixture.server.path())
            .create_package(
                &PackageRef::new("devel:tools", "hello"),
                &[("hello.spec", "Name: hello\nVersion: 1\n"), ("README", "readme\n")],
            )
            .expect("create package");
        fixture
    }

    fn locator(&self) -> String {
        format!("file://{}", self.server.path().display())
    }

    fn cmd(&self, cwd: &Path) -> Command {
        parcel_cmd(self.home.path(), cwd)
    }

    fn checkout(&self, name: &str) -> PathBuf {
        let dest = self.work.path().join(name);
        self.cmd(self.work.path())
            .args(["checkout", "devel:tools", "hello"])
            .arg(&dest)
            .args(["--remote", &self.locator()])
            .assert()
            .success()
            .stdout(contains("Checked out"));
        dest
    }
}

#[test]
fn checkout_edit_commit_round_trip() {
    let fx = Fixture::new();
    let wc = fx.checkout("hello");
    assert_eq!(
        fs::read_to_string(wc.join("hello.spec")).expect("read"),
        "Name: hello\nVersion: 1\n"
    );

    fx.cmd(&wc)
        .arg("status")
        .assert()
        .success()
        .stdout(contains("Nothing changed."));

    fs::write(wc.join("hello.spec"), "Name: hello\nVersion: 2\n").expect("edit");
    fx.cmd(&wc)
        .arg("st")
        .assert()
        .success()
        .stdout(contains("M  hello.spec"));
    fx.cmd(&wc)
        .arg("diff")
        .assert()
        .success()
        .stdout(contains("+Version: 2"));

    fx.cmd(&wc)
        .args(["commit", "-m", "bump version"])
        .assert()
        .success()
        .stdout(contains("Committed revision 2"));
    fx.cmd(&wc)
        .arg("commit")
        .assert()
        .success()
        .stdout(contains("Nothing to commit."));
    fx.cmd(&wc)
        .args(["info", "--json"])
        .assert()
        .success()
        .stdout(contains("\"revision\": \"2\""));
}

#[test]
fn commit_of_named_file_keeps_other_edits_local() {
    let fx = Fixture::new();
    let wc = fx.checkout("hello");
    fs::write(wc.join("hello.spec"), "Name: hello\nVersion: 2\n").expect("edit");
    fs::write(wc.join("README"), "readme v2\n").expect("edit");

    fx.cmd(&wc)
        .args(["commit", "hello.spec", "-m", "spec only"])
        .assert()
        .success()
        .stdout(contains("M  hello.spec"))
        .stdout(contains("Committed revision 2 (1 file(s), 1 uploaded)"));
    fx.cmd(&wc)
        .arg("status")
        .assert()
        .success()
        .stdout(contains("M  README"));

    let other = fx.checkout("other");
    assert_eq!(
        fs::read_to_string(other.join("hello.spec")).expect("read"),
        "Name: hello\nVersion: 2\n"
    );
    assert_eq!(fs::read_to_string(other.join("README")).expect("read"), "readme\n");

    fx.cmd(&wc)
        .args(["commit", "stray.txt"])
        .assert()
        .failure()
        .stderr(contains("stray.txt"));
}

#[test]
fn update_with_conflict_exits_nonzero_until_resolved() {
    let fx = Fixture::new();
    let alice = fx.checkout("alice");
    let bob = fx.checkout("bob");

    fs::write(alice.join("hello.spec"), "Name: hello\nVersion: 2\n").expect("edit");
    fx.cmd(&alice).arg("commit").assert().success();

    fs::write(bob.join("hello.spec"), "Name: hello\nVersion: 3\n").expect("edit");
    fx.cmd(&bob)
        .arg("commit")
        .assert()
        .failure()
        .stderr(contains("parcel update"));

    fx.cmd(&bob)
        .arg("update")
        .assert()
        .code(1)
        .stdout(contains("C  hello.spec"));
    assert!(bob.join("hello.spec.r2").exists());
    assert_eq!(
        fs::read_to_string(bob.join("hello.spec")).expect("read"),
        "Name: hello\nVersion: 3\n"
    );

    fx.cmd(&bob)
        .arg("commit")
        .assert()
        .failure()
        .stderr(contains("conflicted: hello.spec"));

    fx.cmd(&bob)
        .args(["resolve", "hello.spec"])
        .assert()
        .success()
        .stdout(contains("resolved"));
    assert!(!bob.join("hello.spec.r2").exists());
    fx.cmd(&bob)
        .args(["commit", "-m", "merge"])
        .assert()
        .success()
        .stdout(contains("Committed revision 3"));

    fx.cmd(&alice)
        .arg("up")
        .assert()
        .success()
        .stdout(contains("U  hello.spec"));
    assert_eq!(
        fs::read_to_string(alice.join("hello.spec")).expect("read"),
        "Name: hello\nVersion: 3\n"
    );
}

#[test]
fn add_and_remove_resolve_paths_from_subdirectory() {
    let fx = Fixture::new();
    let wc = fx.checkout("hello");
    let sub = wc.join("patches");
    fs::create_dir_all(&sub).expect("mkdir");
    fs::write(sub.join("fix.patch"), "patch\n").expect("write");

    fx.cmd(&sub)
        .args(["add", "fix.patch"])
        .assert()
        .success()
        .stdout(contains("patches/fix.patch"));
    fx.cmd(&sub)
        .args(["rm", "../README"])
        .assert()
        .success()
        .stdout(contains("removed"));
    assert!(!wc.join("README").exists());

    fx.cmd(&wc)
        .arg("status")
        .assert()
        .success()
        .stdout(contains("A  patches/fix.patch"))
        .stdout(contains("D  README"));

    fx.cmd(&wc)
        .args(["revert", "README"])
        .assert()
        .success();
    assert!(wc.join("README").exists());
}

#[test]
fn status_json_lists_file_states() {
    let fx = Fixture::new();
    let wc = fx.checkout("hello");
    fs::remove_file(wc.join("README")).expect("rm");
    fs::write(wc.join("stray.txt"), "x").expect("write");

    let assert = fx.cmd(&wc).args(["status", "--json"]).assert().success();
    let report: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json");
    assert_eq!(report["revision"], "1");
    assert_eq!(report["files"]["README"], "missing");
    assert_eq!(report["files"]["hello.spec"], "unmodified");
    assert_eq!(report["untracked"][0], "stray.txt");
}

#[test]
fn checkout_uses_configured_default_remote() {
    let fx = Fixture::new();
    let config_path = paths::config_path_at(fx.home.path());
    fs::create_dir_all(config_path.parent().expect("parent")).expect("mkdir");
    fs::write(
        &config_path,
        format!(
            "jobs: 2\ndefault_remote: obs\nremotes:\n  obs: {}\n",
            fx.locator()
        ),
    )
    .expect("write config");

    fx.cmd(fx.work.path())
        .args(["co", "devel:tools", "hello"])
        .assert()
        .success();
    assert!(fx.work.path().join("hello").join("hello.spec").exists());
}

#[test]
fn checkout_without_remote_fails_with_hint() {
    let fx = Fixture::new();
    fx.cmd(fx.work.path())
        .args(["checkout", "devel:tools", "hello"])
        .assert()
        .failure()
        .stderr(contains("PARCEL_REMOTE"));
}

#[test]
fn commands_outside_a_working_copy_fail() {
    let fx = Fixture::new();
    fx.cmd(fx.work.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(contains("not inside a parcel working copy"));
}

#[test]
fn stale_lock_blocks_until_cleanup() {
    let fx = Fixture::new();
    let wc = fx.checkout("hello");

    let mut holder = LockHolder::current("update");
    holder.pid = i32::MAX as u32 - 1;
    fs::write(
        paths::lock_path(&wc),
        serde_json::to_string(&holder).expect("serialize"),
    )
    .expect("write lock");

    fx.cmd(&wc)
        .arg("update")
        .assert()
        .failure()
        .stderr(contains("parcel cleanup"));
    fx.cmd(&wc)
        .arg("info")
        .assert()
        .success()
        .stdout(contains("stale"));

    fx.cmd(&wc)
        .arg("cleanup")
        .assert()
        .success()
        .stdout(contains("removed stale lock"));
    fx.cmd(&wc).arg("update").assert().success();
}

//! E2E CLI tests for the sync surface: manual two-phase sync, publish,
//! pull, pages and backup.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

fn snaplog(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("snaplog"));
    cmd.current_dir(dir);
    cmd.env("SNAPLOG_ACTOR", "ada@example.com");
    cmd.env("SNAPLOG_LOG", "error");
    cmd.env_remove("SNAPLOG_ARCHIVE_DIR");
    cmd.env_remove("EMAIL");
    cmd
}

fn init_project(dir: &Path, archive: Option<&Path>) {
    let mut cmd = snaplog(dir);
    cmd.arg("init");
    if let Some(archive) = archive {
        cmd.arg("--archive-dir").arg(archive);
    }
    cmd.assert().success();
}

fn json_output(dir: &Path, args: &[&str]) -> Value {
    let output = snaplog(dir)
        .args(args)
        .arg("--json")
        .output()
        .expect("command should not crash");
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("--json should produce valid JSON")
}

fn add_title(dir: &Path, title: &str) {
    let payload = json!({"post": {"title": title}}).to_string();
    snaplog(dir).args(["add-event", &payload]).assert().success();
}

fn pending_ids(dir: &Path) -> Vec<u64> {
    json_output(dir, &["events"])
        .as_array()
        .expect("array")
        .iter()
        .map(|e| e["id"].as_u64().expect("id"))
        .collect()
}

// ---------------------------------------------------------------------------
// Manual two-phase sync
// ---------------------------------------------------------------------------

#[test]
fn start_then_finish_purges_the_token_artifacts() {
    let dir = TempDir::new().unwrap();
    init_project(dir.path(), None);
    add_title(dir.path(), "A");
    add_title(dir.path(), "B");

    let started = json_output(dir.path(), &["sync", "start"]);
    let token = started["token"].as_str().expect("token").to_string();
    assert!(token.ends_with("snap.json"));
    assert!(token.contains("events/"));

    // A new event after start is not covered by the token.
    add_title(dir.path(), "C");

    let finished = json_output(dir.path(), &["sync", "finish", &token]);
    assert_eq!(finished["events_purged"], 2);
    assert_eq!(pending_ids(dir.path()), vec![3]);

    // Replaying the completed token is a no-op success.
    let replay = json_output(dir.path(), &["sync", "finish", &token]);
    assert_eq!(replay["already_completed"], true);
    assert_eq!(pending_ids(dir.path()), vec![3]);
}

#[test]
fn second_start_conflicts_until_aborted() {
    let dir = TempDir::new().unwrap();
    init_project(dir.path(), None);
    add_title(dir.path(), "A");

    let token = json_output(dir.path(), &["sync", "start"])["token"]
        .as_str()
        .expect("token")
        .to_string();

    snaplog(dir.path())
        .args(["sync", "start"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E3001"));

    let aborted = json_output(dir.path(), &["sync", "abort", &token]);
    assert_eq!(aborted["released"], true);
    snaplog(dir.path()).args(["sync", "start"]).assert().success();
}

#[test]
fn wrong_token_leaves_everything_pending() {
    let dir = TempDir::new().unwrap();
    init_project(dir.path(), None);
    add_title(dir.path(), "A");
    snaplog(dir.path()).args(["sync", "start"]).assert().success();

    snaplog(dir.path())
        .args(["sync", "finish", "events/1_1-1_1.json.gz snap.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E3002"));
    assert_eq!(pending_ids(dir.path()), vec![1]);

    // The mismatch invalidated the outstanding token.
    snaplog(dir.path()).args(["sync", "start"]).assert().success();
}

// ---------------------------------------------------------------------------
// Publish / pull
// ---------------------------------------------------------------------------

#[test]
fn publish_archives_and_pages_lists_the_result() {
    let dir = TempDir::new().unwrap();
    init_project(dir.path(), None);
    add_title(dir.path(), "A");
    add_title(dir.path(), "B");
    std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
    snaplog(dir.path()).args(["add-file", "a.txt"]).assert().success();

    let report = json_output(dir.path(), &["publish"]);
    assert_eq!(report["files_uploaded"], 1);
    assert_eq!(report["last_applied_event_id"], 2);

    let archive = dir.path().join(".snaplog/archive");
    assert!(archive.join("snap.json").is_file());
    assert_eq!(std::fs::read_to_string(archive.join("files/a.txt")).unwrap(), "hello");
    assert!(pending_ids(dir.path()).is_empty());

    let pages = json_output(dir.path(), &["pages"]);
    let pages = pages.as_array().expect("array");
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0]["first_id"], 1);
    assert_eq!(pages[0]["last_id"], 2);

    let name = pages[0]["name"].as_str().expect("name");
    let events = json_output(dir.path(), &["pages", "--show", name]);
    assert_eq!(events.as_array().expect("array").len(), 2);

    // The snapshot survives the purge.
    let snap = json_output(dir.path(), &["snapshot"]);
    assert_eq!(snap, json!({"post": {"title": "B"}}));
}

#[test]
fn publish_indexes_files_and_verifies_pages() {
    let dir = TempDir::new().unwrap();
    init_project(dir.path(), None);
    add_title(dir.path(), "A");
    std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
    snaplog(dir.path()).args(["add-file", "a.txt"]).assert().success();
    snaplog(dir.path()).arg("publish").assert().success();

    let archive = dir.path().join(".snaplog/archive");
    assert!(archive.join("files.json").is_file());

    let files = json_output(dir.path(), &["files"]);
    let files = files.as_array().expect("array");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["name"], "a.txt");
    assert_eq!(files[0]["size"], 5);
    assert_eq!(files[0]["actor"], "ada@example.com");

    let status = json_output(dir.path(), &["status"]);
    assert_eq!(status["archived_files"], 1);

    let pages = json_output(dir.path(), &["pages"]);
    let name = pages[0]["name"].as_str().expect("name").to_string();
    let manifest = archive.join(format!("events/{name}.manifest.json"));
    assert!(manifest.is_file());

    // A manifest describing other content makes the page unreadable.
    let mut doctored: Value =
        serde_json::from_str(&std::fs::read_to_string(&manifest).unwrap()).unwrap();
    doctored["event_count"] = json!(7);
    std::fs::write(&manifest, doctored.to_string()).unwrap();
    snaplog(dir.path())
        .args(["pages", "--show", &name])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2003"));
}

#[test]
fn publish_with_nothing_pending_still_succeeds() {
    let dir = TempDir::new().unwrap();
    init_project(dir.path(), None);

    snaplog(dir.path())
        .arg("publish")
        .assert()
        .success()
        .stdout(predicate::str::contains("no pending events"));
}

#[test]
fn second_store_cold_starts_from_a_shared_archive() {
    let shared = TempDir::new().unwrap();
    let archive = shared.path().join("archive");
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    init_project(first.path(), Some(&archive));
    init_project(second.path(), Some(&archive));

    add_title(first.path(), "A");
    add_title(first.path(), "B");
    snaplog(first.path()).arg("publish").assert().success();

    let pulled = json_output(second.path(), &["pull"]);
    assert_eq!(pulled["found"], true);
    assert_eq!(pulled["last_applied_event_id"], 2);

    let snap = json_output(second.path(), &["snapshot"]);
    assert_eq!(snap, json!({"post": {"title": "B"}}));

    // Ids continue after the archived checkpoint.
    let event = json_output(
        second.path(),
        &["add-event", r#"{"user": {"name": "X"}}"#],
    );
    assert_eq!(event["id"], 3);
}

#[test]
fn pull_without_checkpoint_reports_nothing_found() {
    let dir = TempDir::new().unwrap();
    init_project(dir.path(), None);

    let pulled = json_output(dir.path(), &["pull"]);
    assert_eq!(pulled["found"], false);
}

// ---------------------------------------------------------------------------
// Backup
// ---------------------------------------------------------------------------

#[test]
fn first_backup_is_full_then_nothing_is_due() {
    let dir = TempDir::new().unwrap();
    init_project(dir.path(), None);
    add_title(dir.path(), "A");

    let first = json_output(dir.path(), &["backup"]);
    assert_eq!(first["kind"], "full");
    assert_eq!(first["sent"], true);
    assert_eq!(first["events"], 1);

    let outbox = dir.path().join(".snaplog/outbox");
    let attachments = std::fs::read_dir(&outbox)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".json.gz"))
        .count();
    assert_eq!(attachments, 1);

    let second = json_output(dir.path(), &["backup"]);
    assert_eq!(second["kind"], Value::Null);
}

#[test]
fn completions_render_for_bash() {
    let dir = TempDir::new().unwrap();
    snaplog(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("snaplog"));
}

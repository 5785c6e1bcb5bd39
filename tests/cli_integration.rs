//! Integration tests for the canopy binary.
//!
//! Each test lays out a directory tree, runs one command against it with
//! `--root`, and checks the printed tree, the disk, and the exit code.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Fixtures
// =============================================================================

/// A workspace root holding project `app` with `src/main.txt` and `notes.txt`.
fn fixture() -> TempDir {
    let dir = TempDir::new().expect("failed to create temp dir");
    fs::create_dir_all(dir.path().join("app/src")).unwrap();
    fs::write(dir.path().join("app/src/main.txt"), "main").unwrap();
    fs::write(dir.path().join("app/notes.txt"), "notes").unwrap();
    dir
}

fn canopy(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("canopy").unwrap();
    cmd.arg("--root").arg(root);
    cmd
}

// =============================================================================
// Reading
// =============================================================================

#[test]
fn tree_lists_projects_from_disk() {
    let dir = fixture();
    canopy(dir.path())
        .arg("tree")
        .assert()
        .success()
        .stdout(predicate::str::contains("app/"))
        .stdout(predicate::str::contains("    src/"))
        .stdout(predicate::str::contains("      main.txt"))
        .stdout(predicate::str::contains(".canopy").not());
}

#[test]
fn tree_json_has_one_entry_per_resource() {
    let dir = fixture();
    let output = canopy(dir.path())
        .args(["--json", "tree", "/app"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let paths: Vec<&str> = entries
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["path"].as_str())
        .collect();
    assert_eq!(
        paths,
        vec!["/app", "/app/notes.txt", "/app/src", "/app/src/main.txt"]
    );
}

#[test]
fn unknown_path_fails() {
    let dir = fixture();
    canopy(dir.path())
        .args(["tree", "/nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no resource at /nope"));
}

// =============================================================================
// Mutations
// =============================================================================

#[test]
fn rm_deletes_from_disk() {
    let dir = fixture();
    canopy(dir.path())
        .args(["rm", "/app/src"])
        .assert()
        .success()
        .stdout(predicate::str::contains("notes.txt"))
        .stdout(predicate::str::contains("src/").not());
    assert!(!dir.path().join("app/src").exists());
    assert!(dir.path().join("app/notes.txt").exists());
}

#[test]
fn rm_of_missing_resource_exits_with_one() {
    let dir = fixture();
    canopy(dir.path())
        .args(["rm", "/app/ghost.txt"])
        .assert()
        .code(1);
}

#[test]
fn mv_renames_on_disk() {
    let dir = fixture();
    canopy(dir.path())
        .args(["mv", "/app/notes.txt", "/app/src/notes.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("      notes.txt"));
    assert!(!dir.path().join("app/notes.txt").exists());
    assert_eq!(
        fs::read_to_string(dir.path().join("app/src/notes.txt")).unwrap(),
        "notes"
    );
}

#[test]
fn mv_onto_existing_resource_is_refused() {
    let dir = fixture();
    canopy(dir.path())
        .args(["mv", "/app/notes.txt", "/app/src/main.txt"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error:"));
    assert_eq!(
        fs::read_to_string(dir.path().join("app/src/main.txt")).unwrap(),
        "main"
    );
}

#[test]
fn copy_duplicates_a_folder() {
    let dir = fixture();
    canopy(dir.path())
        .args(["copy", "/app/src", "/app/backup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("backup/"));
    assert_eq!(
        fs::read_to_string(dir.path().join("app/backup/main.txt")).unwrap(),
        "main"
    );
}

#[test]
fn link_shows_its_target() {
    let dir = fixture();
    let outside = TempDir::new().unwrap();
    fs::write(outside.path().join("shared.txt"), "shared").unwrap();
    let target = outside.path().to_str().unwrap();

    canopy(dir.path())
        .args(["link", "/app/ext", target])
        .assert()
        .success()
        .stdout(predicate::str::contains("ext/ ->"))
        .stdout(predicate::str::contains("[linked]"))
        .stdout(predicate::str::contains("shared.txt"));
}

#[test]
fn link_to_missing_target_needs_allow_missing() {
    let dir = fixture();
    let missing = dir.path().join("nowhere");
    let target = missing.to_str().unwrap();

    canopy(dir.path())
        .args(["link", "/app/ext", target])
        .assert()
        .code(1);
    canopy(dir.path())
        .args(["link", "--allow-missing", "/app/ext", target])
        .assert()
        .success()
        .stdout(predicate::str::contains("missing"));
}

#[test]
fn link_replace_overwrites_a_folder() {
    let dir = fixture();
    let outside = TempDir::new().unwrap();
    fs::write(outside.path().join("shared.txt"), "shared").unwrap();
    let target = outside.path().to_str().unwrap();

    canopy(dir.path())
        .args(["link", "/app/src", target])
        .assert()
        .code(1);
    canopy(dir.path())
        .args(["link", "--replace", "/app/src", target])
        .assert()
        .success()
        .stdout(predicate::str::contains("src/ ->"))
        .stdout(predicate::str::contains("shared.txt"));
    assert!(dir.path().join("app/src/main.txt").exists());
}

#[test]
fn touch_succeeds_on_existing_file() {
    let dir = fixture();
    canopy(dir.path())
        .args(["touch", "/app/notes.txt"])
        .assert()
        .success();
}

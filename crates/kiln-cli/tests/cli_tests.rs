//! End-to-end tests of the `kiln` binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn kiln() -> Command {
    Command::cargo_bin("kiln").unwrap()
}

#[test]
fn test_build_with_no_builders_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("web")).unwrap();
    std::fs::write(dir.path().join("web/a.txt"), "a").unwrap();

    kiln().current_dir(dir.path()).arg("build").assert().success();

    // The asset graph was persisted even with zero phases.
    assert!(dir.path().join(".kiln/asset_graph.json").exists());
}

#[test]
fn test_rebuild_reuses_state() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "a").unwrap();

    kiln().current_dir(dir.path()).arg("build").assert().success();
    kiln().current_dir(dir.path()).arg("build").assert().success();
}

#[test]
fn test_clean_removes_state() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "a").unwrap();

    kiln().current_dir(dir.path()).arg("build").assert().success();
    assert!(dir.path().join(".kiln").exists());

    kiln().current_dir(dir.path()).arg("clean").assert().success();
    assert!(!dir.path().join(".kiln").exists());

    // Cleaning twice is fine.
    kiln().current_dir(dir.path()).arg("clean").assert().success();
}

#[test]
fn test_invalid_build_filter_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();

    kiln()
        .current_dir(dir.path())
        .args(["build", "--build-filter", "|"])
        .assert()
        .code(2);
}

#[test]
fn test_output_materializes_tree() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("web")).unwrap();
    std::fs::write(dir.path().join("web/a.txt"), "a").unwrap();

    kiln()
        .current_dir(dir.path())
        .args(["build", "--output", "out"])
        .assert()
        .success();

    let copied = dir.path().join("out/web/a.txt");
    assert!(copied.exists());
    assert_eq!(std::fs::read_to_string(copied).unwrap(), "a");
}

#[test]
fn test_unknown_subcommand_fails_usage() {
    kiln()
        .arg("frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage").or(predicate::str::contains("error")));
}

#[test]
fn test_version_flag() {
    kiln()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("kiln"));
}

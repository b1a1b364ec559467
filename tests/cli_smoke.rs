//! Smoke tests for the archivist CLI binary.
//! Every command runs against a throwaway project directory with remote storage disabled.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cli_bin() -> Command {
    Command::cargo_bin("archivist").expect("binary should build")
}

/// Command rooted in an empty project with uploads disabled
fn in_project(project: &TempDir) -> Command {
    let mut cmd = cli_bin();
    cmd.current_dir(project.path())
        .env("PROJECT_ROOT", project.path())
        .env("BACKUP_ROOT", project.path().join("backups"))
        .env("BACKUP_REMOTE_PROVIDER", "none")
        .env("DROPBOX_ACCESS_TOKEN", "sl.secret-token")
        .env_remove("SENTRY_DSN");
    cmd
}

#[test]
fn prints_help() {
    let mut cmd = cli_bin();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("backup"));
}

#[test]
fn prints_version() {
    let mut cmd = cli_bin();
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("archivist"));
}

#[test]
fn rejects_unknown_command() {
    let mut cmd = cli_bin();
    cmd.arg("not-a-real-command");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn lists_no_local_backups_in_a_fresh_project() {
    let project = tempfile::tempdir().unwrap();
    in_project(&project)
        .args(["backup", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"backups\": []"));
}

#[test]
fn restore_rejects_paths() {
    let project = tempfile::tempdir().unwrap();
    in_project(&project)
        .args(["backup", "restore", "../full_backup_1.zip"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid file name"))
        .stderr(predicate::str::contains("400"));
}

#[test]
fn download_of_unknown_archive_is_not_found() {
    let project = tempfile::tempdir().unwrap();
    in_project(&project)
        .args(["backup", "download", "full_backup_19990101_000000.zip"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("404"));
}

#[test]
fn restore_remote_rejects_unknown_scope() {
    let project = tempfile::tempdir().unwrap();
    in_project(&project)
        .args(["backup", "restore-remote", "full_backup_1.zip", "--type", "partial"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("partial"));
}

#[test]
fn config_show_masks_the_dropbox_token() {
    let project = tempfile::tempdir().unwrap();
    in_project(&project)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[scheduler]"))
        .stdout(predicate::str::contains("America/La_Paz"))
        .stdout(predicate::str::contains("sl.secret-token").not());
}

#[test]
fn status_reports_a_stopped_daemon() {
    let project = tempfile::tempdir().unwrap();
    in_project(&project)
        .env("ARCHIVIST_PID_FILE", project.path().join("archivist.pid"))
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"stopped\""));
}

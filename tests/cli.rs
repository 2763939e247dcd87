//! CLI surface tests for the `kitd` binary.

use assert_cmd::Command;
use predicates::str::contains;

fn bin() -> Command {
    let path = assert_cmd::cargo::cargo_bin!("kitd");
    Command::new(path)
}

#[test]
fn help_lists_subcommands() {
    bin()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("daemon"))
        .stdout(contains("config"));
}

#[test]
fn version_prints() {
    bin().arg("--version").assert().success();
}

#[test]
fn config_path_points_at_the_document() {
    bin()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(contains("config.json"));
}

#[test]
fn unknown_subcommand_fails() {
    bin().arg("teleport").assert().failure();
}

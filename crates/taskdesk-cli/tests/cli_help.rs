use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("taskdesk")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("login"))
        .stdout(predicate::str::contains("verify-otp"))
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("client-id"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_settings_help_shows_flags() {
    cargo_bin_cmd!("taskdesk")
        .args(["settings", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--notify-email"))
        .stdout(predicate::str::contains("--notify-in-app"));
}

#[test]
fn test_missing_subcommand_fails() {
    cargo_bin_cmd!("taskdesk").assert().failure();
}

//! Integration tests for the `slb` CLI binary: help/version surface and
//! error behavior when no daemon is reachable. Commands that actually
//! round-trip through a running daemon are exercised in `slb-daemon`'s
//! own test suite instead of forking a real daemon process here.

use assert_cmd::Command;
use predicates::str::contains;

fn slb() -> Command {
    Command::cargo_bin("slb").expect("binary `slb` should be built")
}

#[test]
fn help_flag_prints_usage() {
    slb().arg("--help").assert().success().stdout(contains("Command notary client")).stdout(contains("request")).stdout(contains("review"));
}

#[test]
fn version_flag_prints_version() {
    slb().arg("--version").assert().success().stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn ping_against_a_project_with_no_daemon_fails_with_connect_error() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    slb().args(["--project", &tmp.path().to_string_lossy(), "ping"]).assert().failure().stderr(contains("connecting to daemon socket"));
}

#[test]
fn request_requires_a_risk_tier() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    slb()
        .args([
            "--project",
            &tmp.path().to_string_lossy(),
            "request",
            "rm -rf /tmp/x",
            "--session",
            "00000000-0000-0000-0000-000000000001",
            "--agent",
            "claude",
            "--model",
            "opus-4",
            "--reason",
            "cleanup",
        ])
        .assert()
        .failure()
        .stderr(contains("tier"));
}

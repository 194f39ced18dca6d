//! Integration tests for the `dashsync` binary.
//!
//! Argument parsing, config commands and exit codes, plus `request` against
//! a wiremock server. Nothing touches the user's real configuration.
#![allow(clippy::unwrap_used)]

use std::io::Write;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

fn dashsync_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("dashsync");
    cmd.env("HOME", "/tmp/dashsync-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/dashsync-cli-test-nonexistent")
        .env_remove("DASHSYNC_TOKEN")
        .env_remove("DASHSYNC_CONFIG")
        .env_remove("DASHSYNC_BASE_URL")
        .env_remove("DASHSYNC_RETRIES")
        .env_remove("DASHSYNC_TIMEOUT_MS")
        .env_remove("API_BASE_URL")
        .env_remove("RUST_LOG");
    cmd
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

/// Run the binary off the runtime so the mock server keeps serving.
async fn run(cmd: assert_cmd::Command) -> std::process::Output {
    let mut cmd = cmd;
    tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = dashsync_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    dashsync_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("request")
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    dashsync_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dashsync"));
}

// ── Config commands ─────────────────────────────────────────────────

#[test]
fn test_config_path_honors_flag() {
    dashsync_cmd()
        .args(["config", "path", "--config", "/tmp/somewhere/dashsync.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/somewhere/dashsync.toml"));
}

#[test]
fn test_config_show_layers_file_env_and_flags() {
    let file = config_file("base_url = \"https://file.example.com\"\nretries = 4\n");

    dashsync_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(file.path())
        .args(["--timeout", "1500"])
        .env("DASHSYNC_TOKEN", "secret-token")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("base_url = \"https://file.example.com\"")
                .and(predicate::str::contains("retries = 4"))
                .and(predicate::str::contains("timeout_ms = 1500"))
                .and(predicate::str::contains("token: set"))
                .and(predicate::str::contains("secret-token").not()),
        );
}

#[test]
fn test_api_base_url_env_wins_over_file() {
    let file = config_file("base_url = \"https://file.example.com\"\n");

    dashsync_cmd()
        .args(["config", "show"])
        .arg("--config")
        .arg(file.path())
        .env("API_BASE_URL", "http://env.example.com:9000")
        .assert()
        .success()
        .stdout(predicate::str::contains("http://env.example.com:9000"));
}

#[test]
fn test_invalid_config_exits_with_config_code() {
    let file = config_file("timeout_ms = 0\n");

    dashsync_cmd()
        .args(["config", "show"])
        .arg("--config")
        .arg(file.path())
        .assert()
        .code(10)
        .stderr(predicate::str::contains("timeout_ms"));
}

// ── Request ─────────────────────────────────────────────────────────

#[test]
fn test_request_rejects_bad_body() {
    dashsync_cmd()
        .args(["request", "post", "/reports", "--body", "{not json"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("body"));
}

#[test]
fn test_request_unreachable_exits_with_network_code() {
    dashsync_cmd()
        .args(["request", "get", "/reports"])
        .args(["--base-url", "http://127.0.0.1:1", "--retries", "0"])
        .assert()
        .code(7);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_prints_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/reports"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "items": [1, 2] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut cmd = dashsync_cmd();
    cmd.args(["request", "GET", "/reports", "-o", "json-compact"])
        .args(["--base-url", &server.uri()])
        .env("DASHSYNC_TOKEN", "tok-1");
    let output = run(cmd).await;

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        r#"{"items":[1,2]}"#
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_failure_kinds_map_to_exit_codes() {
    let server = MockServer::start().await;
    Mock::given(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "detail": "no such report"
        })))
        .mount(&server)
        .await;
    Mock::given(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let mut cmd = dashsync_cmd();
    cmd.args(["request", "get", "/missing", "--base-url", &server.uri()]);
    let output = run(cmd).await;
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no such report"));

    let mut cmd = dashsync_cmd();
    cmd.args(["request", "get", "/broken", "--retries", "0"])
        .args(["--base-url", &server.uri()]);
    let output = run(cmd).await;
    assert_eq!(output.status.code(), Some(5));
}

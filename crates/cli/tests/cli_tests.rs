//! CLI integration tests

use std::process::{Command, Output};

/// Run `flowctl` isolated from the user's config and environment
fn flowctl(args: &[&str]) -> Output {
    let config_home = tempfile::tempdir().expect("Failed to create temp dir");
    Command::new(env!("CARGO_BIN_EXE_flowctl"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("FLOWCTL_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = flowctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Flow Aggregator"), "Should show app name");
    assert!(stdout.contains("flows"), "Should show flows command");
    assert!(stdout.contains("hints"), "Should show hints command");
    assert!(stdout.contains("status"), "Should show status command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = flowctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("flowctl"), "Should show binary name");
}

/// Test flows list subcommand help
#[test]
fn test_flows_list_help() {
    let output = flowctl(&["flows", "list", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Flows list help should succeed");
    assert!(stdout.contains("--dest-namespace"), "Should show filter options");
    assert!(stdout.contains("--interval"), "Should show interval option");
    assert!(stdout.contains("--page-size"), "Should show page size option");
    assert!(stdout.contains("--sort"), "Should show sort option");
}

/// Test flows watch subcommand help
#[test]
fn test_flows_watch_help() {
    let output = flowctl(&["flows", "watch", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Flows watch help should succeed");
    assert!(stdout.contains("--since"), "Should show since option");
    assert!(stdout.contains("--fuzzy"), "Should show fuzzy option");
}

/// Test hints rejects unknown fields
#[test]
fn test_hints_rejects_unknown_field() {
    let output = flowctl(&["hints", "pod-color"]);
    assert!(!output.status.success(), "Unknown hint field should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("dest-namespace"), "Should list valid fields");
}

/// Test flows list against a mock aggregator
#[test]
fn test_flows_list_json_output() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/v1/flows")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "time_range": {"low": -3600, "high": 0},
            "aggregation_interval": 60,
            "filter": {"dest_namespaces": [{"value": "shop", "type": "exact"}]}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"flows": [{"id": "9c1e", "flow": {"key": {"source_name": "web",
               "dest_name": "cart", "dest_namespace": "shop", "proto": "tcp",
               "reporter": "src", "action": "allow"}, "start_time": 60,
               "end_time": 120, "packets_in": 7}}],
               "total": 1, "page": 1, "total_pages": 1}"#,
        )
        .create();

    let url = server.url();
    let output = flowctl(&[
        "--api-url",
        &url,
        "--format",
        "json",
        "flows",
        "list",
        "--since",
        "1h",
        "--interval",
        "60",
        "--dest-namespace",
        "shop",
    ]);

    mock.assert();
    assert!(output.status.success(), "Flows list should succeed");
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["flows"][0]["flow"]["packets_in"], 7);
}

/// Test API errors surface as a failed exit
#[test]
fn test_api_error_exit_code() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/v1/flows")
        .with_status(400)
        .with_body(r#"{"error": "invalid aggregation interval: 20s", "code": "invalid_interval"}"#)
        .create();

    let url = server.url();
    let output = flowctl(&["--api-url", &url, "flows", "list", "--interval", "20"]);

    assert!(!output.status.success(), "API error should fail the command");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid_interval"));
}

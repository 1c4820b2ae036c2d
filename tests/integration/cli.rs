//! Command line behaviour of the binary

use assert_cmd::Command;
use serde_json::{json, Value};
use tempfile::TempDir;

fn bin() -> Command {
    let mut cmd = Command::cargo_bin("loginsight-export").unwrap();
    cmd.env_remove("LOGINSIGHT_USERNAME")
        .env_remove("LOGINSIGHT_PASSWORD")
        .env_remove("LOGINSIGHT_SESSION")
        .env_remove("NETRC")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let output = bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for sub in ["export", "plan", "verify", "convert"] {
        assert!(stdout.contains(sub), "help should mention {sub}");
    }
}

#[test]
fn test_maximum_above_limit_is_usage_error() {
    bin()
        .args(["plan", "https://li.example.com", "--start", "0", "--end", "10", "--max", "20001"])
        .assert()
        .code(2);
}

#[test]
fn test_inverted_range_is_usage_error() {
    bin()
        .args(["plan", "https://li.example.com", "--start", "2017-01-02", "--end", "2017-01-01"])
        .assert()
        .code(2);
}

#[test]
fn test_username_without_password_is_usage_error() {
    let temp = TempDir::new().unwrap();
    let netrc = temp.path().join("netrc");
    std::fs::write(&netrc, "machine other.example.com login admin password elsewhere\n").unwrap();
    let out = temp.path().join("out");
    bin()
        .args(["export", "https://li.example.com", "--start", "0", "--end", "10"])
        .args(["--username", "admin", "--no-prompt", "--netrc"])
        .arg(&netrc)
        .arg("-o")
        .arg(&out)
        .assert()
        .code(2);
    assert!(!out.exists());
}

#[test]
fn test_missing_netrc_file_is_usage_error() {
    let temp = TempDir::new().unwrap();
    bin()
        .args(["plan", "https://li.example.com", "--start", "0", "--end", "10"])
        .args(["--username", "admin", "--no-prompt", "--netrc"])
        .arg(temp.path().join("absent"))
        .assert()
        .code(2);
}

#[test]
fn test_insecure_conflicts_with_ca_cert() {
    bin()
        .args(["plan", "https://li.example.com", "--start", "0", "--end", "10"])
        .args(["--insecure", "--ca-cert", "server.pem"])
        .assert()
        .code(2);
}

#[test]
fn test_convert_writes_ingestion_files() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("output.0");
    let messages: Vec<Value> = (0..5)
        .map(|i| {
            json!({
                "text": format!("message {i}"),
                "timestamp": 1485910595153i64 + i,
                "fields": [
                    {"internalName": "event_type", "value": "v4_957c3660"},
                    {"internalName": "hostname", "displayName": "hostname", "value": "10.16.254.56"}
                ]
            })
        })
        .collect();
    let document = json!({"from": 0, "to": 5, "hasMoreResults": false, "messages": messages});
    std::fs::write(&input, document.to_string()).unwrap();
    let out = temp.path().join("converted");
    std::fs::create_dir(&out).unwrap();

    bin()
        .args(["convert", "--max-length", "2", "-o"])
        .arg(&out)
        .arg(&input)
        .assert()
        .success();

    let mut names: Vec<String> = std::fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["output.0-0.json", "output.0-1.json", "output.0-2.json"]);

    let body: Value =
        serde_json::from_slice(&std::fs::read(out.join("output.0-0.json")).unwrap()).unwrap();
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["fields"], json!([{"name": "hostname", "content": "10.16.254.56"}]));
}

#[test]
fn test_convert_requires_existing_directory() {
    let temp = TempDir::new().unwrap();
    bin()
        .args(["convert", "-o"])
        .arg(temp.path().join("absent"))
        .arg(temp.path().join("output.0"))
        .assert()
        .code(2);
}

//! The export subcommand end to end against a scripted server

use clap::Parser;
use loginsight_export::cli::{Cli, CliError, Commands};
use loginsight_export::downloader::config::LOCK_FILE_NAME;
use loginsight_export::shutdown::ShutdownCoordinator;
use loginsight_export::PlanError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::scripted_server::{serve, Canned, CHART};

fn reachable() -> Vec<Canned> {
    vec![
        Canned {
            status: "302 Found",
            headers: vec![("Location", "/login")],
            body: String::new(),
        },
        Canned::ok(r#"{"version":"8.1.0-12345"}"#),
    ]
}

async fn run_export(base: &str, netrc: &Path, output: &Path) -> Result<(), CliError> {
    let cli = Cli::try_parse_from([
        "loginsight-export",
        "-q",
        "export",
        base,
        "--start",
        "0",
        "--end",
        "999",
        "--no-prompt",
        "--netrc",
        netrc.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
    ])
    .unwrap();
    let Commands::Export(args) = &cli.command else {
        panic!("expected export");
    };
    args.execute(&cli, ShutdownCoordinator::shared()).await
}

fn empty_netrc(temp: &TempDir) -> PathBuf {
    let path = temp.path().join("netrc");
    std::fs::write(&path, "").unwrap();
    path
}

#[tokio::test]
async fn test_empty_plan_leaves_no_output_directory() {
    let mut responses = reachable();
    responses.push(Canned::ok(
        r#"{"groupByHeaders":[{"isTime":true,"internalName":"timestamp"}],"rows":[]}"#,
    ));
    let (base, seen) = serve(responses).await;
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out");

    let result = run_export(&base, &empty_netrc(&temp), &output).await;
    assert!(matches!(result, Err(CliError::PlanError(PlanError::EmptyResult))));
    assert!(!output.exists());
    assert!(seen.lock().unwrap()[1].starts_with("GET /api/v1/version"));
}

#[tokio::test]
async fn test_foreign_files_stop_before_lock() {
    let mut responses = reachable();
    responses.push(Canned::ok(CHART));
    let (base, _) = serve(responses).await;
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out");
    std::fs::create_dir(&output).unwrap();
    std::fs::write(output.join("output.777"), "{}").unwrap();

    let result = run_export(&base, &empty_netrc(&temp), &output).await;
    match result {
        Err(CliError::PlanError(PlanError::ForeignFiles { files, .. })) => {
            assert_eq!(files, vec!["output.777".to_string()]);
        }
        other => panic!("expected foreign files, got {other:?}"),
    }
    assert!(!output.join(LOCK_FILE_NAME).exists());
}

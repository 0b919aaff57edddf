// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Command-level tests over real configuration files.

use std::path::Path;

use clap::Parser;
use harvest_bin::cli::Cli;
use harvest_bin::commands;
use tempfile::TempDir;

const PLANT: &str = r#"
[collector]
period = "500ms"

[opcua]
endpoint = "opc.tcp://plc.local:4840"
mode = "streaming"

[[opcua.nodes]]
ns = 2
id = "Temp"
label = "boiler.temp"
"#;

const INSECURE: &str = r#"
[opcua]
endpoint = "opc.tcp://plc.local:4840"
username = "operator"
password = "secret"

[[opcua.nodes]]
ns = 2
id = "Temp"
"#;

fn write(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path.display().to_string()
}

fn cli(config: &str, args: &[&str]) -> Cli {
    let mut argv = vec!["harvest", "-c", config];
    argv.extend_from_slice(args);
    Cli::parse_from(argv)
}

#[tokio::test]
async fn test_validate_accepts_plant_config() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "plant.toml", PLANT);

    commands::execute(cli(&path, &["validate", "--strict"]))
        .await
        .unwrap();
    commands::execute(cli(&path, &["validate", "-f", "json", "--show-config"]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_validate_strict_fails_on_warnings() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "insecure.toml", INSECURE);

    commands::execute(cli(&path, &["validate"])).await.unwrap();
    let err = commands::execute(cli(&path, &["validate", "--strict"]))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("1 warning"));
}

#[tokio::test]
async fn test_validate_missing_file() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.yaml");
    assert!(!Path::new(&missing).exists());

    let err = commands::execute(cli(&missing.display().to_string(), &["validate"]))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn test_run_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "broken.toml",
        "[opcua]\nendpoint = \"http://plc.local\"\n\n[[opcua.nodes]]\nid = \"ns=2;s=Temp\"\n",
    );

    let err = commands::execute(cli(&path, &["run", "--max-triggers", "1"]))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn test_version() {
    commands::execute(Cli::parse_from(["harvest", "version"]))
        .await
        .unwrap();
}

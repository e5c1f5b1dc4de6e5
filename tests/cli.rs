mod common;

use std::fs;

use assert_cmd::Command;
use common::TestWorkspace;
use predicates::str::contains;

fn bin() -> Command {
    Command::cargo_bin("tall-ingester").expect("binary exists")
}

#[test]
fn catalog_lists_tables_and_fields() {
    let workspace = TestWorkspace::new();
    let config = workspace.write_config(2000);

    bin()
        .args(["catalog", "--config", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("dataGap\t11"))
        .stdout(contains("dataHeader\t8"));

    bin()
        .args([
            "catalog",
            "--config",
            config.to_str().unwrap(),
            "--table",
            "dataGap",
        ])
        .assert()
        .success()
        .stdout(contains("SeqNo\tinteger\tinteger"))
        .stdout(contains("Canopy\tbit\tbit"));
}

#[test]
fn validate_writes_aligned_csv_without_touching_database() {
    let workspace = TestWorkspace::new();
    let config = workspace.write_config(2000);
    let input = workspace.write_data(
        "dataGap",
        "RecKey,PrimaryKey,SeqNo,Canopy,Junk\nR1,P1,3.9,TRUE,x\nR1,P1,3.9,TRUE,y\nR2,P1,1,FALSE,z\n",
    );
    let output = workspace.path().join("aligned.csv");

    bin()
        .args([
            "validate",
            "--config",
            config.to_str().unwrap(),
            "-i",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
        ])
        .assert()
        .success();

    let contents = fs::read_to_string(&output).expect("read output");
    let mut lines = contents.lines();
    assert_eq!(
        lines.next(),
        Some(
            "PrimaryKey,DBKey,ProjectKey,LineKey,RecKey,SeqNo,Gap,RecType,Canopy,DateVisited,DateLoadedInDb"
        )
    );
    let first = lines.next().expect("first row");
    assert!(first.starts_with("P1,,,,R1,3,,,1,,"), "{first}");
    let second = lines.next().expect("second row");
    assert!(second.starts_with("P1,,,,R2,1,,,0,,"), "{second}");
    assert!(lines.next().is_none());
    assert!(!workspace.database().exists());
}

#[test]
fn ingest_loads_directory_and_honours_overrides() {
    let workspace = TestWorkspace::new();
    let config = workspace.write_config(2000);
    workspace.write_data("dataHeader", "PrimaryKey,DateVisited\nP1,2023-06-01\nP2,2023-06-02\n");
    workspace.write_data(
        "dataGap",
        "PrimaryKey,LineKey,RecKey,SeqNo,Gap,RecType\nP1,L1,R1,1,2,C\nP3,L1,R1,1,2,C\n",
    );
    let other_db = workspace.path().join("other.sqlite");

    bin()
        .args([
            "ingest",
            "--config",
            config.to_str().unwrap(),
            "--database",
            other_db.to_str().unwrap(),
            "--chunk-size",
            "1",
        ])
        .assert()
        .success();

    assert!(other_db.exists());
    assert!(!workspace.database().exists());
    assert!(
        workspace
            .quarantine_dir()
            .join("no_primarykeys_nodbkey_dataGap.csv")
            .exists()
    );
}

#[test]
fn ingest_reports_failed_tables() {
    let workspace = TestWorkspace::new();
    let config = workspace.write_config(2000);
    workspace.write_data("dataHeader", "PrimaryKey\nP1\n");
    workspace.write_data("tblUnregistered", "PrimaryKey\nP1\n");

    bin()
        .args(["ingest", "--config", config.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("tblUnregistered"));
}

#[test]
fn missing_config_is_an_error() {
    let workspace = TestWorkspace::new();
    bin()
        .args([
            "catalog",
            "--config",
            workspace.path().join("absent.yaml").to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("Loading configuration"));
}

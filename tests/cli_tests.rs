//! Command-line behavior of the peregrine binary

mod common;

use assert_cmd::Command;
use common::{items_db, row_count};
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn peregrine() -> Command {
    Command::cargo_bin("peregrine").unwrap()
}

#[test]
fn test_help_lists_core_options() {
    peregrine()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--database"))
        .stdout(predicate::str::contains("--parallelism"))
        .stdout(predicate::str::contains("--use-compression"));
}

#[test]
fn test_extracts_table() {
    let dir = tempdir().unwrap();
    let db = items_db(dir.path(), 250);
    let out = dir.path().join("export");

    peregrine()
        .arg("--database")
        .arg(&db)
        .arg("--table")
        .arg("items")
        .arg("--out-dir")
        .arg(&out)
        .args(["-p", "3", "-q"])
        .assert()
        .success();

    assert_eq!(row_count(&out.join("items.parquet")), 250);
}

#[test]
fn test_missing_table_exits_with_failure() {
    let dir = tempdir().unwrap();
    let db = items_db(dir.path(), 5);
    let out = dir.path().join("export");

    peregrine()
        .arg("--database")
        .arg(&db)
        .args(["--table", "missing", "-q"])
        .arg("--out-dir")
        .arg(&out)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("extraction failed during probing"));

    assert!(!out.join("missing.parquet").exists());
}

#[test]
fn test_zero_parallelism_is_config_error() {
    let dir = tempdir().unwrap();
    let db = items_db(dir.path(), 5);

    peregrine()
        .arg("--database")
        .arg(&db)
        .args(["--table", "items", "-p", "0", "-q"])
        .arg("--out-dir")
        .arg(dir.path().join("export"))
        .assert()
        .code(2);
}

#[test]
fn test_missing_required_argument() {
    peregrine()
        .args(["--table", "items"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--database"));
}

#[test]
fn test_report_written_as_json() {
    let dir = tempdir().unwrap();
    let db = items_db(dir.path(), 100);
    let out = dir.path().join("export");
    let report = dir.path().join("report.json");

    peregrine()
        .arg("--database")
        .arg(&db)
        .arg("--table")
        .arg("items")
        .arg("--out-dir")
        .arg(&out)
        .arg("--report")
        .arg(&report)
        .args(["-p", "2", "-q", "--use-compression"])
        .assert()
        .success();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["table"], "items");
    assert_eq!(json["rows"], 100);
    assert_eq!(json["compression"], true);
    assert_eq!(json["consistency"], "best-effort");
    assert_eq!(json["partitions"].as_array().unwrap().len(), 2);
}

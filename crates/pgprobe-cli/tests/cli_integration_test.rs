mod common;

use predicates::prelude::*;
use tempfile::TempDir;

use common::{create_sql_file, pgprobe};

#[test]
fn test_help_lists_blocks() {
    pgprobe()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("params"))
        .stdout(predicate::str::contains("dictfetch"))
        .stdout(predicate::str::contains("adapt"))
        .stdout(predicate::str::contains("--binary"));
}

#[test]
fn test_adapt_prints_uuid_forms() {
    pgprobe()
        .arg("adapt")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "quoted:  '9c6d5a77-7256-457e-9461-347b4358e350'::uuid",
        ))
        .stdout(predicate::str::contains(
            "binding: uuid [16 bytes] 9c6d5a777256457e9461347b4358e350",
        ));
}

#[test]
fn test_adapt_quotes_strings_and_nulls() {
    pgprobe()
        .arg("adapt")
        .assert()
        .success()
        .stdout(predicate::str::contains("quoted:  'O''Reilly'"))
        .stdout(predicate::str::contains(r"quoted:  E'C:\\temp'"))
        .stdout(predicate::str::contains("binding: int4 [4 bytes] 0000002a"))
        .stdout(predicate::str::contains("quoted:  NULL"));
}

#[test]
fn test_quiet_hides_status_lines() {
    pgprobe()
        .args(["-q", "adapt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Adaptation").not())
        .stdout(predicate::str::contains("uuid:"));
}

#[test]
fn test_dictfetch_empty_sql_file() {
    let dir = TempDir::new().unwrap();
    let path = create_sql_file(&dir, "empty.sql", "  \n\n");

    pgprobe()
        .arg("dictfetch")
        .arg("--file")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("query text is empty"));
}

#[test]
fn test_dictfetch_missing_sql_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.sql");

    pgprobe()
        .arg("dictfetch")
        .arg("--file")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read SQL file"));
}

#[test]
fn test_dictfetch_query_and_file_conflict() {
    pgprobe()
        .args(["dictfetch", "--query", "SELECT 1", "--file", "x.sql"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_invalid_port_from_env() {
    pgprobe()
        .env("PGPROBE_TESTDB_PORT", "notaport")
        .arg("params")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--port"));
}

#[test]
fn test_repeat_must_be_positive() {
    pgprobe()
        .args(["-n", "0", "stress"])
        .assert()
        .failure();
}

#[test]
fn test_unreachable_server_fails() {
    pgprobe()
        .args(["--host", "127.0.0.1", "--port", "1", "params"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to connect to the test database"));
}

#[test]
#[ignore = "Requires running PostgreSQL server"]
fn test_params_block_catches_multi_statement_error() {
    // connection settings come from the caller's PGPROBE_TESTDB* variables
    assert_cmd::Command::new(env!("CARGO_BIN_EXE_pgprobe"))
        .arg("params")
        .assert()
        .success()
        .stdout(predicate::str::contains("multi-statement query rejected"));
}

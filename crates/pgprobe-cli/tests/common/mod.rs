use assert_cmd::Command;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

/// `pgprobe` with connection settings cleared from the environment
pub fn pgprobe() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pgprobe"));
    for var in [
        "PGPROBE_DSN",
        "PGPROBE_TESTDB",
        "PGPROBE_TESTDB_HOST",
        "PGPROBE_TESTDB_PORT",
        "PGPROBE_TESTDB_USER",
        "PGPROBE_TESTDB_PASSWORD",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

/// Create a SQL file with the given contents
pub fn create_sql_file(dir: &TempDir, filename: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(filename);
    let mut file = File::create(&path).expect("Failed to create SQL file");
    write!(file, "{}", contents).expect("Failed to write SQL file");
    path
}

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_stats_on_empty_store() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("marketpay"));
    cmd.arg("stats");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("dimension,key,count,total"));

    Ok(())
}

#[test]
fn test_stats_rejects_malformed_bound() {
    let mut cmd = Command::new(cargo_bin!("marketpay"));
    cmd.arg("stats").arg("--from").arg("yesterday");

    cmd.assert().failure();
}

#[test]
fn test_serve_requires_gateway_secrets() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::new(cargo_bin!("marketpay"));
    cmd.current_dir(dir.path())
        .env_remove("CLICK_SECRET_KEY")
        .env_remove("PAYME_KEY")
        .env_remove("UZUM_SECRET_KEY")
        .arg("serve")
        .arg("--port")
        .arg("0");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("CLICK_SECRET_KEY"));
}

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let mut cmd = Command::new(cargo_bin!("marketpay"));
    cmd.arg("stats").arg("--db-path").arg("some_db");

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut cmd = Command::new(cargo_bin!("marketpay"));
    cmd.arg("stats").arg("--db-path").arg(&db_path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("WARNING").not());
}

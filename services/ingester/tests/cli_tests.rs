//! Tests that run the ingester binary against temporary directories.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, Instant};

use chrono::{Datelike, Utc};
use serde_json::Value;
use test_utils::{bufr_message_bytes, temp_test_dir, write_file, BufrSoundingSpec};

struct Workspace {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = temp_test_dir();
        let root = dir.path().to_path_buf();
        Self { _dir: dir, root }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// A message dated yesterday, so it stays inside the retention window.
    fn recent_message(&self, name: &str, spec: BufrSoundingSpec) -> PathBuf {
        let day = Utc::now() - chrono::Duration::days(1);
        let spec = spec.on_day(day.year() as i64, day.month() as i64, day.day() as i64);
        write_file(&self.path("spool"), name, &bufr_message_bytes(&spec))
    }

    fn run(&self, extra: &[&str], files: &[&Path]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_radiosonde-ingester"))
            .env_remove("RADIOSONDE_CONFIG")
            .arg("--destdir")
            .arg(self.path("out"))
            .arg("--lock-dir")
            .arg(self.path("locks"))
            .arg("--summary")
            .arg(self.path("out/summary.geojson"))
            .arg("--log-level")
            .arg("warn")
            .args(extra)
            .args(files)
            .output()
            .unwrap()
    }

    fn summary(&self) -> Value {
        serde_json::from_slice(&fs::read(self.path("out/summary.geojson")).unwrap()).unwrap()
    }
}

fn station_ids(summary: &Value) -> Vec<String> {
    summary["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["properties"]["station_id"].as_str().unwrap().to_string())
        .collect()
}

// ============================================================================
// Runs
// ============================================================================

#[test]
fn test_run_writes_summary() {
    let ws = Workspace::new();
    let file = ws.recent_message("vienna.bin", BufrSoundingSpec::default());

    let output = ws.run(&[], &[&file]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let summary = ws.summary();
    assert_eq!(summary["properties"]["fmt"], 6);
    assert_eq!(station_ids(&summary), vec!["11035"]);
    assert!(file.with_extension("processed").exists());
}

#[test]
fn test_station_filter() {
    let ws = Workspace::new();
    let vienna = ws.recent_message("vienna.bin", BufrSoundingSpec::default());
    let other = ws.recent_message(
        "other.bin",
        BufrSoundingSpec {
            block: Some(72),
            station: Some(493),
            ..Default::default()
        },
    );

    let output = ws.run(&["--station", "72493"], &[&vienna, &other]);
    assert!(output.status.success());
    assert_eq!(station_ids(&ws.summary()), vec!["72493"]);
    assert!(!ws.path("out/fm94/11").exists());
}

#[test]
fn test_rebuild_summary() {
    let ws = Workspace::new();
    let file = ws.recent_message("vienna.bin", BufrSoundingSpec::default());
    assert!(ws.run(&[], &[&file]).status.success());
    let incremental = ws.summary();

    fs::remove_file(ws.path("out/summary.geojson")).unwrap();
    assert!(ws.run(&["--rebuild-summary"], &[]).status.success());
    let rebuilt = ws.summary();
    assert_eq!(rebuilt["features"], incremental["features"]);
}

// ============================================================================
// Locking
// ============================================================================

#[test]
fn test_held_lock_times_out_with_failure() {
    let ws = Workspace::new();
    let file = ws.recent_message("vienna.bin", BufrSoundingSpec::default());
    // a live pid: this test process
    let lock = write_file(
        &ws.path("locks"),
        "process-radiosonde.ingest",
        std::process::id().to_string().as_bytes(),
    );

    let start = Instant::now();
    let output = ws.run(&["--lock-timeout", "1", "--poll-interval", "0.2"], &[&file]);
    assert!(!output.status.success());
    assert!(start.elapsed() >= Duration::from_secs(1));

    assert!(lock.exists());
    assert!(!file.with_extension("processed").exists());
    assert!(!ws.path("out/summary.geojson").exists());
}

#[test]
fn test_stale_lock_is_taken_over() {
    let ws = Workspace::new();
    let file = ws.recent_message("vienna.bin", BufrSoundingSpec::default());
    let lock = write_file(&ws.path("locks"), "process-radiosonde.ingest", b"2147483647");

    let output = ws.run(&[], &[&file]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(!lock.exists());
}

//! Scratch spool and destination trees.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Temporary directory removed when dropped.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temporary test directory")
}

/// Write `data` to `dir/name`, creating parent directories.
pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    fs::write(&path, data).expect("Failed to write test file");
    path
}

/// Set a file's modification time.
pub fn set_mtime(path: &Path, mtime: SystemTime) {
    let file = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .expect("Failed to open file for mtime update");
    file.set_modified(mtime)
        .expect("Failed to set modification time");
}

/// Move a file's modification time `secs` seconds into the future, so a
/// source looks touched after its marker without sleeping.
pub fn touch_later(path: &Path, secs: u64) {
    let current = fs::metadata(path)
        .and_then(|m| m.modified())
        .expect("Failed to read modification time");
    set_mtime(path, current + Duration::from_secs(secs));
}

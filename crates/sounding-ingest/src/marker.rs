//! Sidecar processing markers.
//!
//! A source file `dir/name.ext` is marked by an empty `dir/name.processed`
//! or `dir/name.failed`. The marker's modification time tells whether the
//! source changed after it was last handled.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::error::Result;

/// Per-file processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Unseen,
    Processing,
    Processed,
    Failed,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unseen => "unseen",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "processed" => Self::Processed,
            "failed" => Self::Failed,
            _ => Self::Unseen,
        }
    }

    /// Terminal states are the ones recorded on disk.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }
}

/// Marker path for a terminal state: the source path with its final
/// extension replaced.
pub fn marker_path(source: &Path, state: ProcessingState) -> PathBuf {
    source.with_extension(state.as_str())
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Recorded state of a source file, from its markers.
///
/// `Unseen` when no marker exists; if both exist the newer one wins.
pub fn recorded_state(source: &Path) -> ProcessingState {
    let processed = mtime(&marker_path(source, ProcessingState::Processed));
    let failed = mtime(&marker_path(source, ProcessingState::Failed));
    match (processed, failed) {
        (None, None) => ProcessingState::Unseen,
        (Some(_), None) => ProcessingState::Processed,
        (None, Some(_)) => ProcessingState::Failed,
        (Some(p), Some(f)) if f > p => ProcessingState::Failed,
        (Some(_), Some(_)) => ProcessingState::Processed,
    }
}

/// Whether a source needs (re)processing.
///
/// True when forced, when no marker exists, or when the source was
/// modified after its marker.
pub fn needs_processing(source: &Path, force: bool) -> bool {
    if force {
        return true;
    }
    let marker = [ProcessingState::Processed, ProcessingState::Failed]
        .iter()
        .filter_map(|state| mtime(&marker_path(source, *state)))
        .max();
    match (marker, mtime(source)) {
        (Some(marker), Some(source_mtime)) => source_mtime > marker,
        _ => true,
    }
}

/// Record a terminal state and drop the opposite marker.
///
/// The marker is never dated before the source, so a source with a
/// future timestamp is not picked up again on every run.
pub fn record(source: &Path, state: ProcessingState) -> Result<PathBuf> {
    debug_assert!(state.is_terminal());
    let path = marker_path(source, state);
    let other = match state {
        ProcessingState::Failed => ProcessingState::Processed,
        _ => ProcessingState::Failed,
    };

    let file = File::create(&path)?;
    if let (Some(source_mtime), Ok(now)) = (mtime(source), file.metadata().and_then(|m| m.modified())) {
        if source_mtime > now {
            file.set_modified(source_mtime)?;
        }
    }

    match fs::remove_file(marker_path(source, other)) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    debug!(source = %source.display(), state = state.as_str(), "Recorded marker");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use test_utils::{set_mtime, temp_test_dir, touch_later, write_file};

    #[test]
    fn test_state_strings() {
        for state in [
            ProcessingState::Unseen,
            ProcessingState::Processing,
            ProcessingState::Processed,
            ProcessingState::Failed,
        ] {
            assert_eq!(ProcessingState::from_str(state.as_str()), state);
        }
        assert_eq!(ProcessingState::from_str("bogus"), ProcessingState::Unseen);
    }

    #[test]
    fn test_marker_path_replaces_last_extension() {
        assert_eq!(
            marker_path(Path::new("/spool/a.bin"), ProcessingState::Processed),
            PathBuf::from("/spool/a.processed")
        );
        assert_eq!(
            marker_path(Path::new("/spool/20210218_1200.nc.gz"), ProcessingState::Failed),
            PathBuf::from("/spool/20210218_1200.nc.failed")
        );
    }

    #[test]
    fn test_unseen_file_needs_processing() {
        let dir = temp_test_dir();
        let source = write_file(dir.path(), "a.bin", b"data");
        assert_eq!(recorded_state(&source), ProcessingState::Unseen);
        assert!(needs_processing(&source, false));
    }

    #[test]
    fn test_marked_file_is_skipped_until_touched() {
        let dir = temp_test_dir();
        let source = write_file(dir.path(), "a.bin", b"data");
        record(&source, ProcessingState::Processed).unwrap();

        assert_eq!(recorded_state(&source), ProcessingState::Processed);
        assert!(!needs_processing(&source, false));
        assert!(needs_processing(&source, true));

        touch_later(&source, 120);
        assert!(needs_processing(&source, false));
    }

    #[test]
    fn test_record_replaces_opposite_marker() {
        let dir = temp_test_dir();
        let source = write_file(dir.path(), "a.bin", b"data");
        record(&source, ProcessingState::Failed).unwrap();
        assert_eq!(recorded_state(&source), ProcessingState::Failed);

        record(&source, ProcessingState::Processed).unwrap();
        assert_eq!(recorded_state(&source), ProcessingState::Processed);
        assert!(!marker_path(&source, ProcessingState::Failed).exists());
    }

    #[test]
    fn test_future_source_is_not_reprocessed() {
        let dir = temp_test_dir();
        let source = write_file(dir.path(), "a.bin", b"data");
        set_mtime(&source, SystemTime::now() + Duration::from_secs(3600));
        record(&source, ProcessingState::Processed).unwrap();
        assert!(!needs_processing(&source, false));
    }
}

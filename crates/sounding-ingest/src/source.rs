//! Source files: type detection and spool discovery.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{IngestionError, Result};
use crate::marker::ProcessingState;
use crate::profile::ReportFormat;

/// Container shape of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// One message or one multi-station file
    Single,
    /// Zip archive of messages
    Archive,
}

/// A file to ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub format: ReportFormat,
    pub kind: SourceKind,
    /// Spool channel the file was found in
    pub channel: Option<String>,
}

impl SourceFile {
    /// Classify `path`; `hint` decides extensions shared by both formats.
    pub fn new(path: impl Into<PathBuf>, hint: Option<ReportFormat>, channel: Option<String>) -> Result<Self> {
        let path = path.into();
        let (format, kind) = detect_source(&path, hint)?;
        Ok(Self {
            path,
            format,
            kind,
            channel,
        })
    }

    /// File name, for provenance and logging.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Whether the payload is gzipped and must be inflated before decoding.
    pub fn is_gzipped(&self) -> bool {
        self.kind == SourceKind::Single && crate::persist::is_compressed(&self.path)
    }
}

/// Detect format and container from the file extension.
///
/// - `.zip`: archive of FM-94 messages (or `hint`)
/// - `.bin`, `.bufr`: FM-94
/// - `.nc`, `.cdf`, `.gz`: FM-35
/// - `.json`: `hint`, else FM-35
pub fn detect_source(path: &Path, hint: Option<ReportFormat>) -> Result<(ReportFormat, SourceKind)> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "zip" => Ok((hint.unwrap_or(ReportFormat::Fm94), SourceKind::Archive)),
        "bin" | "bufr" => Ok((ReportFormat::Fm94, SourceKind::Single)),
        "nc" | "cdf" | "gz" => Ok((ReportFormat::Fm35, SourceKind::Single)),
        "json" => Ok((hint.unwrap_or(ReportFormat::Fm35), SourceKind::Single)),
        _ => Err(IngestionError::UnknownFileType(path.display().to_string())),
    }
}

fn is_marker(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| ProcessingState::from_str(e).is_terminal())
}

/// All ingestible files below `dir`, sorted by path.
///
/// Markers and files of unknown type are skipped.
pub fn discover_sources(dir: &Path, hint: Option<ReportFormat>, channel: Option<&str>) -> Vec<SourceFile> {
    let sources: Vec<SourceFile> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && !is_marker(e.path()))
        .filter_map(|e| {
            SourceFile::new(e.path(), hint, channel.map(str::to_string))
                .map_err(|err| debug!(error = %err, "Skipping file"))
                .ok()
        })
        .collect();

    debug!(dir = %dir.display(), channel = ?channel, count = sources.len(), "Discovered sources");
    sources
}

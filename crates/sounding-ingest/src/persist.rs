//! Atomic, optionally compressed JSON persistence.
//!
//! Every document is written to a temporary file in the destination
//! directory, synced, then renamed over the destination, so readers never
//! observe a partial file. A `.gz` extension means gzip.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::ascent::Ascent;
use crate::error::{IngestionError, Result};

/// Whether a path names a gzip document.
pub fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Gzip a byte buffer.
pub fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress gzip-compressed data.
pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// Write `data` to `path` atomically with mode 0644.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| IngestionError::persistence(path, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| IngestionError::persistence(path, e))?;
    tmp.write_all(data)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| IngestionError::persistence(path, e))?;
    tmp.persist(path)
        .map_err(|e| IngestionError::persistence(path, e.error))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644))
            .map_err(|e| IngestionError::persistence(path, e))?;
    }

    debug!(path = %path.display(), bytes = data.len(), "Persisted file");
    Ok(())
}

/// Serialize `value` and persist it, gzipped when the path ends in `.gz`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec(value)?;
    let data = if is_compressed(path) {
        let compressed = compress_gzip(&json)?;
        debug!(
            path = %path.display(),
            raw = json.len(),
            compressed = compressed.len(),
            "Compressed document"
        );
        compressed
    } else {
        json
    };
    write_atomic(path, &data)
}

/// Read a JSON document written by [`write_json`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path)?;
    let data = if is_compressed(path) {
        decompress_gzip(&raw)?
    } else {
        raw
    };
    Ok(serde_json::from_slice(&data)?)
}

/// Load a persisted ascent artifact.
pub fn read_ascent(path: &Path) -> Result<Ascent> {
    read_json(path)
}

//! Zip archives of BUFR messages.
//!
//! Feeds deliver batches of single-sounding messages as zip files. Each
//! regular member is handled as its own unit; directory entries are skipped.

use std::io::{Cursor, Read};

use tracing::debug;
use zip::ZipArchive;

use crate::error::{IngestionError, Result};

/// Largest buffer reserved up front from a member's declared size.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Initial buffer size for a member; the declared size is not trusted.
fn capacity_hint(declared: u64) -> usize {
    declared.min(MAX_PREALLOC) as usize
}

/// One archive member, read eagerly.
#[derive(Debug)]
pub struct ArchiveMember {
    pub name: String,
    /// Member bytes, or why they could not be read
    pub data: Result<Vec<u8>>,
}

/// Open an archive and read all regular members.
///
/// An unreadable archive is an error; an unreadable member is reported in
/// its own `data` so the remaining members are still processed.
pub fn read_members(bytes: &[u8]) -> Result<Vec<ArchiveMember>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| IngestionError::Archive(format!("Failed to read archive: {e}")))?;

    let mut members = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = match archive.by_index(i) {
            Ok(file) => file,
            Err(e) => {
                members.push(ArchiveMember {
                    name: format!("#{i}"),
                    data: Err(IngestionError::Archive(format!(
                        "Failed to read archive entry {i}: {e}"
                    ))),
                });
                continue;
            }
        };
        if file.is_dir() {
            continue;
        }

        let name = file.name().to_string();
        let mut contents = Vec::with_capacity(capacity_hint(file.size()));
        let data = file
            .read_to_end(&mut contents)
            .map(|_| contents)
            .map_err(|e| IngestionError::Archive(format!("Failed to extract {name}: {e}")));
        members.push(ArchiveMember { name, data });
    }

    debug!(members = members.len(), "Opened archive");
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::zip_archive;

    #[test]
    fn test_capacity_hint_is_bounded() {
        assert_eq!(capacity_hint(5), 5);
        assert_eq!(capacity_hint(u64::MAX), MAX_PREALLOC as usize);
    }

    #[test]
    fn test_read_members_in_order() {
        let archive = zip_archive(&[("one.bin", &b"first"[..]), ("two.bin", &b"second"[..])]);
        let members = read_members(&archive).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].name, "one.bin");
        assert_eq!(members[0].data.as_ref().unwrap(), b"first");
        assert_eq!(members[1].data.as_ref().unwrap(), b"second");
    }

    #[test]
    fn test_empty_archive() {
        let archive = zip_archive(&[]);
        assert!(read_members(&archive).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_archive_is_an_error() {
        let err = read_members(b"PK\x03\x04 definitely not a zip").unwrap_err();
        assert!(matches!(err, IngestionError::Archive(_)));
    }
}

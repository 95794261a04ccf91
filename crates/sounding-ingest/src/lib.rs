//! Radiosonde sounding ingestion library.
//!
//! Turns decoded upper-air soundings (FM-94 BUFR, FM-35 TEMP via netCDF)
//! into per-ascent GeoJSON artifacts and keeps a rolling per-station
//! summary of recent ascents.
//!
//! # Architecture
//!
//! This crate is used by the `radiosonde-ingester` service. It handles:
//!
//! - Profile building from decoded fields, one decoder per report format
//! - Station identity, height-step thinning and artifact assembly
//! - Sidecar markers, archive expansion and parallel batch decode
//! - The summary merge, a pure function of its inputs
//! - Run-level locking with pid-stamped lock files

pub mod archive;
pub mod ascent;
pub mod config;
pub mod error;
pub mod geojson;
mod ingester;
pub mod kernel;
pub mod lock;
pub mod marker;
pub mod persist;
pub mod profile;
pub mod source;
pub mod station;
pub mod summary;

#[cfg(test)]
mod testing;

// Re-exports
pub use ascent::{assemble, Ascent, AscentProperties, IdType, Origin};
pub use config::ProcessingConfig;
pub use error::{IngestionError, Result};
pub use ingester::{BatchReport, FileReport, Ingester};
pub use lock::{lock_path, LockOptions, PidLock};
pub use marker::ProcessingState;
pub use profile::{ProfileDecoder, ProfileOutcome, ReportFormat};
pub use source::{discover_sources, SourceFile, SourceKind};
pub use station::{StationInfo, StationRegistry};
pub use summary::{MergeStats, PendingAscent, Summary};

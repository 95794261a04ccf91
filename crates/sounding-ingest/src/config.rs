//! Processing configuration for sounding ingestion.
//!
//! Defines QC thresholds, thinning step, retention window and the other
//! knobs that shape how a batch run decodes and aggregates ascents.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{IngestionError, Result};

/// Default values used when a configuration field is not set.
pub mod defaults {
    /// Minimum vertical separation between retained samples (m)
    pub const HSTEP: f64 = 100.0;
    /// Simulated balloon ascent rate (m/s), roughly 380 m/min
    pub const ASCENT_RATE: f64 = 6.3;
    /// Minimum sample count for an ascent to pass QC
    pub const MIN_SAMPLES: usize = 10;
    /// Ascents older than this are pruned from the summary (days)
    pub const RETENTION_DAYS: u32 = 14;
    /// Flights longer than this are logged as suspicious (seconds)
    pub const MAX_FLIGHT_DURATION_SECS: i64 = 3600 * 5;
    /// Horizontal jump between consecutive samples counted as a violation (m)
    pub const MAX_SAMPLE_JUMP_M: f64 = 20_000.0;
    /// Violations tolerated before an ascent is considered corrupt
    pub const MAX_JUMP_VIOLATIONS: usize = 3;
    /// Version tag written into artifacts and the summary
    pub const FORMAT_VERSION: u32 = 6;
}

/// Knobs for a batch run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Height-step filter (m)
    pub hstep: f64,

    /// Ascent rate used for simulated sample times (m/s)
    pub ascent_rate: f64,

    /// QC: minimum number of samples
    pub min_samples: usize,

    /// Summary retention window (days)
    pub retention_days: u32,

    /// Flight-duration ceiling, logged only (seconds)
    pub max_flight_duration_secs: i64,

    /// Displacement guard threshold (m)
    pub max_sample_jump_m: f64,

    /// Displacement guard tolerance
    pub max_jump_violations: usize,

    /// Gzip artifacts and the summary
    pub compress: bool,

    /// Reconstruct a simulated track for formats without native positions
    pub track_reconstruction: bool,

    /// Decode worker count, `None` means available parallelism
    pub workers: Option<usize>,

    /// Ignore markers and reprocess everything
    pub force: bool,

    /// Only emit ascents for this station id
    pub station_filter: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            hstep: defaults::HSTEP,
            ascent_rate: defaults::ASCENT_RATE,
            min_samples: defaults::MIN_SAMPLES,
            retention_days: defaults::RETENTION_DAYS,
            max_flight_duration_secs: defaults::MAX_FLIGHT_DURATION_SECS,
            max_sample_jump_m: defaults::MAX_SAMPLE_JUMP_M,
            max_jump_violations: defaults::MAX_JUMP_VIOLATIONS,
            compress: true,
            track_reconstruction: true,
            workers: None,
            force: false,
            station_filter: None,
        }
    }
}

impl ProcessingConfig {
    /// Retention window as a duration.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 86_400)
    }

    /// Effective decode worker count.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Reject settings that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        if !(self.hstep >= 0.0) {
            return Err(IngestionError::InvalidConfig(format!(
                "hstep must be non-negative, got {}",
                self.hstep
            )));
        }
        if !(self.ascent_rate > 0.0) {
            return Err(IngestionError::InvalidConfig(format!(
                "ascent_rate must be positive, got {}",
                self.ascent_rate
            )));
        }
        if self.retention_days == 0 {
            return Err(IngestionError::InvalidConfig(
                "retention_days must be at least 1".to_string(),
            ));
        }
        if self.workers == Some(0) {
            return Err(IngestionError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

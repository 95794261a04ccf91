//! Profile building: decoded fields → header + ordered samples.
//!
//! Two report formats are supported, each behind the [`ProfileDecoder`]
//! trait:
//!
//! - [`Fm94Decoder`]: fixed-cardinality BUFR (TEMP high resolution), one
//!   sounding per message, native per-level time offsets and displacements.
//! - [`Fm35Decoder`]: sectioned netCDF (mandatory, significant temperature,
//!   significant wind, max wind, tropopause), many stations per file.
//!
//! Both end in the same QC gate and displacement guard.

mod fields;
mod fm35;
mod fm94;

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ProcessingConfig;
use crate::error::{IngestionError, Result};
use crate::kernel;
use crate::station::StationRegistry;

pub use fields::{
    Array, ArrayCodec, ArraySet, FieldCodec, FieldMap, FieldValue, JsonArrayCodec,
    JsonFieldCodec, Sentinels,
};
pub use fm35::{build_fm35_profiles, Fm35Decoder};
pub use fm94::{build_fm94_profile, Fm94Decoder, CARDINALITY_KEY};

/// Report format of a decoded sounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// WMO FM-94 BUFR
    Fm94,
    /// WMO FM-35 TEMP, distributed as netCDF
    Fm35,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fm94 => "fm94",
            Self::Fm35 => "fm35",
        }
    }

    /// Container encoding the format arrives in.
    pub fn encoding(&self) -> &'static str {
        match self {
            Self::Fm94 => "BUFR",
            Self::Fm35 => "netCDF",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fm94" | "bufr" => Some(Self::Fm94),
            "fm35" | "netcdf" => Some(Self::Fm35),
            _ => None,
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where sample positions come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathSource {
    /// Reported by the sonde
    Origin,
    /// Integrated from winds and an assumed ascent rate
    Simulated,
    /// No horizontal track, all samples at the release site
    Fixed,
}

impl PathSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::Simulated => "simulated",
            Self::Fixed => "fixed",
        }
    }
}

/// OR-able vertical significance of a level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Significance(u32);

impl Significance {
    pub const NONE: Significance = Significance(0);
    pub const SURFACE: Significance = Significance(1);
    pub const MANDATORY: Significance = Significance(1 << 1);
    pub const SIG_TEMPERATURE: Significance = Significance(1 << 2);
    pub const SIG_WIND: Significance = Significance(1 << 3);
    pub const MAX_WIND: Significance = Significance(1 << 4);
    pub const TROPOPAUSE: Significance = Significance(1 << 5);
    pub const OTHER: Significance = Significance(1 << 6);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: Significance) -> bool {
        self.0 & other.0 == other.0
    }

    /// Map a BUFR 0 08 042 "extended vertical sounding significance" value.
    ///
    /// The flag table numbers bits from the most significant of 18, so bit 1
    /// is `1 << 17`.
    pub fn from_bufr_flags(raw: i64) -> Significance {
        if raw <= 0 {
            return Self::NONE;
        }
        let bit = |n: u32| raw & (1 << (18 - n)) != 0;
        let mut sig = Self::NONE;
        if bit(1) {
            sig |= Self::SURFACE;
        }
        if bit(2) {
            sig |= Self::MANDATORY;
        }
        if bit(3) {
            sig |= Self::TROPOPAUSE;
        }
        if bit(4) {
            sig |= Self::MAX_WIND;
        }
        if bit(5) || bit(6) {
            sig |= Self::SIG_TEMPERATURE;
        }
        if bit(7) {
            sig |= Self::SIG_WIND;
        }
        if sig.is_empty() {
            sig = Self::OTHER;
        }
        sig
    }
}

impl BitOr for Significance {
    type Output = Significance;

    fn bitor(self, rhs: Significance) -> Significance {
        Significance(self.0 | rhs.0)
    }
}

impl BitOrAssign for Significance {
    fn bitor_assign(&mut self, rhs: Significance) {
        self.0 |= rhs.0;
    }
}

/// Release time components as reported; any may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleaseFields {
    pub year: Option<i64>,
    pub month: Option<i64>,
    pub day: Option<i64>,
    pub hour: Option<i64>,
    pub minute: Option<i64>,
    pub second: Option<i64>,
}

impl ReleaseFields {
    pub fn from_datetime(t: DateTime<Utc>) -> Self {
        use chrono::{Datelike, Timelike};
        Self {
            year: Some(i64::from(t.year())),
            month: Some(i64::from(t.month())),
            day: Some(i64::from(t.day())),
            hour: Some(i64::from(t.hour())),
            minute: Some(i64::from(t.minute())),
            second: Some(i64::from(t.second())),
        }
    }

    /// All of year, month, day, hour and minute are present.
    pub fn is_complete(&self) -> bool {
        self.year.is_some()
            && self.month.is_some()
            && self.day.is_some()
            && self.hour.is_some()
            && self.minute.is_some()
    }

    /// Release timestamp; seconds default to zero.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        to_utc(
            self.year?,
            self.month?,
            self.day?,
            self.hour?,
            self.minute?,
            self.second.unwrap_or(0),
        )
    }
}

/// Build a UTC timestamp from loose integer components.
pub(crate) fn to_utc(
    year: i64,
    month: i64,
    day: i64,
    hour: i64,
    minute: i64,
    second: i64,
) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(
        i32::try_from(year).ok()?,
        u32::try_from(month).ok()?,
        u32::try_from(day).ok()?,
    )?;
    let naive = date.and_hms_opt(
        u32::try_from(hour).ok()?,
        u32::try_from(minute).ok()?,
        u32::try_from(second).ok()?,
    )?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Instrument metadata, sparse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SondeInfo {
    pub sonde_type: Option<i64>,
    pub serial: Option<String>,
    pub frequency: Option<f64>,
    pub pressure_sensor: Option<i64>,
    pub temperature_sensor: Option<i64>,
    pub humidity_sensor: Option<i64>,
    pub humidity_correction: Option<i64>,
    pub geopotential_calculation: Option<i64>,
    pub tracking: Option<i64>,
    pub measuring_equipment: Option<i64>,
    pub software_version: Option<String>,
}

/// Per-release metadata, built once per message or station record.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundingHeader {
    pub format: ReportFormat,
    pub wmo_block: Option<i64>,
    pub wmo_station: Option<i64>,
    /// Textual station number (FM-35 records)
    pub station_number: Option<String>,
    /// Ship or mobile land station identifier
    pub mobile_id: Option<String>,
    pub synoptic_time: Option<DateTime<Utc>>,
    pub release: ReleaseFields,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub station_height: Option<f64>,
    pub ground_height: Option<f64>,
    pub barometer_height: Option<f64>,
    pub sonde: SondeInfo,
    pub path_source: PathSource,
    /// Optional header keys that were absent or missing
    pub missing_fields: usize,
}

impl SoundingHeader {
    pub fn new(format: ReportFormat) -> Self {
        Self {
            format,
            wmo_block: None,
            wmo_station: None,
            station_number: None,
            mobile_id: None,
            synoptic_time: None,
            release: ReleaseFields::default(),
            latitude: None,
            longitude: None,
            station_height: None,
            ground_height: None,
            barometer_height: None,
            sonde: SondeInfo::default(),
            path_source: PathSource::Origin,
            missing_fields: 0,
        }
    }

    /// Best label for log lines before identity resolution.
    pub fn label(&self) -> String {
        match (self.wmo_block, self.wmo_station) {
            (Some(b), Some(s)) => format!("{b:02}{s:03}"),
            _ => self
                .station_number
                .clone()
                .or_else(|| self.mobile_id.clone())
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

/// One vertical observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Pressure (hPa)
    pub pressure: f64,
    /// Geopotential height (gpm)
    pub gpheight: f64,
    /// Geometric height (m)
    pub height: f64,
    /// Air temperature (K)
    pub temperature: Option<f64>,
    /// Dewpoint (K)
    pub dewpoint: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub significance: Significance,
    /// Seconds since release, `None` means "at release time"
    pub time_offset: Option<f64>,
    /// Latitude offset from the release site (degrees)
    pub lat_displacement: f64,
    /// Longitude offset from the release site (degrees)
    pub lon_displacement: f64,
}

/// A decoded sounding ready for assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub header: SoundingHeader,
    pub samples: Vec<Sample>,
}

/// Why a sounding produced no artifact without being an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    TooFewSamples { count: usize, min: usize },
    MissingReleaseTime,
    NoReferenceLevel,
    NoLocation,
    ImplausibleTemperature(f64),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewSamples { count, min } => write!(f, "only {count} samples (min {min})"),
            Self::MissingReleaseTime => f.write_str("day/time missing"),
            Self::NoReferenceLevel => f.write_str("no reference level"),
            Self::NoLocation => f.write_str("no location"),
            Self::ImplausibleTemperature(t) => write!(f, "implausible first temperature {t} K"),
        }
    }
}

/// Result of building one sounding.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileOutcome {
    Accepted(Profile),
    Rejected {
        station: String,
        reason: RejectReason,
    },
}

/// Read-only inputs shared by all decode work.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext<'a> {
    pub config: &'a ProcessingConfig,
    pub stations: &'a StationRegistry,
}

/// Turns the raw bytes of one unit (file or archive member) into soundings.
pub trait ProfileDecoder: Send + Sync {
    fn format(&self) -> ReportFormat;

    fn decode(&self, raw: &[u8], ctx: &DecodeContext<'_>) -> Result<Vec<ProfileOutcome>>;
}

/// Sort by descending pressure, keeping decode order among equals.
pub(crate) fn sort_by_pressure(samples: &mut [Sample]) {
    samples.sort_by(|a, b| b.pressure.total_cmp(&a.pressure));
}

/// Whole-ascent QC shared by both formats.
pub(crate) fn qc_gate(
    header: &SoundingHeader,
    samples: &[Sample],
    config: &ProcessingConfig,
) -> Option<RejectReason> {
    if samples.len() < config.min_samples {
        return Some(RejectReason::TooFewSamples {
            count: samples.len(),
            min: config.min_samples,
        });
    }
    if !header.release.is_complete() {
        return Some(RejectReason::MissingReleaseTime);
    }
    None
}

/// Count implausible horizontal jumps between consecutive samples.
///
/// Fails once the count exceeds the configured tolerance.
pub(crate) fn check_displacement(
    samples: &[Sample],
    latitude: f64,
    config: &ProcessingConfig,
) -> Result<()> {
    let violations = samples
        .windows(2)
        .filter(|pair| {
            let d_lat = pair[1].lat_displacement - pair[0].lat_displacement;
            let d_lon = pair[1].lon_displacement - pair[0].lon_displacement;
            kernel::offset_distance(latitude, d_lat, d_lon) > config.max_sample_jump_m
        })
        .count();

    if violations > config.max_jump_violations {
        return Err(IngestionError::DisplacementSanity {
            violations,
            threshold_m: config.max_sample_jump_m,
        });
    }
    if violations > 0 {
        debug!(violations, "Tolerated displacement jumps");
    }
    Ok(())
}

/// Apply QC and the displacement guard to a freshly built sounding.
pub(crate) fn finish_profile(
    header: SoundingHeader,
    samples: Vec<Sample>,
    config: &ProcessingConfig,
) -> Result<ProfileOutcome> {
    if let Some(reason) = qc_gate(&header, &samples, config) {
        debug!(station = %header.label(), reason = %reason, "QC rejected ascent");
        return Ok(ProfileOutcome::Rejected {
            station: header.label(),
            reason,
        });
    }
    check_displacement(&samples, header.latitude.unwrap_or(0.0), config)?;
    Ok(ProfileOutcome::Accepted(Profile { header, samples }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample(pressure: f64, height: f64) -> Sample {
        Sample {
            pressure,
            gpheight: kernel::height_to_geopotential(height),
            height,
            temperature: Some(280.0),
            dewpoint: Some(275.0),
            wind_speed: Some(5.0),
            wind_direction: Some(270.0),
            significance: Significance::NONE,
            time_offset: Some(height / 5.0),
            lat_displacement: 0.0,
            lon_displacement: 0.0,
        }
    }

    fn complete_header() -> SoundingHeader {
        let mut header = SoundingHeader::new(ReportFormat::Fm94);
        header.release = ReleaseFields {
            year: Some(2021),
            month: Some(2),
            day: Some(18),
            hour: Some(12),
            minute: Some(0),
            second: None,
        };
        header.latitude = Some(48.25);
        header
    }

    #[test]
    fn test_significance_flags() {
        let sig = Significance::MANDATORY | Significance::TROPOPAUSE;
        assert!(sig.contains(Significance::MANDATORY));
        assert!(!sig.contains(Significance::SIG_WIND));
        assert!(Significance::NONE.is_empty());
        assert_eq!(sig.bits(), 0b10_0010);
    }

    #[test]
    fn test_significance_from_bufr() {
        assert_eq!(Significance::from_bufr_flags(0), Significance::NONE);
        assert_eq!(Significance::from_bufr_flags(1 << 17), Significance::SURFACE);
        assert_eq!(Significance::from_bufr_flags(1 << 16), Significance::MANDATORY);
        assert_eq!(
            Significance::from_bufr_flags((1 << 15) | (1 << 14)),
            Significance::TROPOPAUSE | Significance::MAX_WIND
        );
        assert_eq!(Significance::from_bufr_flags(1 << 12), Significance::SIG_TEMPERATURE);
        assert_eq!(Significance::from_bufr_flags(1), Significance::OTHER);
    }

    #[test]
    fn test_release_fields() {
        let header = complete_header();
        assert!(header.release.is_complete());
        let t = header.release.to_datetime().unwrap();
        assert_eq!(t.to_rfc3339(), "2021-02-18T12:00:00+00:00");

        let partial = ReleaseFields {
            minute: None,
            ..header.release.clone()
        };
        assert!(!partial.is_complete());
        assert!(partial.to_datetime().is_none());

        let bad = ReleaseFields {
            month: Some(13),
            ..header.release
        };
        assert!(bad.to_datetime().is_none());
    }

    #[test]
    fn test_report_format_strings() {
        assert_eq!(ReportFormat::Fm94.as_str(), "fm94");
        assert_eq!(ReportFormat::from_str("BUFR"), Some(ReportFormat::Fm94));
        assert_eq!(ReportFormat::from_str("fm35"), Some(ReportFormat::Fm35));
        assert_eq!(ReportFormat::from_str("grib"), None);
        assert_eq!(serde_json::to_string(&ReportFormat::Fm35).unwrap(), "\"fm35\"");
    }

    #[test]
    fn test_sort_by_pressure_is_stable() {
        let mut samples = vec![sample(500.0, 5500.0), sample(850.0, 1500.0), sample(500.0, 5600.0)];
        sort_by_pressure(&mut samples);
        assert_eq!(samples[0].pressure, 850.0);
        assert_eq!(samples[1].height, 5500.0);
        assert_eq!(samples[2].height, 5600.0);
    }

    #[test]
    fn test_qc_gate() {
        let config = ProcessingConfig::default();
        let header = complete_header();
        let nine: Vec<_> = (0..9).map(|i| sample(1000.0 - i as f64, i as f64)).collect();
        assert_eq!(
            qc_gate(&header, &nine, &config),
            Some(RejectReason::TooFewSamples { count: 9, min: 10 })
        );

        let ten: Vec<_> = (0..10).map(|i| sample(1000.0 - i as f64, i as f64)).collect();
        assert_eq!(qc_gate(&header, &ten, &config), None);

        let mut no_day = header.clone();
        no_day.release.day = None;
        assert_eq!(
            qc_gate(&no_day, &ten, &config),
            Some(RejectReason::MissingReleaseTime)
        );
    }

    #[test]
    fn test_displacement_guard() {
        let config = ProcessingConfig {
            max_sample_jump_m: 10_000.0,
            max_jump_violations: 1,
            ..Default::default()
        };
        let mut samples: Vec<_> = (0..6).map(|i| sample(1000.0 - i as f64, i as f64)).collect();
        assert!(check_displacement(&samples, 48.0, &config).is_ok());

        // one jump of ~1 degree is tolerated
        samples[3].lat_displacement = 1.0;
        samples[4].lat_displacement = 1.0;
        samples[5].lat_displacement = 1.0;
        assert!(check_displacement(&samples, 48.0, &config).is_ok());

        // back and forth makes three
        samples[4].lat_displacement = 0.0;
        let err = check_displacement(&samples, 48.0, &config).unwrap_err();
        assert!(matches!(
            err,
            IngestionError::DisplacementSanity { violations: 3, .. }
        ));
    }
}

//! FM-35 (netCDF) profile builder.
//!
//! One file carries many station records. Each record reports its levels in
//! independent sections; levels lacking either pressure or height get the
//! missing coordinate by inverting the barometric relation around a
//! reference level.

use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use super::fields::{ArrayCodec, ArraySet};
use super::{
    finish_profile, sort_by_pressure, DecodeContext, PathSource, ProfileDecoder, ProfileOutcome,
    RejectReason, ReleaseFields, ReportFormat, Sample, Significance, SondeInfo, SoundingHeader,
};
use crate::config::ProcessingConfig;
use crate::error::{IngestionError, Result};
use crate::kernel;
use crate::station::StationRegistry;

/// Variable whose first dimension is the number of station records.
const RECORD_VARIABLE: &str = "wmoStaNum";

/// Plausible range for the lowest reported temperature (K).
const SURFACE_TEMPERATURE_RANGE: std::ops::RangeInclusive<f64> = 200.0..=330.0;

/// Which quantities a section level must carry to be kept.
#[derive(Debug, Clone, Copy)]
struct Required {
    pressure: bool,
    height: bool,
    temperature: bool,
    wind: bool,
}

/// Variable names and rules of one level section.
#[derive(Debug, Clone, Copy)]
struct Section {
    count: &'static str,
    pressure: Option<&'static str>,
    height: Option<&'static str>,
    temperature: Option<&'static str>,
    spread: Option<&'static str>,
    wind_dir: Option<&'static str>,
    wind_speed: Option<&'static str>,
    flag: Significance,
    required: Required,
}

const MANDATORY: Section = Section {
    count: "numMand",
    pressure: Some("prMan"),
    height: Some("htMan"),
    temperature: Some("tpMan"),
    spread: Some("tdMan"),
    wind_dir: Some("wdMan"),
    wind_speed: Some("wsMan"),
    flag: Significance::MANDATORY,
    required: Required {
        pressure: true,
        height: false,
        temperature: true,
        wind: false,
    },
};

const SECTIONS: [Section; 5] = [
    MANDATORY,
    Section {
        count: "numSigT",
        pressure: Some("prSigT"),
        height: None,
        temperature: Some("tpSigT"),
        spread: Some("tdSigT"),
        wind_dir: None,
        wind_speed: None,
        flag: Significance::SIG_TEMPERATURE,
        required: Required {
            pressure: true,
            height: false,
            temperature: true,
            wind: false,
        },
    },
    Section {
        count: "numSigW",
        pressure: None,
        height: Some("htSigW"),
        temperature: None,
        spread: None,
        wind_dir: Some("wdSigW"),
        wind_speed: Some("wsSigW"),
        flag: Significance::SIG_WIND,
        required: Required {
            pressure: false,
            height: true,
            temperature: false,
            wind: true,
        },
    },
    Section {
        count: "numMwnd",
        pressure: Some("prMaxW"),
        height: None,
        temperature: None,
        spread: None,
        wind_dir: Some("wdMaxW"),
        wind_speed: Some("wsMaxW"),
        flag: Significance::MAX_WIND,
        required: Required {
            pressure: true,
            height: false,
            temperature: false,
            wind: true,
        },
    },
    Section {
        count: "numTrop",
        pressure: Some("prTrop"),
        height: None,
        temperature: Some("tpTrop"),
        spread: Some("tdTrop"),
        wind_dir: Some("wdTrop"),
        wind_speed: Some("wsTrop"),
        flag: Significance::TROPOPAUSE,
        required: Required {
            pressure: true,
            height: false,
            temperature: true,
            wind: false,
        },
    },
];

/// A section level before pressure/height completion.
#[derive(Debug, Clone, Copy)]
struct RawLevel {
    pressure: Option<f64>,
    gph: Option<f64>,
    temperature: Option<f64>,
    dewpoint: Option<f64>,
    wind_speed: Option<f64>,
    wind_direction: Option<f64>,
    flag: Significance,
}

/// Reference level `(p0, t0, h0)` with `h0` geometric.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Reference {
    pressure: f64,
    temperature: f64,
    height: f64,
}

/// Decoder for netCDF files, backed by an external array codec.
pub struct Fm35Decoder {
    codec: Box<dyn ArrayCodec>,
}

impl Fm35Decoder {
    pub fn new(codec: Box<dyn ArrayCodec>) -> Self {
        Self { codec }
    }
}

impl ProfileDecoder for Fm35Decoder {
    fn format(&self) -> ReportFormat {
        ReportFormat::Fm35
    }

    fn decode(&self, raw: &[u8], ctx: &DecodeContext<'_>) -> Result<Vec<ProfileOutcome>> {
        if raw.is_empty() {
            return Err(IngestionError::UnreadableSource("empty file".to_string()));
        }
        let arrays = self.codec.decode(raw)?;
        build_fm35_profiles(&arrays, ctx)
    }
}

fn epoch(seconds: f64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds as i64, 0).single()
}

fn read_section(arrays: &ArraySet, record: usize, section: &Section) -> Vec<RawLevel> {
    let Some(first_var) = section
        .pressure
        .or(section.height)
        .filter(|v| arrays.contains(v))
    else {
        return Vec::new();
    };
    let max_levels = arrays.levels(first_var).unwrap_or(0);
    let count = arrays
        .value(section.count, &[record])
        .map(|n| (n.max(0.0) as usize).min(max_levels))
        .unwrap_or(max_levels);

    let get = |var: Option<&str>, level: usize| var.and_then(|v| arrays.value(v, &[record, level]));

    (0..count)
        .filter_map(|level| {
            let temperature = get(section.temperature, level);
            let raw = RawLevel {
                pressure: get(section.pressure, level),
                gph: get(section.height, level),
                temperature,
                dewpoint: temperature
                    .zip(get(section.spread, level))
                    .map(|(t, spread)| t - spread),
                wind_speed: get(section.wind_speed, level),
                wind_direction: get(section.wind_dir, level),
                flag: section.flag,
            };
            let req = section.required;
            let ok = (!req.pressure || raw.pressure.is_some())
                && (!req.height || raw.gph.is_some())
                && (!req.temperature || raw.temperature.is_some())
                && (!req.wind || (raw.wind_speed.is_some() && raw.wind_direction.is_some()));
            ok.then_some(raw)
        })
        .collect()
}

/// First mandatory level with pressure, temperature and height.
fn reference_level(mandatory: &[RawLevel]) -> Option<Reference> {
    mandatory.iter().find_map(|l| {
        Some(Reference {
            pressure: l.pressure?,
            temperature: l.temperature?,
            height: kernel::geopotential_to_height(l.gph?),
        })
    })
}

/// Fill in missing pressure or height from the reference level.
fn complete_level(raw: &RawLevel, reference: &Reference) -> Option<Sample> {
    let height = match (raw.gph, raw.pressure) {
        (Some(gph), _) => kernel::geopotential_to_height(gph),
        (None, Some(p)) if p > 0.0 => kernel::barometric_height(
            reference.height,
            reference.temperature,
            reference.pressure,
            p,
        ),
        _ => return None,
    };
    let pressure = raw.pressure.unwrap_or_else(|| {
        kernel::barometric_pressure(
            reference.pressure,
            reference.temperature,
            height - reference.height,
        )
    });
    if !height.is_finite() || !pressure.is_finite() {
        return None;
    }

    Some(Sample {
        pressure,
        gpheight: raw
            .gph
            .unwrap_or_else(|| kernel::height_to_geopotential(height)),
        height,
        temperature: raw.temperature,
        dewpoint: raw.dewpoint,
        wind_speed: raw.wind_speed,
        wind_direction: raw.wind_direction,
        significance: raw.flag,
        time_offset: None,
        lat_displacement: 0.0,
        lon_displacement: 0.0,
    })
}

/// Assign simulated times and integrate the wind drift along the ascent.
fn simulate_track(samples: &mut [Sample], lat0: f64, h_start: f64, ascent_rate: f64) {
    let mut lat = lat0;
    let mut d_lon_total = 0.0;
    let mut prev_offset = 0.0;

    for sample in samples.iter_mut() {
        let offset = kernel::height_to_time_offset(h_start, sample.height, ascent_rate).max(0.0);
        sample.time_offset = Some(offset);
        if let Some((u, v)) = kernel::wind_to_uv(sample.wind_speed, sample.wind_direction) {
            let dt = offset - prev_offset;
            let (new_lat, d_lon) = kernel::displace_lat_lon(lat, 0.0, u, v, dt);
            lat = new_lat;
            d_lon_total += d_lon;
            prev_offset = offset;
        }
        sample.lat_displacement = lat - lat0;
        sample.lon_displacement = d_lon_total;
    }
}

fn build_record(
    arrays: &ArraySet,
    record: usize,
    config: &ProcessingConfig,
    stations: &StationRegistry,
) -> Result<ProfileOutcome> {
    let station_number = arrays
        .value(RECORD_VARIABLE, &[record])
        .map(|n| format!("{:05}", n as i64));
    let label = station_number
        .clone()
        .unwrap_or_else(|| format!("record {record}"));
    let known = station_number.as_deref().and_then(|id| stations.get(id));

    let latitude = arrays
        .value("staLat", &[record])
        .or_else(|| known.map(|s| s.lat));
    let longitude = arrays
        .value("staLon", &[record])
        .or_else(|| known.map(|s| s.lon));
    let elevation = arrays
        .value("staElev", &[record])
        .or_else(|| known.map(|s| s.elevation));

    let (Some(lat), Some(_)) = (latitude, longitude) else {
        debug!(station = %label, "Skipping station without location");
        return Ok(ProfileOutcome::Rejected {
            station: label,
            reason: RejectReason::NoLocation,
        });
    };

    let synoptic_time = arrays.value("synTime", &[record]).and_then(epoch);
    let release_time = arrays
        .value("relTime", &[record])
        .and_then(epoch)
        .or(synoptic_time);

    let mut header = SoundingHeader::new(ReportFormat::Fm35);
    header.station_number = station_number;
    header.synoptic_time = synoptic_time;
    header.release = release_time
        .map(ReleaseFields::from_datetime)
        .unwrap_or_default();
    header.latitude = latitude;
    header.longitude = longitude;
    header.station_height = elevation;
    header.sonde = SondeInfo {
        sonde_type: arrays.value("sondTyp", &[record]).map(|t| t as i64),
        ..Default::default()
    };

    let mandatory = read_section(arrays, record, &MANDATORY);
    let Some(reference) = reference_level(&mandatory) else {
        debug!(station = %label, "No mandatory level with pressure, temperature and height");
        return Ok(ProfileOutcome::Rejected {
            station: label,
            reason: RejectReason::NoReferenceLevel,
        });
    };

    let mut levels = mandatory;
    for section in &SECTIONS[1..] {
        levels.extend(read_section(arrays, record, section));
    }
    let mut samples: Vec<Sample> = levels
        .iter()
        .filter_map(|raw| complete_level(raw, &reference))
        .collect();
    sort_by_pressure(&mut samples);

    if let Some(t) = samples.iter().find_map(|s| s.temperature) {
        if !SURFACE_TEMPERATURE_RANGE.contains(&t) {
            debug!(station = %label, temperature = t, "Implausible lowest temperature");
            return Ok(ProfileOutcome::Rejected {
                station: label,
                reason: RejectReason::ImplausibleTemperature(t),
            });
        }
    }

    if config.track_reconstruction {
        let h_start = elevation.unwrap_or(reference.height);
        simulate_track(&mut samples, lat, h_start, config.ascent_rate);
        header.path_source = PathSource::Simulated;
    } else {
        header.path_source = PathSource::Fixed;
    }

    debug!(station = %label, samples = samples.len(), "Decoded netCDF station record");
    finish_profile(header, samples, config)
}

/// Build soundings for every station record of a decoded netCDF file.
///
/// A missing record variable is fatal for the file; records without a
/// location or reference level are skipped individually.
pub fn build_fm35_profiles(arrays: &ArraySet, ctx: &DecodeContext<'_>) -> Result<Vec<ProfileOutcome>> {
    let records = arrays
        .records(RECORD_VARIABLE)
        .ok_or_else(|| IngestionError::MissingCardinality(RECORD_VARIABLE.to_string()))?;

    (0..records)
        .map(|record| build_record(arrays, record, ctx.config, ctx.stations))
        .collect()
}

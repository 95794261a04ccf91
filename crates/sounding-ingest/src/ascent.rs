//! Ascent artifacts: identity, thinning and GeoJSON assembly.
//!
//! An ascent is a point feature collection. Collection properties carry the
//! station identity, release site and provenance; each feature is one
//! retained sample at `[lon, lat, height]`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::{defaults, ProcessingConfig};
use crate::error::{IngestionError, Result};
use crate::geojson::{Feature, FeatureCollection};
use crate::kernel::{self, round_to};
use crate::profile::{PathSource, Profile, ReportFormat, Sample, Significance, SondeInfo, SoundingHeader};
use crate::station::StationRegistry;

/// How a station id was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdType {
    /// WMO block and station number, or a listed station number
    Wmo,
    /// Ship or mobile land station call sign
    Mobile,
    /// Five-digit station number not in the registry
    Unregistered,
    /// No identifier, named after the release coordinates
    Location,
}

impl IdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wmo => "wmo",
            Self::Mobile => "mobile",
            Self::Unregistered => "unregistered",
            Self::Location => "location",
        }
    }

    /// Stations whose position does not move between ascents.
    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Wmo | Self::Unregistered)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationIdentity {
    pub id: String,
    pub id_type: IdType,
}

fn plausible_call_sign(id: &str) -> bool {
    !id.is_empty()
        && !id
            .chars()
            .any(|c| c.is_ascii_punctuation() || c.is_whitespace())
}

fn five_digit(id: &str) -> bool {
    id.len() == 5 && id.bytes().all(|b| b.is_ascii_digit())
}

/// Resolve the station identity of a header.
///
/// Precedence: WMO block+station, call sign, five-digit station number,
/// release coordinates. `None` only when none of them is available.
pub fn resolve_identity(header: &SoundingHeader, stations: &StationRegistry) -> Option<StationIdentity> {
    if let (Some(block), Some(station)) = (header.wmo_block, header.wmo_station) {
        return Some(StationIdentity {
            id: format!("{block:02}{station:03}"),
            id_type: IdType::Wmo,
        });
    }
    if let Some(id) = header.mobile_id.as_deref().filter(|id| plausible_call_sign(id)) {
        return Some(StationIdentity {
            id: id.to_string(),
            id_type: IdType::Mobile,
        });
    }
    if let Some(id) = header.station_number.as_deref().filter(|id| five_digit(id)) {
        let id_type = if stations.contains(id) {
            IdType::Wmo
        } else {
            IdType::Unregistered
        };
        return Some(StationIdentity {
            id: id.to_string(),
            id_type,
        });
    }
    match (header.latitude, header.longitude) {
        (Some(lat), Some(lon)) => Some(StationIdentity {
            id: format!("{lat:.3}:{lon:.3}"),
            id_type: IdType::Location,
        }),
        _ => None,
    }
}

/// Release elevation: station, ground, barometer, then first sample.
pub fn resolve_elevation(header: &SoundingHeader, samples: &[Sample]) -> Option<f64> {
    header
        .station_height
        .or(header.ground_height)
        .or(header.barometer_height)
        .or_else(|| {
            samples
                .first()
                .map(|s| kernel::geopotential_to_height(s.gpheight))
        })
        .filter(|e| e.is_finite())
}

/// Height-step thinning.
///
/// A sample is kept once it is at least `hstep` above the last kept sample;
/// flagged samples are always kept and do not move the reference height.
pub fn thin(samples: &[Sample], elevation: f64, hstep: f64) -> Vec<&Sample> {
    let mut previous = elevation - hstep;
    samples
        .iter()
        .filter(|s| {
            if !s.significance.is_empty() {
                return true;
            }
            if s.height >= previous + hstep {
                previous = s.height;
                true
            } else {
                false
            }
        })
        .collect()
}

/// Where an ascent came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Origin {
    /// File or archive member name
    pub member: String,
    pub archive: Option<String>,
    pub channel: Option<String>,
}

/// Sonde metadata as artifact properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SondeProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sonde_type: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sonde_serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sonde_frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sonde_psensor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sonde_tsensor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sonde_hsensor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sonde_humcorr: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sonde_gepot: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sonde_track: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sonde_measure: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sonde_swversion: Option<String>,
}

impl From<&SondeInfo> for SondeProperties {
    fn from(sonde: &SondeInfo) -> Self {
        Self {
            sonde_type: sonde.sonde_type,
            sonde_serial: sonde.serial.clone(),
            sonde_frequency: sonde.frequency.filter(|f| f.is_finite()),
            sonde_psensor: sonde.pressure_sensor,
            sonde_tsensor: sonde.temperature_sensor,
            sonde_hsensor: sonde.humidity_sensor,
            sonde_humcorr: sonde.humidity_correction,
            sonde_gepot: sonde.geopotential_calculation,
            sonde_track: sonde.tracking,
            sonde_measure: sonde.measuring_equipment,
            sonde_swversion: sonde.software_version.clone(),
        }
    }
}

/// Collection-level properties of an ascent artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AscentProperties {
    pub station_id: String,
    pub id_type: IdType,
    pub lat: f64,
    pub lon: f64,
    pub elevation: f64,
    /// Synoptic time (epoch seconds)
    pub syn_timestamp: i64,
    /// Release time (epoch seconds)
    #[serde(rename = "firstSeen")]
    pub first_seen: i64,
    /// Time of the last sample (epoch seconds)
    #[serde(rename = "lastSeen")]
    pub last_seen: i64,
    pub repfmt: ReportFormat,
    pub encoding: String,
    pub path_source: PathSource,
    pub fmt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_member: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_archive: Option<String>,
    /// Processing time (epoch seconds)
    pub processed: i64,
    #[serde(flatten)]
    pub sonde: SondeProperties,
}

/// Per-sample feature properties. Missing values are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleProperties {
    /// Sample time (epoch seconds)
    pub time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpheight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dewpoint: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_u: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_v: Option<f64>,
    #[serde(default, skip_serializing_if = "Significance::is_empty")]
    pub flags: Significance,
}

/// A canonical ascent artifact.
pub type Ascent = FeatureCollection<AscentProperties, SampleProperties>;

fn rounded(value: Option<f64>, decimals: i32) -> Option<f64> {
    value.filter(|v| v.is_finite()).map(|v| round_to(v, decimals))
}

fn sample_time(release: DateTime<Utc>, sample: &Sample) -> Result<DateTime<Utc>> {
    let Some(offset) = sample.time_offset.filter(|t| t.is_finite()) else {
        return Ok(release);
    };
    Duration::try_milliseconds((offset * 1000.0).round() as i64)
        .and_then(|dt| release.checked_add_signed(dt))
        .ok_or_else(|| {
            IngestionError::Validation(format!(
                "time offset {offset}s out of range at {} hPa",
                sample.pressure
            ))
        })
}

/// Build the artifact for an accepted profile.
///
/// Fails with [`IngestionError::Validation`] when the sounding has neither
/// identity nor position.
pub fn assemble(
    profile: &Profile,
    origin: &Origin,
    config: &ProcessingConfig,
    stations: &StationRegistry,
    processed: DateTime<Utc>,
) -> Result<Ascent> {
    let header = &profile.header;
    let identity = resolve_identity(header, stations).ok_or_else(|| {
        IngestionError::Validation(format!("{}: no identity or position", header.label()))
    })?;
    let registered = stations.get(&identity.id);

    let (lat, lon) = match (header.latitude, header.longitude, registered) {
        (Some(lat), Some(lon), _) => (lat, lon),
        (_, _, Some(st)) => (st.lat, st.lon),
        _ => {
            return Err(IngestionError::Validation(format!(
                "{}: no release position",
                identity.id
            )))
        }
    };
    let elevation = resolve_elevation(header, &profile.samples)
        .or(registered.map(|st| st.elevation))
        .ok_or_else(|| IngestionError::Validation(format!("{}: no elevation", identity.id)))?;
    let release = header.release.to_datetime().ok_or_else(|| {
        IngestionError::Validation(format!("{}: invalid release time", identity.id))
    })?;
    let synoptic = header.synoptic_time.unwrap_or(release);

    let features: Vec<Feature<SampleProperties>> = thin(&profile.samples, elevation, config.hstep)
        .into_iter()
        .map(|s| -> Result<Feature<SampleProperties>> {
            let time = sample_time(release, s)?.timestamp();
            let (u, v) = kernel::wind_to_uv(s.wind_speed, s.wind_direction).unzip();
            let coordinates = vec![
                round_to(kernel::normalize_lon(lon + s.lon_displacement), 6),
                round_to(lat + s.lat_displacement, 6),
                round_to(s.height, 1),
            ];
            Ok(Feature::point(
                coordinates,
                SampleProperties {
                    time,
                    gpheight: rounded(Some(s.gpheight), 1),
                    temp: rounded(s.temperature, 2),
                    dewpoint: rounded(s.dewpoint, 2),
                    pressure: rounded(Some(s.pressure), 2),
                    wind_u: rounded(u, 2),
                    wind_v: rounded(v, 2),
                    flags: s.significance,
                },
            ))
        })
        .collect::<Result<_>>()?;

    let last_seen = match profile.samples.last() {
        Some(s) => sample_time(release, s)?,
        None => release,
    };
    let duration = (last_seen - release).num_seconds();
    if duration > config.max_flight_duration_secs {
        error!(
            station = %identity.id,
            hours = duration as f64 / 3600.0,
            "Unreasonably long flight"
        );
    }

    debug!(
        station = %identity.id,
        id_type = identity.id_type.as_str(),
        samples = profile.samples.len(),
        retained = features.len(),
        "Assembled ascent"
    );

    let properties = AscentProperties {
        station_id: identity.id,
        id_type: identity.id_type,
        lat: round_to(lat, 6),
        lon: round_to(lon, 6),
        elevation: round_to(elevation, 1),
        syn_timestamp: synoptic.timestamp(),
        first_seen: release.timestamp(),
        last_seen: last_seen.timestamp(),
        repfmt: header.format,
        encoding: header.format.encoding().to_string(),
        path_source: header.path_source,
        fmt: defaults::FORMAT_VERSION,
        channel: origin.channel.clone(),
        origin_member: Some(origin.member.clone()).filter(|m| !m.is_empty()),
        origin_archive: origin.archive.clone(),
        processed: processed.timestamp(),
        sonde: SondeProperties::from(&header.sonde),
    };

    Ok(FeatureCollection::new(properties).with_features(features))
}

/// Structural check before persistence.
pub fn validate(ascent: &Ascent) -> Result<()> {
    let props = &ascent.properties;
    if ascent.features.is_empty() {
        return Err(IngestionError::Validation(format!(
            "{}: no features",
            props.station_id
        )));
    }
    if !(props.lat.is_finite() && props.lon.is_finite() && props.elevation.is_finite())
        || !(-90.0..=90.0).contains(&props.lat)
    {
        return Err(IngestionError::Validation(format!(
            "{}: invalid release position",
            props.station_id
        )));
    }
    if let Some(i) = ascent.features.iter().position(|f| !f.geometry.is_valid()) {
        return Err(IngestionError::Validation(format!(
            "{}: invalid geometry in feature {i}",
            props.station_id
        )));
    }
    Ok(())
}

/// Destination of an ascent below `destdir`.
///
/// `{repfmt}/{cc}/{subdivision}/{YYYY}/{MM}/{station}_{YYYYmmdd}_{HHMMSS}.geojson[.gz]`,
/// where `cc` is the first two characters of the station id and
/// `subdivision` the next three.
pub fn artifact_path(destdir: &Path, props: &AscentProperties, compress: bool) -> PathBuf {
    let id = &props.station_id;
    let cc: String = id.chars().take(2).collect();
    let subdivision: String = id.chars().skip(2).take(3).collect();
    let synoptic = Utc
        .timestamp_opt(props.syn_timestamp, 0)
        .single()
        .unwrap_or_default();

    let mut name = format!("{}_{}.geojson", id, synoptic.format("%Y%m%d_%H%M%S"));
    if compress {
        name.push_str(".gz");
    }
    destdir
        .join(props.repfmt.as_str())
        .join(cc)
        .join(subdivision)
        .join(synoptic.format("%Y").to_string())
        .join(synoptic.format("%m").to_string())
        .join(name)
}

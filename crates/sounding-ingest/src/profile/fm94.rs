//! FM-94 (BUFR) profile builder.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::debug;

use super::fields::{FieldCodec, FieldMap};
use super::{
    finish_profile, sort_by_pressure, to_utc, DecodeContext, PathSource, ProfileDecoder,
    ProfileOutcome, ReleaseFields, ReportFormat, Sample, Significance, SondeInfo,
    SoundingHeader,
};
use crate::config::ProcessingConfig;
use crate::error::{IngestionError, Result};
use crate::kernel;

/// Field holding the number of replicated levels.
pub const CARDINALITY_KEY: &str = "extendedDelayedDescriptorReplicationFactor";

const TIME_PERIOD: &str = "timePeriod";
const SIGNIFICANCE: &str = "extendedVerticalSoundingSignificance";

/// Per-level keys that must all be present for a level to be kept.
const REQUIRED_LEVEL_KEYS: [&str; 8] = [
    "pressure",
    "nonCoordinateGeopotentialHeight",
    "latitudeDisplacement",
    "longitudeDisplacement",
    "airTemperature",
    "dewpointTemperature",
    "windDirection",
    "windSpeed",
];

/// Decoder for BUFR messages, backed by an external field codec.
pub struct Fm94Decoder {
    codec: Box<dyn FieldCodec>,
}

impl Fm94Decoder {
    pub fn new(codec: Box<dyn FieldCodec>) -> Self {
        Self { codec }
    }
}

impl ProfileDecoder for Fm94Decoder {
    fn format(&self) -> ReportFormat {
        ReportFormat::Fm94
    }

    fn decode(&self, raw: &[u8], ctx: &DecodeContext<'_>) -> Result<Vec<ProfileOutcome>> {
        if raw.is_empty() {
            return Err(IngestionError::UnreadableSource("empty message".to_string()));
        }
        let fields = self.codec.decode(raw)?;
        Ok(vec![build_fm94_profile(&fields, ctx.config)?])
    }
}

/// Tracks header keys that were absent.
struct HeaderReader<'a> {
    fields: &'a FieldMap,
    missing: usize,
}

impl<'a> HeaderReader<'a> {
    fn int(&mut self, key: &str) -> Option<i64> {
        let v = self.fields.get_int(key);
        if v.is_none() {
            debug!(key, "Missing header key");
            self.missing += 1;
        }
        v
    }

    fn float(&mut self, key: &str) -> Option<f64> {
        let v = self.fields.get_float(key);
        if v.is_none() {
            debug!(key, "Missing header key");
            self.missing += 1;
        }
        v
    }

    fn text(&mut self, key: &str) -> Option<String> {
        let v = self.fields.get_text(key);
        if v.is_none() {
            self.missing += 1;
        }
        v
    }
}

/// Synoptic time from `typicalDate`/`typicalTime`, falling back to the
/// `typical*` integer components.
fn synoptic_time(fields: &FieldMap) -> Option<DateTime<Utc>> {
    if let (Some(date), Some(time)) = (fields.get_text("typicalDate"), fields.get_text("typicalTime")) {
        let date = NaiveDate::parse_from_str(&date, "%Y%m%d").ok();
        let time = NaiveTime::parse_from_str(&format!("{time:0>6}"), "%H%M%S").ok();
        if let (Some(date), Some(time)) = (date, time) {
            return Some(Utc.from_utc_datetime(&date.and_time(time)));
        }
    }
    to_utc(
        fields.get_int("typicalYear")?,
        fields.get_int("typicalMonth")?,
        fields.get_int("typicalDay")?,
        fields.get_int("typicalHour")?,
        fields.get_int("typicalMinute")?,
        fields.get_int("typicalSecond").unwrap_or(0),
    )
}

fn read_header(fields: &FieldMap) -> SoundingHeader {
    let mut r = HeaderReader { fields, missing: 0 };
    let mut header = SoundingHeader::new(ReportFormat::Fm94);

    header.wmo_block = r.int("blockNumber");
    header.wmo_station = r.int("stationNumber");
    header.release = ReleaseFields {
        year: r.int("year"),
        month: r.int("month"),
        day: r.int("day"),
        hour: r.int("hour"),
        minute: r.int("minute"),
        second: r.int("second"),
    };
    header.station_height = r.int("height").map(|h| h as f64);
    header.latitude = r.float("latitude");
    header.longitude = r.float("longitude");
    header.ground_height = r.float("heightOfStationGroundAboveMeanSeaLevel");
    header.barometer_height = r.float("heightOfBarometerAboveMeanSeaLevel");
    header.sonde = SondeInfo {
        sonde_type: r.int("radiosondeType"),
        serial: r.text("radiosondeSerialNumber"),
        frequency: r.float("radiosondeOperatingFrequency"),
        pressure_sensor: r.int("pressureSensorType"),
        temperature_sensor: r.int("temperatureSensorType"),
        humidity_sensor: r.int("humiditySensorType"),
        humidity_correction: r.int("correctionAlgorithmsForHumidityMeasurements"),
        geopotential_calculation: r.int("geopotentialHeightCalculation"),
        tracking: r.int("trackingTechniqueOrStatusOfSystem"),
        measuring_equipment: r.int("measuringEquipmentType"),
        software_version: r.text("softwareVersionNumber"),
    };
    // frequently absent, not worth a log line
    header.mobile_id = fields.get_text("shipOrMobileLandStationIdentifier");
    header.synoptic_time = synoptic_time(fields);
    if header.synoptic_time.is_none() {
        r.missing += 1;
    }
    header.path_source = PathSource::Origin;
    header.missing_fields = r.missing;
    header
}

fn read_level(fields: &FieldMap, level: usize) -> std::result::Result<Sample, &'static str> {
    let time = fields
        .get_float(&FieldMap::level_key(level, TIME_PERIOD))
        .ok_or(TIME_PERIOD)?;

    let mut values = [0.0; REQUIRED_LEVEL_KEYS.len()];
    for (slot, key) in values.iter_mut().zip(REQUIRED_LEVEL_KEYS) {
        *slot = fields
            .get_float(&FieldMap::level_key(level, key))
            .ok_or(key)?;
    }
    let [pressure, gph, lat_disp, lon_disp, temp, dewpoint, wind_dir, wind_speed] = values;

    let significance = fields
        .get_int(&FieldMap::level_key(level, SIGNIFICANCE))
        .map(Significance::from_bufr_flags)
        .unwrap_or_default();

    Ok(Sample {
        pressure: pressure / 100.0,
        gpheight: gph,
        height: kernel::geopotential_to_height(gph),
        temperature: Some(temp),
        dewpoint: Some(dewpoint),
        wind_speed: Some(wind_speed),
        wind_direction: Some(wind_dir),
        significance,
        time_offset: Some(time),
        lat_displacement: lat_disp,
        lon_displacement: lon_disp,
    })
}

/// Build one sounding from a decoded BUFR field map.
///
/// A missing cardinality field is fatal for the message; levels missing a
/// required value are skipped; the QC gate may still reject the result.
pub fn build_fm94_profile(fields: &FieldMap, config: &ProcessingConfig) -> Result<ProfileOutcome> {
    let num_levels = fields
        .get_int(CARDINALITY_KEY)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| IngestionError::MissingCardinality(CARDINALITY_KEY.to_string()))?;
    // every replicated level carries at least its own per-level keys
    if num_levels > fields.len() {
        return Err(IngestionError::UnreadableSource(format!(
            "{CARDINALITY_KEY} = {num_levels} exceeds the {} fields present",
            fields.len()
        )));
    }

    let header = read_header(fields);

    let mut samples = Vec::with_capacity(num_levels);
    let mut rejected_levels = 0usize;
    for level in 1..=num_levels {
        match read_level(fields, level) {
            Ok(sample) => samples.push(sample),
            Err(key) => {
                rejected_levels += 1;
                if rejected_levels == 1 {
                    debug!(level, key, "Skipping level with missing value");
                }
            }
        }
    }

    debug!(
        station = %header.label(),
        levels = num_levels,
        used = samples.len(),
        rejected = rejected_levels,
        missing_header_keys = header.missing_fields,
        "Decoded BUFR sounding"
    );

    sort_by_pressure(&mut samples);
    finish_profile(header, samples, config)
}

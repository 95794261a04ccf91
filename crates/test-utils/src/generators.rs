//! Synthetic radiosonde payloads in the JSON interchange formats.
//!
//! The ingester reads BUFR and netCDF through external dumpers that emit
//! JSON. These generators produce the same documents with predictable,
//! physically plausible values so tests can assert exact sample counts.

use std::io::{Cursor, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Map, Value};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Fill value used by generated netCDF documents.
pub const NETCDF_FILL_VALUE: f64 = 99999.0;

/// Parameters of a generated BUFR (FM-94) sounding.
#[derive(Debug, Clone)]
pub struct BufrSoundingSpec {
    pub block: Option<i64>,
    pub station: Option<i64>,
    pub mobile_id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub height: i64,
    pub levels: usize,
    /// year, month, day, hour, minute
    pub release: [i64; 5],
    /// `YYYYmmdd`
    pub typical_date: String,
    /// `HHMMSS`
    pub typical_time: String,
    pub serial: String,
}

impl Default for BufrSoundingSpec {
    /// Vienna (11035), 2021-02-18 12Z, released 11:05.
    fn default() -> Self {
        Self {
            block: Some(11),
            station: Some(35),
            mobile_id: None,
            latitude: 48.2486,
            longitude: 16.3564,
            height: 200,
            levels: 12,
            release: [2021, 2, 18, 11, 5],
            typical_date: "20210218".to_string(),
            typical_time: "120000".to_string(),
            serial: "S2740012".to_string(),
        }
    }
}

impl BufrSoundingSpec {
    /// Same sounding for another synoptic day.
    pub fn on_day(mut self, year: i64, month: i64, day: i64) -> Self {
        self.release[0] = year;
        self.release[1] = month;
        self.release[2] = day;
        self.typical_date = format!("{year:04}{month:02}{day:02}");
        self
    }
}

/// Build a flat BUFR field map.
///
/// Level `i` (1-based) is at `99000 - 1500 * (i - 1)` Pa and
/// `200 + 150 * (i - 1)` gpm, sampled every 30 s, drifting north-east.
pub fn bufr_message_json(spec: &BufrSoundingSpec) -> Value {
    let mut fields = Map::new();
    let mut put = |key: String, value: Value| {
        fields.insert(key, value);
    };

    put(
        "extendedDelayedDescriptorReplicationFactor".to_string(),
        json!([spec.levels]),
    );
    if let Some(block) = spec.block {
        put("blockNumber".to_string(), json!(block));
    }
    if let Some(station) = spec.station {
        put("stationNumber".to_string(), json!(station));
    }
    if let Some(id) = &spec.mobile_id {
        put("shipOrMobileLandStationIdentifier".to_string(), json!(id));
    }
    for (key, value) in ["year", "month", "day", "hour", "minute"]
        .iter()
        .zip(spec.release)
    {
        put(key.to_string(), json!(value));
    }
    put("latitude".to_string(), json!(spec.latitude));
    put("longitude".to_string(), json!(spec.longitude));
    put("height".to_string(), json!(spec.height));
    put("typicalDate".to_string(), json!(spec.typical_date));
    put("typicalTime".to_string(), json!(spec.typical_time));
    put("radiosondeSerialNumber".to_string(), json!(spec.serial));

    for i in 1..=spec.levels {
        let n = (i - 1) as i64;
        let level = |name: &str| format!("#{i}#{name}");
        put(level("timePeriod"), json!(30 * n));
        put(level("pressure"), json!(99000 - 1500 * n));
        put(level("nonCoordinateGeopotentialHeight"), json!(200 + 150 * n));
        put(level("latitudeDisplacement"), json!(0.001 * i as f64));
        put(level("longitudeDisplacement"), json!(0.002 * i as f64));
        put(level("airTemperature"), json!(275.0 - 0.9 * i as f64));
        put(level("dewpointTemperature"), json!(270.0 - i as f64));
        put(level("windDirection"), json!(270.0));
        put(level("windSpeed"), json!(8.0));
    }

    Value::Object(fields)
}

/// [`bufr_message_json`] serialized to bytes.
pub fn bufr_message_bytes(spec: &BufrSoundingSpec) -> Vec<u8> {
    bufr_message_json(spec).to_string().into_bytes()
}

/// One station record of a generated netCDF (FM-35) file.
#[derive(Debug, Clone)]
pub struct NetcdfStationSpec {
    pub wmo_id: i64,
    /// `None` writes the fill value
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    /// Synoptic time, seconds since the epoch
    pub syn_time: i64,
    /// Release time, seconds since the epoch
    pub rel_time: i64,
}

impl Default for NetcdfStationSpec {
    /// Oakland (72493), 2021-02-18 12Z, released 11:00.
    fn default() -> Self {
        Self {
            wmo_id: 72493,
            latitude: Some(37.73),
            longitude: Some(-122.21),
            elevation: Some(3.0),
            syn_time: 1_613_649_600,
            rel_time: 1_613_646_000,
        }
    }
}

const MANDATORY_PRESSURE: [f64; 8] = [1000.0, 925.0, 850.0, 700.0, 500.0, 400.0, 300.0, 250.0];
const MANDATORY_GPH: [f64; 8] = [110.0, 760.0, 1480.0, 3050.0, 5700.0, 7300.0, 9300.0, 10500.0];

fn or_fill(value: Option<f64>) -> f64 {
    value.unwrap_or(NETCDF_FILL_VALUE)
}

/// Build a netCDF array document with one record per station.
///
/// Every record has 8 mandatory levels, 3 significant temperature levels,
/// 2 significant wind levels, 1 max wind level and 1 tropopause level.
pub fn netcdf_file_json(stations: &[NetcdfStationSpec]) -> Value {
    let per_station = |f: &dyn Fn(&NetcdfStationSpec) -> Value| -> Value {
        Value::Array(stations.iter().map(f).collect())
    };

    let mut variables = Map::new();
    let mut put = |name: &str, value: Value| {
        variables.insert(name.to_string(), value);
    };

    put("wmoStaNum", per_station(&|s| json!(s.wmo_id)));
    put("staLat", per_station(&|s| json!(or_fill(s.latitude))));
    put("staLon", per_station(&|s| json!(or_fill(s.longitude))));
    put("staElev", per_station(&|s| json!(or_fill(s.elevation))));
    put("synTime", per_station(&|s| json!(s.syn_time)));
    put("relTime", per_station(&|s| json!(s.rel_time)));
    put("sondTyp", per_station(&|_| json!(52)));

    put("numMand", per_station(&|_| json!(8)));
    put("prMan", per_station(&|_| json!(MANDATORY_PRESSURE)));
    put("htMan", per_station(&|_| json!(MANDATORY_GPH)));
    put(
        "tpMan",
        per_station(&|_| json!((0..8).map(|i| 288.0 - 7.0 * i as f64).collect::<Vec<_>>())),
    );
    put("tdMan", per_station(&|_| json!(vec![3.0; 8])));
    put("wdMan", per_station(&|_| json!(vec![270.0; 8])));
    put("wsMan", per_station(&|_| json!(vec![10.0; 8])));

    put("numSigT", per_station(&|_| json!(3)));
    put("prSigT", per_station(&|_| json!([960.0, 780.0, 600.0])));
    put("tpSigT", per_station(&|_| json!([285.0, 275.0, 262.0])));
    put("tdSigT", per_station(&|_| json!([4.0, 5.0, 6.0])));

    put("numSigW", per_station(&|_| json!(2)));
    put("htSigW", per_station(&|_| json!([2000.0, 4000.0])));
    put("wdSigW", per_station(&|_| json!([270.0, 270.0])));
    put("wsSigW", per_station(&|_| json!([12.0, 12.0])));

    put("numMwnd", per_station(&|_| json!(1)));
    put("prMaxW", per_station(&|_| json!([270.0])));
    put("wdMaxW", per_station(&|_| json!([270.0])));
    put("wsMaxW", per_station(&|_| json!([40.0])));

    put("numTrop", per_station(&|_| json!(1)));
    put("prTrop", per_station(&|_| json!([230.0])));
    put("tpTrop", per_station(&|_| json!([220.0])));
    put("tdTrop", per_station(&|_| json!([10.0])));
    put("wdTrop", per_station(&|_| json!([260.0])));
    put("wsTrop", per_station(&|_| json!([35.0])));

    json!({
        "fill_value": NETCDF_FILL_VALUE,
        "variables": Value::Object(variables),
    })
}

/// [`netcdf_file_json`] serialized to bytes.
pub fn netcdf_file_bytes(stations: &[NetcdfStationSpec]) -> Vec<u8> {
    netcdf_file_json(stations).to_string().into_bytes()
}

/// Gzip a payload.
pub fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .expect("Failed to write gzip payload");
    encoder.finish().expect("Failed to finish gzip payload")
}

/// Build an in-memory zip archive from `(name, bytes)` members.
pub fn zip_archive(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut buffer);
        let options = SimpleFileOptions::default();
        for (name, data) in members {
            zip.start_file(*name, options)
                .expect("Failed to start zip member");
            zip.write_all(data).expect("Failed to write zip member");
        }
        zip.finish().expect("Failed to finish zip archive");
    }
    buffer.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bufr_message_levels() {
        let message = bufr_message_json(&BufrSoundingSpec::default());
        assert_eq!(message["extendedDelayedDescriptorReplicationFactor"], json!([12]));
        assert_eq!(message["#1#pressure"], json!(99000));
        assert_eq!(message["#12#timePeriod"], json!(330));
        assert!(message.get("#13#pressure").is_none());
    }

    #[test]
    fn test_bufr_spec_on_day() {
        let spec = BufrSoundingSpec::default().on_day(2021, 3, 1);
        assert_eq!(spec.typical_date, "20210301");
        assert_eq!(spec.release[..3], [2021, 3, 1]);
    }

    #[test]
    fn test_netcdf_records() {
        let doc = netcdf_file_json(&[
            NetcdfStationSpec::default(),
            NetcdfStationSpec {
                wmo_id: 72520,
                latitude: None,
                ..Default::default()
            },
        ]);
        let vars = &doc["variables"];
        assert_eq!(vars["wmoStaNum"], json!([72493, 72520]));
        assert_eq!(vars["staLat"][1], json!(NETCDF_FILL_VALUE));
        assert_eq!(vars["prMan"][0].as_array().unwrap().len(), 8);
        assert_eq!(vars["tdMan"][1], json!([3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0]));
        assert_eq!(vars["wdMan"][0].as_array().unwrap().len(), 8);
        assert_eq!(vars["wsMan"][0][7], json!(10.0));
    }

    #[test]
    fn test_gzip_magic() {
        let gz = gzip_bytes(b"{}");
        assert_eq!(&gz[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_zip_archive_magic() {
        let archive = zip_archive(&[("a.bin", b"one"), ("b.bin", b"two")]);
        assert_eq!(&archive[..4], b"PK\x03\x04");
    }
}

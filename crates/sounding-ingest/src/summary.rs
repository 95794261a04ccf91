//! Rolling summary of recent ascents per station.
//!
//! The summary is a point feature collection with one feature per station
//! and a time-descending list of ascents in each. It is rebuilt in full once
//! per batch: load, merge the batch's pending ascents, render, persist.
//!
//! [`merge`] is pure. Given the same index, pending list, registry,
//! retention and `now`, it produces the same index, and [`render`] the same
//! document byte for byte.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::ascent::{AscentProperties, IdType};
use crate::config::defaults;
use crate::error::Result;
use crate::geojson::{Feature, FeatureCollection};
use crate::kernel::round_to;
use crate::persist;
use crate::profile::ReportFormat;
use crate::station::StationRegistry;

/// One ascent as listed in the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AscentSummaryEntry {
    pub repfmt: ReportFormat,
    pub syn_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
}

impl AscentSummaryEntry {
    /// Summary entry for an artifact; coordinates only for moving stations.
    pub fn from_ascent(props: &AscentProperties) -> Self {
        let moving = !props.id_type.is_fixed();
        Self {
            repfmt: props.repfmt,
            syn_timestamp: props.syn_timestamp,
            lat: moving.then(|| round_to(props.lat, 6)),
            lon: moving.then(|| round_to(props.lon, 6)),
            elevation: moving.then(|| round_to(props.elevation, 1)),
        }
    }
}

/// A successfully persisted ascent waiting to be merged.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAscent {
    pub station_id: String,
    pub id_type: IdType,
    /// Release position, used to seed stations missing from the registry
    pub lat: f64,
    pub lon: f64,
    pub elevation: f64,
    pub entry: AscentSummaryEntry,
}

impl PendingAscent {
    pub fn from_ascent(props: &AscentProperties) -> Self {
        Self {
            station_id: props.station_id.clone(),
            id_type: props.id_type,
            lat: props.lat,
            lon: props.lon,
            elevation: props.elevation,
            entry: AscentSummaryEntry::from_ascent(props),
        }
    }
}

/// Summary state of one station.
#[derive(Debug, Clone, PartialEq)]
pub struct StationIndexEntry {
    pub station_id: String,
    pub id_type: IdType,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub elevation: Option<f64>,
    /// Time-descending, deduplicated, pruned
    pub ascents: Vec<AscentSummaryEntry>,
}

/// Station id → summary state, iterated in id order.
pub type StationIndex = BTreeMap<String, StationIndexEntry>;

/// Collection-level summary properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryProperties {
    pub fmt: u32,
    /// Generation time (epoch seconds)
    pub generated: i64,
    /// Retention window (seconds)
    pub max_age: u64,
}

/// Per-station feature properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationProperties {
    pub station_id: String,
    pub id_type: IdType,
    pub name: String,
    pub ascents: Vec<AscentSummaryEntry>,
}

pub type Summary = FeatureCollection<SummaryProperties, StationProperties>;

/// Counts reported after a summary update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub stations: usize,
    pub ascents: usize,
    pub updated: usize,
}

fn cutoff(retention: Duration, now: DateTime<Utc>) -> i64 {
    now.timestamp() - i64::try_from(retention.as_secs()).unwrap_or(i64::MAX)
}

/// Prune, order and deduplicate one station's ascents.
///
/// Keeps entries newer than `cutoff`, sorts by synoptic time descending and
/// format ascending, and keeps the first entry of each
/// `(syn_timestamp, repfmt)` pair.
pub fn normalize_ascents(ascents: &mut Vec<AscentSummaryEntry>, cutoff: i64) {
    ascents.retain(|a| a.syn_timestamp > cutoff);
    ascents.sort_by(|a, b| {
        b.syn_timestamp
            .cmp(&a.syn_timestamp)
            .then_with(|| a.repfmt.as_str().cmp(b.repfmt.as_str()))
    });
    ascents.dedup_by(|later, earlier| {
        later.syn_timestamp == earlier.syn_timestamp && later.repfmt == earlier.repfmt
    });
}

fn seed_station(pending: &PendingAscent, stations: &StationRegistry) -> StationIndexEntry {
    let (name, lat, lon, elevation) = match stations.get(&pending.station_id) {
        Some(st) => (st.name.clone(), st.lat, st.lon, Some(st.elevation)),
        None => (
            pending.station_id.clone(),
            pending.lat,
            pending.lon,
            Some(pending.elevation),
        ),
    };
    StationIndexEntry {
        station_id: pending.station_id.clone(),
        id_type: pending.id_type,
        name,
        lat,
        lon,
        elevation,
        ascents: Vec::new(),
    }
}

/// Merge a batch of pending ascents into the index.
///
/// Every station is re-normalized against `now - retention`; stations left
/// without ascents are dropped. Mobile stations move to the position of
/// their most recently merged ascent.
pub fn merge(
    mut index: StationIndex,
    pending: &[PendingAscent],
    stations: &StationRegistry,
    retention: Duration,
    now: DateTime<Utc>,
) -> StationIndex {
    for p in pending {
        let entry = index
            .entry(p.station_id.clone())
            .or_insert_with(|| seed_station(p, stations));

        if p.id_type == IdType::Mobile {
            if let (Some(lat), Some(lon)) = (p.entry.lat, p.entry.lon) {
                entry.lat = lat;
                entry.lon = lon;
                entry.elevation = p.entry.elevation;
            }
        }
        entry.ascents.push(p.entry.clone());
    }

    let cutoff = cutoff(retention, now);
    for entry in index.values_mut() {
        let before = entry.ascents.len();
        normalize_ascents(&mut entry.ascents, cutoff);
        if entry.ascents.len() != before {
            debug!(
                station = %entry.station_id,
                before,
                after = entry.ascents.len(),
                "Pruned ascents"
            );
        }
    }
    index.retain(|_, entry| !entry.ascents.is_empty());
    index
}

/// Render the index as a summary document.
pub fn render(index: &StationIndex, retention: Duration, now: DateTime<Utc>) -> Summary {
    let features = index
        .values()
        .map(|entry| {
            let mut coordinates = vec![entry.lon, entry.lat];
            coordinates.extend(entry.elevation);
            Feature::point(
                coordinates,
                StationProperties {
                    station_id: entry.station_id.clone(),
                    id_type: entry.id_type,
                    name: entry.name.clone(),
                    ascents: entry.ascents.clone(),
                },
            )
        })
        .collect();

    FeatureCollection::new(SummaryProperties {
        fmt: defaults::FORMAT_VERSION,
        generated: now.timestamp(),
        max_age: retention.as_secs(),
    })
    .with_features(features)
}

/// Rebuild the index from a summary document.
pub fn index_from_summary(summary: Summary) -> StationIndex {
    summary
        .features
        .into_iter()
        .filter_map(|feature| {
            let coords = feature.geometry.coordinates();
            let (lon, lat) = (*coords.first()?, *coords.get(1)?);
            let elevation = coords.get(2).copied();
            let props = feature.properties;
            Some((
                props.station_id.clone(),
                StationIndexEntry {
                    station_id: props.station_id,
                    id_type: props.id_type,
                    name: props.name,
                    lat,
                    lon,
                    elevation,
                    ascents: props.ascents,
                },
            ))
        })
        .collect()
}

/// Load the current summary; absent or unreadable means empty.
pub fn load(path: &Path) -> StationIndex {
    if !path.exists() {
        debug!(path = %path.display(), "No summary yet");
        return StationIndex::new();
    }
    match persist::read_json::<Summary>(path) {
        Ok(summary) => index_from_summary(summary),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable summary");
            StationIndex::new()
        }
    }
}

/// Load, merge, render and atomically persist the summary.
pub fn update(
    path: &Path,
    pending: &[PendingAscent],
    stations: &StationRegistry,
    retention: Duration,
    now: DateTime<Utc>,
) -> Result<MergeStats> {
    let index = merge(load(path), pending, stations, retention, now);
    let summary = render(&index, retention, now);
    persist::write_json(path, &summary)?;

    let stats = MergeStats {
        stations: index.len(),
        ascents: index.values().map(|e| e.ascents.len()).sum(),
        updated: pending
            .iter()
            .map(|p| p.station_id.as_str())
            .collect::<std::collections::BTreeSet<_>>()
            .len(),
    };
    info!(
        path = %path.display(),
        stations = stats.stations,
        ascents = stats.ascents,
        updated = stats.updated,
        "Summary written"
    );
    Ok(stats)
}

/// Parse `{station}_{YYYYmmdd}_{HHMMSS}.geojson[.gz]`.
pub fn parse_artifact_name(name: &str) -> Option<(String, DateTime<Utc>)> {
    let stem = name
        .strip_suffix(".geojson.gz")
        .or_else(|| name.strip_suffix(".geojson"))?;
    let (rest, time) = stem.rsplit_once('_')?;
    let (station, day) = rest.rsplit_once('_')?;
    if station.is_empty() {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(&format!("{day}{time}"), "%Y%m%d%H%M%S").ok()?;
    Some((station.to_string(), naive.and_utc()))
}

/// Rebuild the index from the artifact tree under `destdir`.
///
/// Registered stations are taken from the registry without reading the
/// artifact; all others are read for their identity and position.
pub fn rebuild_from_tree(
    destdir: &Path,
    stations: &StationRegistry,
    retention: Duration,
    now: DateTime<Utc>,
) -> Result<StationIndex> {
    let cutoff = cutoff(retention, now);
    let mut pending = Vec::new();
    let mut skipped = 0usize;

    for entry in WalkDir::new(destdir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let Some((station, synoptic)) = entry.file_name().to_str().and_then(parse_artifact_name)
        else {
            continue;
        };
        if synoptic.timestamp() <= cutoff {
            skipped += 1;
            continue;
        }
        let repfmt = entry
            .path()
            .strip_prefix(destdir)
            .ok()
            .and_then(|rel| rel.components().next())
            .and_then(|c| c.as_os_str().to_str())
            .and_then(ReportFormat::from_str);
        let Some(repfmt) = repfmt else {
            continue;
        };

        if let Some(st) = stations.get(&station) {
            pending.push(PendingAscent {
                station_id: station,
                id_type: IdType::Wmo,
                lat: st.lat,
                lon: st.lon,
                elevation: st.elevation,
                entry: AscentSummaryEntry {
                    repfmt,
                    syn_timestamp: synoptic.timestamp(),
                    lat: None,
                    lon: None,
                    elevation: None,
                },
            });
            continue;
        }

        match persist::read_ascent(entry.path()) {
            Ok(ascent) => pending.push(PendingAscent::from_ascent(&ascent.properties)),
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Skipping unreadable artifact");
            }
        }
    }

    info!(
        destdir = %destdir.display(),
        ascents = pending.len(),
        expired = skipped,
        "Scanned artifact tree"
    );
    Ok(merge(StationIndex::new(), &pending, stations, retention, now))
}

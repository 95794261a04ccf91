//! Ingester configuration.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sounding_ingest::{LockOptions, ProcessingConfig, ReportFormat};

/// Longest lock wait or poll interval accepted (one day).
pub const MAX_LOCK_SECS: f64 = 86_400.0;

/// A spool directory fed by one upstream channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name, recorded as the artifacts' provenance
    pub name: String,

    /// Directory scanned for new files
    pub spool_dir: PathBuf,

    /// Format of files whose extension is ambiguous
    #[serde(default)]
    pub format: Option<ReportFormat>,
}

/// Top-level ingester configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngesterConfig {
    /// Root of the artifact tree
    pub destdir: PathBuf,

    /// Summary document, defaults to `{destdir}/summary.geojson[.gz]`
    pub summary: Option<PathBuf>,

    /// Station registry JSON
    pub stations: Option<PathBuf>,

    /// Directory holding the lock files
    pub lock_dir: PathBuf,

    /// Maximum wait for a held lock (seconds)
    pub lock_timeout_secs: f64,

    /// Lock polling interval (seconds)
    pub poll_interval_secs: f64,

    pub channels: Vec<ChannelConfig>,

    pub processing: ProcessingConfig,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            destdir: PathBuf::from("/var/lib/radiosonde"),
            summary: None,
            stations: None,
            lock_dir: env::temp_dir(),
            lock_timeout_secs: 0.0,
            poll_interval_secs: 5.0,
            channels: Vec::new(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl IngesterConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        crate::config_loader::load_config(path)
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build a configuration from `RADIOSONDE_*` variables looked up by `var`.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = var("RADIOSONDE_DESTDIR") {
            config.destdir = PathBuf::from(v);
        }
        config.summary = var("RADIOSONDE_SUMMARY").map(PathBuf::from);
        config.stations = var("RADIOSONDE_STATIONS").map(PathBuf::from);
        if let Some(v) = var("RADIOSONDE_LOCK_DIR") {
            config.lock_dir = PathBuf::from(v);
        }
        if let Some(v) = var("RADIOSONDE_LOCK_TIMEOUT") {
            config.lock_timeout_secs = v
                .parse()
                .with_context(|| format!("Invalid RADIOSONDE_LOCK_TIMEOUT: {v}"))?;
        }
        if let Some(v) = var("RADIOSONDE_POLL_INTERVAL") {
            config.poll_interval_secs = v
                .parse()
                .with_context(|| format!("Invalid RADIOSONDE_POLL_INTERVAL: {v}"))?;
        }
        if let Some(v) = var("RADIOSONDE_RETENTION_DAYS") {
            config.processing.retention_days = v
                .parse()
                .with_context(|| format!("Invalid RADIOSONDE_RETENTION_DAYS: {v}"))?;
        }
        if let Some(v) = var("RADIOSONDE_WORKERS") {
            config.processing.workers = Some(
                v.parse()
                    .with_context(|| format!("Invalid RADIOSONDE_WORKERS: {v}"))?,
            );
        }
        if let Some(v) = var("RADIOSONDE_COMPRESS") {
            config.processing.compress = v == "true" || v == "1";
        }
        if let Some(v) = var("RADIOSONDE_CHANNELS") {
            config.channels = parse_channels(&v)?;
        }

        Ok(config)
    }

    /// Summary path, following the compression setting when not given.
    pub fn summary_path(&self) -> PathBuf {
        self.summary.clone().unwrap_or_else(|| {
            let name = if self.processing.compress {
                "summary.geojson.gz"
            } else {
                "summary.geojson"
            };
            self.destdir.join(name)
        })
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            timeout: Duration::try_from_secs_f64(self.lock_timeout_secs).unwrap_or_default(),
            poll_interval: Duration::try_from_secs_f64(self.poll_interval_secs)
                .ok()
                .filter(|d| !d.is_zero())
                .unwrap_or_else(|| LockOptions::default().poll_interval),
        }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (0.0..=MAX_LOCK_SECS).contains(&self.lock_timeout_secs),
            "lock_timeout_secs must be between 0 and {MAX_LOCK_SECS}, got {}",
            self.lock_timeout_secs
        );
        anyhow::ensure!(
            self.poll_interval_secs > 0.0 && self.poll_interval_secs <= MAX_LOCK_SECS,
            "poll_interval_secs must be positive and at most {MAX_LOCK_SECS}, got {}",
            self.poll_interval_secs
        );
        for channel in &self.channels {
            anyhow::ensure!(!channel.name.is_empty(), "Channel name cannot be empty");
        }
        self.processing.validate()?;
        Ok(())
    }
}

/// Parse `name=dir[:format]` entries separated by commas.
fn parse_channels(value: &str) -> Result<Vec<ChannelConfig>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let Some((name, rest)) = entry.split_once('=') else {
                bail!("Invalid channel '{entry}', expected name=dir[:format]");
            };
            let (dir, format) = match rest.rsplit_once(':') {
                Some((dir, fmt)) => match ReportFormat::from_str(fmt) {
                    Some(format) => (dir, Some(format)),
                    None => bail!("Unknown format '{fmt}' for channel {name}"),
                },
                None => (rest, None),
            };
            Ok(ChannelConfig {
                name: name.trim().to_string(),
                spool_dir: PathBuf::from(dir),
                format,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = IngesterConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config, IngesterConfig::default());
        assert_eq!(config.summary_path(), PathBuf::from("/var/lib/radiosonde/summary.geojson.gz"));
        assert_eq!(config.lock_options().timeout, Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_vars() {
        let config = IngesterConfig::from_vars(vars(&[
            ("RADIOSONDE_DESTDIR", "/data/sondes"),
            ("RADIOSONDE_LOCK_TIMEOUT", "30"),
            ("RADIOSONDE_POLL_INTERVAL", "0.5"),
            ("RADIOSONDE_WORKERS", "4"),
            ("RADIOSONDE_COMPRESS", "false"),
            ("RADIOSONDE_CHANNELS", "gisc=/spool/gisc, noaa=/spool/noaa:fm35"),
        ]))
        .unwrap();

        assert_eq!(config.summary_path(), PathBuf::from("/data/sondes/summary.geojson"));
        assert_eq!(config.lock_options().poll_interval, Duration::from_millis(500));
        assert_eq!(config.processing.workers, Some(4));
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].format, None);
        assert_eq!(config.channels[1].name, "noaa");
        assert_eq!(config.channels[1].format, Some(ReportFormat::Fm35));
    }

    #[test]
    fn test_invalid_values() {
        assert!(IngesterConfig::from_vars(vars(&[("RADIOSONDE_WORKERS", "many")])).is_err());
        assert!(IngesterConfig::from_vars(vars(&[("RADIOSONDE_CHANNELS", "nodir")])).is_err());
        assert!(IngesterConfig::from_vars(vars(&[("RADIOSONDE_CHANNELS", "a=/x:grib")])).is_err());

        let config = IngesterConfig {
            poll_interval_secs: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lock_durations_are_bounded() {
        for (timeout, poll) in [(1e300, 5.0), (f64::INFINITY, 5.0), (f64::NAN, 5.0), (0.0, 1e300), (0.0, f64::NAN)] {
            let config = IngesterConfig {
                lock_timeout_secs: timeout,
                poll_interval_secs: poll,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{timeout} / {poll}");
            // never panics, even unvalidated
            let options = config.lock_options();
            assert!(!options.poll_interval.is_zero());
        }

        let config = IngesterConfig {
            lock_timeout_secs: MAX_LOCK_SECS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.lock_options().timeout, Duration::from_secs(86_400));
    }
}

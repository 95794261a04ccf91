//! Radiosonde ingester service.
//!
//! Decodes radiosonde soundings from spool directories or explicit files,
//! writes per-ascent GeoJSON artifacts and updates the rolling summary.
//! Exits non-zero on lock timeout or any run-level error; individual file
//! failures are recorded in sidecar markers instead.

mod config;
mod config_loader;
mod ingest;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::IngesterConfig;
use ingest::IngestionPipeline;

#[derive(Parser, Debug)]
#[command(name = "radiosonde-ingester")]
#[command(about = "Radiosonde sounding ingester (FM-94 BUFR, FM-35 netCDF)")]
struct Args {
    /// Configuration file path (YAML); environment variables otherwise
    #[arg(short, long, env = "RADIOSONDE_CONFIG")]
    config: Option<PathBuf>,

    /// Root of the artifact tree
    #[arg(long)]
    destdir: Option<PathBuf>,

    /// Summary document path
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Station registry JSON
    #[arg(long)]
    stations: Option<PathBuf>,

    /// Directory for lock files
    #[arg(long)]
    lock_dir: Option<PathBuf>,

    /// Maximum wait for a held lock (seconds, 0 fails immediately)
    #[arg(long)]
    lock_timeout: Option<f64>,

    /// Lock polling interval (seconds)
    #[arg(long)]
    poll_interval: Option<f64>,

    /// Reprocess files regardless of their markers
    #[arg(long)]
    force: bool,

    /// Only emit ascents for this station id
    #[arg(long)]
    station: Option<String>,

    /// Write uncompressed artifacts and summary
    #[arg(long)]
    no_compress: bool,

    /// Decode worker count (default: available parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// Rebuild the summary from the artifact tree and exit
    #[arg(long)]
    rebuild_summary: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Files to ingest instead of the configured channels
    files: Vec<PathBuf>,
}

impl Args {
    /// Command-line values override configured ones.
    fn apply(&self, config: &mut IngesterConfig) {
        if let Some(destdir) = &self.destdir {
            config.destdir = destdir.clone();
        }
        if let Some(summary) = &self.summary {
            config.summary = Some(summary.clone());
        }
        if let Some(stations) = &self.stations {
            config.stations = Some(stations.clone());
        }
        if let Some(lock_dir) = &self.lock_dir {
            config.lock_dir = lock_dir.clone();
        }
        if let Some(timeout) = self.lock_timeout {
            config.lock_timeout_secs = timeout;
        }
        if let Some(poll) = self.poll_interval {
            config.poll_interval_secs = poll;
        }
        if let Some(workers) = self.workers {
            config.processing.workers = Some(workers);
        }
        if self.station.is_some() {
            config.processing.station_filter = self.station.clone();
        }
        config.processing.force |= self.force;
        if self.no_compress {
            config.processing.compress = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting radiosonde ingester");

    // Load configuration
    let mut config = match &args.config {
        Some(path) => IngesterConfig::from_yaml(path)?,
        None => IngesterConfig::from_env()?,
    };
    args.apply(&mut config);
    config.validate()?;
    info!(
        destdir = %config.destdir.display(),
        channels = ?config.channels.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        files = args.files.len(),
        "Loaded configuration"
    );

    let pipeline = IngestionPipeline::new(&config)?;
    let now = Utc::now();

    if args.rebuild_summary {
        return pipeline.rebuild_summary(now).await;
    }

    pipeline.run(&args.files, now).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_config() {
        let args = Args::parse_from([
            "radiosonde-ingester",
            "--destdir",
            "/tmp/out",
            "--lock-timeout",
            "2.5",
            "--station",
            "11035",
            "--no-compress",
            "--force",
            "a.bin",
            "b.zip",
        ]);
        let mut config = IngesterConfig::default();
        args.apply(&mut config);

        assert_eq!(config.destdir, PathBuf::from("/tmp/out"));
        assert_eq!(config.lock_timeout_secs, 2.5);
        assert_eq!(config.processing.station_filter.as_deref(), Some("11035"));
        assert!(!config.processing.compress);
        assert!(config.processing.force);
        assert_eq!(args.files.len(), 2);
        assert_eq!(config.summary_path(), PathBuf::from("/tmp/out/summary.geojson"));
    }

    #[test]
    fn test_defaults_leave_config_alone() {
        let args = Args::parse_from(["radiosonde-ingester"]);
        let mut config = IngesterConfig::default();
        args.apply(&mut config);
        assert_eq!(config, IngesterConfig::default());
    }
}

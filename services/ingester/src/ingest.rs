//! Ingestion pipeline: one locked decode-then-merge run over every source.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use sounding_ingest::{
    discover_sources, lock_path, BatchReport, Ingester, PidLock, SourceFile, StationRegistry,
};

use crate::config::IngesterConfig;

/// Lock serializing whole runs against the destination tree.
pub const RUN_LOCK: &str = "ingest";

/// Main ingestion pipeline.
pub struct IngestionPipeline {
    config: IngesterConfig,
    ingester: Arc<Ingester>,
}

impl IngestionPipeline {
    /// Create the pipeline, loading the station registry if configured.
    pub fn new(config: &IngesterConfig) -> Result<Self> {
        let stations = match &config.stations {
            Some(path) => StationRegistry::from_json_file(path)
                .with_context(|| format!("Failed to load station registry {:?}", path))?,
            None => {
                warn!("No station registry configured, identities fall back to report data");
                StationRegistry::default()
            }
        };

        let ingester = Ingester::new(
            Arc::new(stations),
            config.processing.clone(),
            config.destdir.clone(),
        );
        Ok(Self {
            config: config.clone(),
            ingester: Arc::new(ingester),
        })
    }

    /// Explicit files, or everything waiting in the configured channels.
    pub fn sources(&self, files: &[PathBuf]) -> Vec<SourceFile> {
        if !files.is_empty() {
            return files
                .iter()
                .filter_map(|path| match SourceFile::new(path, None, None) {
                    Ok(source) => Some(source),
                    Err(e) => {
                        warn!(error = %e, "Skipping file");
                        None
                    }
                })
                .collect();
        }

        let mut sources = Vec::new();
        for channel in &self.config.channels {
            let found = discover_sources(&channel.spool_dir, channel.format, Some(&channel.name));
            debug!(channel = %channel.name, sources = found.len(), "Scanned spool");
            sources.extend(found);
        }
        sources
    }

    async fn lock(&self) -> Result<PidLock> {
        let path = lock_path(&self.config.lock_dir, RUN_LOCK);
        PidLock::acquire(&path, &self.config.lock_options())
            .await
            .with_context(|| format!("Another run holds {}", path.display()))
    }

    /// Decode every source, then merge the summary once, all under the run
    /// lock.
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn run(&self, files: &[PathBuf], now: DateTime<Utc>) -> Result<BatchReport> {
        let _lock = self.lock().await?;

        let sources = self.sources(files);
        let total = sources.len();
        let ingester = Arc::clone(&self.ingester);
        let reports = tokio::task::spawn_blocking(move || ingester.run_batch(&sources, now))
            .await
            .context("Decode task panicked")??;

        let ingester = Arc::clone(&self.ingester);
        let summary_path = self.config.summary_path();
        let report = tokio::task::spawn_blocking(move || {
            ingester.summarize(total, reports, &summary_path, now)
        })
        .await
        .context("Summary task panicked")??;

        info!(
            processed = report.processed,
            failed = report.failed,
            skipped = report.skipped,
            artifacts = report.artifacts,
            stations = report.summary.stations,
            "Ingestion run completed"
        );
        Ok(report)
    }

    /// Rebuild the summary from the artifact tree.
    pub async fn rebuild_summary(&self, now: DateTime<Utc>) -> Result<()> {
        let _lock = self.lock().await?;

        let ingester = Arc::clone(&self.ingester);
        let summary_path = self.config.summary_path();
        tokio::task::spawn_blocking(move || ingester.rebuild_summary(&summary_path, now))
            .await
            .context("Rebuild task panicked")??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use chrono::TimeZone;
    use sounding_ingest::LockOptions;
    use test_utils::{bufr_message_bytes, temp_test_dir, write_file, BufrSoundingSpec};

    fn config(root: &std::path::Path) -> IngesterConfig {
        IngesterConfig {
            destdir: root.join("out"),
            lock_dir: root.join("locks"),
            channels: vec![
                ChannelConfig {
                    name: "gisc".to_string(),
                    spool_dir: root.join("spool/gisc"),
                    format: None,
                },
                ChannelConfig {
                    name: "noaa".to_string(),
                    spool_dir: root.join("spool/noaa"),
                    format: None,
                },
            ],
            ..Default::default()
        }
    }

    fn oakland() -> BufrSoundingSpec {
        BufrSoundingSpec {
            block: Some(72),
            station: Some(493),
            ..Default::default()
        }
    }

    #[test]
    fn test_sources_from_channels_and_files() {
        let dir = temp_test_dir();
        write_file(&dir.path().join("spool/gisc"), "a.bin", b"");
        write_file(&dir.path().join("spool/noaa"), "b.bin", b"");
        let pipeline = IngestionPipeline::new(&config(dir.path())).unwrap();

        let sources = pipeline.sources(&[]);
        let channels: Vec<_> = sources.iter().map(|s| s.channel.as_deref()).collect();
        assert_eq!(channels, vec![Some("gisc"), Some("noaa")]);

        let sources = pipeline.sources(&[PathBuf::from("x.bin"), PathBuf::from("notes.txt")]);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].channel, None);
    }

    #[tokio::test]
    async fn test_run_merges_all_channels_once() {
        let dir = temp_test_dir();
        write_file(
            &dir.path().join("spool/gisc"),
            "vienna.bin",
            &bufr_message_bytes(&BufrSoundingSpec::default()),
        );
        write_file(&dir.path().join("spool/noaa"), "oakland.bin", &bufr_message_bytes(&oakland()));
        let config = config(dir.path());
        let pipeline = IngestionPipeline::new(&config).unwrap();

        let now = Utc.with_ymd_and_hms(2021, 2, 19, 6, 0, 0).unwrap();
        let report = pipeline.run(&[], now).await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.summary.stations, 2);
        assert_eq!(report.summary.updated, 2);
        assert!(config.summary_path().exists());
        assert!(!lock_path(&config.lock_dir, RUN_LOCK).exists());
    }

    #[tokio::test]
    async fn test_held_run_lock_blocks_explicit_files() {
        let dir = temp_test_dir();
        let file = write_file(
            &dir.path().join("spool/gisc"),
            "vienna.bin",
            &bufr_message_bytes(&BufrSoundingSpec::default()),
        );
        let config = config(dir.path());
        let pipeline = IngestionPipeline::new(&config).unwrap();

        let held = PidLock::acquire(lock_path(&config.lock_dir, RUN_LOCK), &LockOptions::default())
            .await
            .unwrap();
        assert!(pipeline.run(&[file.clone()], Utc::now()).await.is_err());
        assert!(pipeline.rebuild_summary(Utc::now()).await.is_err());
        assert!(!file.with_extension("processed").exists());
        assert!(!config.summary_path().exists());

        held.release();
        let report = pipeline.run(&[file.clone()], Utc::now()).await.unwrap();
        assert_eq!(report.processed, 1);
        assert!(file.with_extension("processed").exists());
    }
}

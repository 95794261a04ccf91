//! Batch ingestion: per-file state machine, parallel decode, summary merge.
//!
//! Each source moves `Unseen → Processing → {Processed, Failed}`. Decode
//! work for independent files fans out over a bounded rayon pool; the
//! summary merge runs once, single-threaded, after every worker is done.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::archive;
use crate::ascent::{self, Origin};
use crate::config::ProcessingConfig;
use crate::error::{IngestionError, Result};
use crate::marker::{self, ProcessingState};
use crate::persist;
use crate::profile::{
    DecodeContext, Fm35Decoder, Fm94Decoder, JsonArrayCodec, JsonFieldCodec, ProfileDecoder,
    ProfileOutcome, ReportFormat,
};
use crate::source::{SourceFile, SourceKind};
use crate::station::StationRegistry;
use crate::summary::{self, MergeStats, PendingAscent};

/// Outcome of processing one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub path: PathBuf,
    pub state: ProcessingState,
    /// Artifacts written
    pub artifacts: Vec<PathBuf>,
    /// Ascents to merge into the summary
    pub pending: Vec<PendingAscent>,
    /// Soundings rejected by QC
    pub rejected: usize,
    /// Ascents dropped by structural validation or the station filter
    pub discarded: usize,
    pub error: Option<String>,
}

impl FileReport {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            state: ProcessingState::Processing,
            artifacts: Vec::new(),
            pending: Vec::new(),
            rejected: 0,
            discarded: 0,
            error: None,
        }
    }

    fn fail(&mut self, err: &IngestionError) {
        self.state = ProcessingState::Failed;
        self.error = Some(err.to_string());
    }
}

/// Per-run counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub processed: usize,
    pub failed: usize,
    /// Sources skipped because their markers are current
    pub skipped: usize,
    pub artifacts: usize,
    pub rejected: usize,
    pub summary: MergeStats,
}

/// Core ingester for radiosonde soundings.
///
/// Holds one decoder per report format, the read-only station registry and
/// the processing configuration.
pub struct Ingester {
    fm94: Box<dyn ProfileDecoder>,
    fm35: Box<dyn ProfileDecoder>,
    stations: Arc<StationRegistry>,
    config: ProcessingConfig,
    destdir: PathBuf,
}

impl Ingester {
    /// Create an ingester with the JSON interchange codecs.
    pub fn new(stations: Arc<StationRegistry>, config: ProcessingConfig, destdir: impl Into<PathBuf>) -> Self {
        Self {
            fm94: Box::new(Fm94Decoder::new(Box::new(JsonFieldCodec::default()))),
            fm35: Box::new(Fm35Decoder::new(Box::new(JsonArrayCodec))),
            stations,
            config,
            destdir: destdir.into(),
        }
    }

    /// Replace the decoder for the decoder's own format.
    pub fn with_decoder(mut self, decoder: Box<dyn ProfileDecoder>) -> Self {
        match decoder.format() {
            ReportFormat::Fm94 => self.fm94 = decoder,
            ReportFormat::Fm35 => self.fm35 = decoder,
        }
        self
    }

    fn decoder(&self, format: ReportFormat) -> &dyn ProfileDecoder {
        match format {
            ReportFormat::Fm94 => self.fm94.as_ref(),
            ReportFormat::Fm35 => self.fm35.as_ref(),
        }
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn stations(&self) -> &StationRegistry {
        &self.stations
    }

    pub fn destdir(&self) -> &Path {
        &self.destdir
    }

    /// Decode one unit and persist its accepted ascents.
    ///
    /// Decode and persistence errors fail the unit; validation failures and
    /// filtered stations only discard the affected ascent.
    fn process_unit(
        &self,
        raw: &[u8],
        format: ReportFormat,
        origin: &Origin,
        now: DateTime<Utc>,
        report: &mut FileReport,
    ) -> Result<()> {
        let ctx = DecodeContext {
            config: &self.config,
            stations: &self.stations,
        };

        for outcome in self.decoder(format).decode(raw, &ctx)? {
            let profile = match outcome {
                ProfileOutcome::Accepted(profile) => profile,
                ProfileOutcome::Rejected { station, reason } => {
                    debug!(station = %station, reason = %reason, "QC rejected");
                    report.rejected += 1;
                    continue;
                }
            };

            let ascent = match ascent::assemble(&profile, origin, &self.config, &self.stations, now)
                .and_then(|a| ascent::validate(&a).map(|_| a))
            {
                Ok(ascent) => ascent,
                Err(IngestionError::Validation(msg)) => {
                    warn!(member = %origin.member, reason = %msg, "Discarding ascent");
                    report.discarded += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let props = &ascent.properties;
            if let Some(wanted) = &self.config.station_filter {
                if wanted != &props.station_id {
                    debug!(station = %props.station_id, "Filtered out");
                    report.discarded += 1;
                    continue;
                }
            }

            let path = ascent::artifact_path(&self.destdir, props, self.config.compress);
            persist::write_json(&path, &ascent)?;
            debug!(
                station = %props.station_id,
                features = ascent.features.len(),
                path = %path.display(),
                "Wrote ascent"
            );
            report.pending.push(PendingAscent::from_ascent(props));
            report.artifacts.push(path);
        }
        Ok(())
    }

    fn read_source(&self, source: &SourceFile) -> Result<Vec<u8>> {
        let raw = std::fs::read(&source.path)?;
        if source.is_gzipped() {
            persist::decompress_gzip(&raw)
                .map_err(|e| IngestionError::UnreadableSource(format!("{}: {e}", source.name())))
        } else {
            Ok(raw)
        }
    }

    /// Process one source file. Never fails; the outcome is in the report.
    #[instrument(skip_all, fields(path = %source.path.display(), format = %source.format))]
    pub fn process_file(&self, source: &SourceFile, now: DateTime<Utc>) -> FileReport {
        let mut report = FileReport::new(&source.path);

        let raw = match self.read_source(source) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to read source");
                report.fail(&e);
                return report;
            }
        };

        match source.kind {
            SourceKind::Single => {
                let origin = Origin {
                    member: source.name(),
                    archive: None,
                    channel: source.channel.clone(),
                };
                if let Err(e) = self.process_unit(&raw, source.format, &origin, now, &mut report) {
                    warn!(error = %e, "Failed to process source");
                    report.fail(&e);
                    return report;
                }
            }
            SourceKind::Archive => {
                let members = match archive::read_members(&raw) {
                    Ok(members) => members,
                    Err(e) => {
                        warn!(error = %e, "Unreadable archive");
                        report.fail(&e);
                        return report;
                    }
                };

                let mut failed = 0usize;
                for member in &members {
                    let origin = Origin {
                        member: member.name.clone(),
                        archive: Some(source.name()),
                        channel: source.channel.clone(),
                    };
                    let result = match &member.data {
                        Ok(data) => self.process_unit(data, source.format, &origin, now, &mut report),
                        Err(e) => Err(IngestionError::UnreadableSource(e.to_string())),
                    };
                    if let Err(e) = result {
                        warn!(member = %member.name, error = %e, "Failed to process archive member");
                        failed += 1;
                        if report.error.is_none() {
                            report.error = Some(format!("{}: {e}", member.name));
                        }
                    }
                }
                if failed > 0 {
                    report.state = ProcessingState::Failed;
                    info!(members = members.len(), failed, "Archive partially processed");
                    return report;
                }
            }
        }

        report.state = ProcessingState::Processed;
        debug!(
            artifacts = report.artifacts.len(),
            rejected = report.rejected,
            "Processed source"
        );
        report
    }

    /// Decode all sources that need processing.
    ///
    /// Reports come back in source order. Markers are left alone until
    /// [`Ingester::summarize`] has merged the batch.
    pub fn run_batch(&self, sources: &[SourceFile], now: DateTime<Utc>) -> Result<Vec<FileReport>> {
        let todo: Vec<&SourceFile> = sources
            .iter()
            .filter(|s| marker::needs_processing(&s.path, self.config.force))
            .collect();
        debug!(total = sources.len(), todo = todo.len(), "Selected sources");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_count())
            .thread_name(|i| format!("decode-{i}"))
            .build()
            .map_err(|e| IngestionError::Other(anyhow!("Failed to build worker pool: {e}")))?;

        let reports = pool.install(|| {
            todo.par_iter()
                .map(|source| self.process_file(source, now))
                .collect::<Vec<_>>()
        });
        Ok(reports)
    }

    /// One complete run: decode, then a single summary merge and write.
    pub fn run_once(
        &self,
        sources: &[SourceFile],
        summary_path: &Path,
        now: DateTime<Utc>,
    ) -> Result<BatchReport> {
        let reports = self.run_batch(sources, now)?;
        self.summarize(sources.len(), reports, summary_path, now)
    }

    /// Merge the pending ascents of a decoded batch into the summary, then
    /// record each source's marker.
    ///
    /// `total` is the number of sources offered to [`Ingester::run_batch`].
    /// When the summary cannot be written no marker is recorded, so the next
    /// run decodes the same sources again.
    pub fn summarize(
        &self,
        total: usize,
        reports: Vec<FileReport>,
        summary_path: &Path,
        now: DateTime<Utc>,
    ) -> Result<BatchReport> {
        let mut batch = BatchReport {
            skipped: total.saturating_sub(reports.len()),
            ..Default::default()
        };
        let mut pending = Vec::new();
        let mut outcomes = Vec::with_capacity(reports.len());
        for report in reports {
            match report.state {
                ProcessingState::Failed => batch.failed += 1,
                _ => batch.processed += 1,
            }
            batch.artifacts += report.artifacts.len();
            batch.rejected += report.rejected;
            pending.extend(report.pending);
            outcomes.push((report.path, report.state));
        }

        batch.summary = summary::update(
            summary_path,
            &pending,
            &self.stations,
            self.config.retention(),
            now,
        )?;

        for (path, state) in &outcomes {
            if let Err(e) = marker::record(path, *state) {
                warn!(path = %path.display(), error = %e, "Failed to record marker");
            }
        }

        info!(
            processed = batch.processed,
            failed = batch.failed,
            skipped = batch.skipped,
            artifacts = batch.artifacts,
            rejected = batch.rejected,
            stations_updated = batch.summary.updated,
            "Batch complete"
        );
        Ok(batch)
    }

    /// Rebuild the summary from the artifact tree and persist it.
    pub fn rebuild_summary(&self, summary_path: &Path, now: DateTime<Utc>) -> Result<MergeStats> {
        let retention = self.config.retention();
        let index = summary::rebuild_from_tree(&self.destdir, &self.stations, retention, now)?;
        persist::write_json(summary_path, &summary::render(&index, retention, now))?;

        let stats = MergeStats {
            stations: index.len(),
            ascents: index.values().map(|e| e.ascents.len()).sum(),
            updated: index.len(),
        };
        info!(
            path = %summary_path.display(),
            stations = stats.stations,
            ascents = stats.ascents,
            "Summary rebuilt"
        );
        Ok(stats)
    }
}

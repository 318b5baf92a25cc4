//! Concurrent decode coordination and postprocessing
//!
//! [`DecodeCoordinator`] decodes every row of one result file with a bounded
//! number of rows in flight. Each row runs as its own task, so a failing or
//! panicking decode only loses that row. Records are collected in
//! completion order.
//!
//! [`Postprocessor`] walks a directory of filtered result files one file at
//! a time, decodes each, optionally merges the records with their metadata
//! and writes one output table per file.

use crate::config::PipelineConfig;
use crate::constants::{PROGRESS_TEMPLATE, columns, get_parsed_filename};
use crate::decoder::Decoder;
use crate::merge::{load_metadata_table, merge_records, resolve_metadata};
use crate::models::{DecodedRecord, IpMode, PostprocessStats, ScanMode, ScanResultRow};
use crate::registry::MetadataRegistry;
use crate::writer::{write_decoded, write_merged};
use crate::{Error, Result};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// A row that produced no record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub index: usize,
    pub reason: String,
}

/// Result of decoding one batch of rows
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Decoded records in completion order
    pub records: Vec<DecodedRecord>,
    pub failures: Vec<RowFailure>,
}

/// Bounded concurrent row decoder
#[derive(Debug, Clone)]
pub struct DecodeCoordinator {
    decoder: Arc<Decoder>,
    workers: usize,
    show_progress: bool,
}

impl DecodeCoordinator {
    pub fn new(decoder: Decoder, workers: usize) -> Self {
        Self {
            decoder: Arc::new(decoder),
            workers: workers.max(1),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Decode every row, isolating failures per row
    ///
    /// Every submitted row runs to completion. A row whose decode returns an
    /// error or panics is logged with its index and left out of the records.
    pub async fn decode_rows(&self, rows: Vec<ScanResultRow>) -> BatchOutcome {
        let progress_bar = self.progress_bar(rows.len());

        let mut completions = stream::iter(rows)
            .map(|row| {
                let decoder = Arc::clone(&self.decoder);
                async move {
                    let index = row.index;
                    let task = tokio::spawn(async move { decoder.decode(&row).await });
                    let result = match task.await {
                        Ok(result) => result,
                        Err(e) => Err(Error::row_decode(
                            index,
                            format!("decode task failed: {}", e),
                        )),
                    };
                    (index, result)
                }
            })
            .buffer_unordered(self.workers);

        let mut outcome = BatchOutcome::default();
        while let Some((index, result)) = completions.next().await {
            match result {
                Ok(record) => outcome.records.push(record),
                Err(e) => {
                    error!("Row {} failed to decode: {}", index, e);
                    outcome.failures.push(RowFailure {
                        index,
                        reason: e.to_string(),
                    });
                }
            }

            if let Some(pb) = &progress_bar {
                pb.inc(1);
            }
        }

        if let Some(pb) = &progress_bar {
            pb.finish_and_clear();
        }

        outcome
    }

    fn progress_bar(&self, len: usize) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }

        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(PROGRESS_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message("Decoding rows");
        Some(pb)
    }
}

/// Read a scan result CSV into rows
///
/// `saddr` and `data` are required; every other column is carried as
/// passthrough. Row indices are zero-based positions in the file.
pub fn read_scan_results(path: &Path) -> Result<Vec<ScanResultRow>> {
    let file = path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::csv_parsing(&file, "Failed to open scan results", Some(e)))?;

    let headers = reader
        .headers()
        .map_err(|e| Error::csv_parsing(&file, "Failed to read header", Some(e)))?
        .clone();
    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| Error::csv_parsing(&file, format!("missing '{}' column", name), None))
    };
    let saddr_idx = position(columns::SADDR)?;
    let data_idx = position(columns::DATA)?;

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| Error::csv_parsing(&file, "Failed to read row", Some(e)))?;

        let mut row = ScanResultRow::new(
            index,
            record.get(saddr_idx).unwrap_or_default(),
            record.get(data_idx).unwrap_or_default(),
        );
        for (i, (name, value)) in headers.iter().zip(record.iter()).enumerate() {
            if i != saddr_idx && i != data_idx {
                row = row.with_field(name, value);
            }
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Per-file counts folded into [`PostprocessStats`]
#[derive(Debug, Default)]
struct FileReport {
    rows_decoded: usize,
    rows_failed: usize,
    rows_written: usize,
    output: PathBuf,
}

/// Decodes a directory of result files
pub struct Postprocessor<'a> {
    config: &'a PipelineConfig,
    registry: &'a MetadataRegistry,
}

impl<'a> Postprocessor<'a> {
    pub fn new(config: &'a PipelineConfig, registry: &'a MetadataRegistry) -> Self {
        Self { config, registry }
    }

    /// Decode every `*.csv` file in `input_dir` into `<out_dir>/<ipmode>/`
    ///
    /// Files are processed sequentially. A file that fails, including one
    /// whose metadata cannot be resolved, is logged and counted; the run
    /// moves on to the next file.
    pub async fn run(
        &self,
        input_dir: &Path,
        out_dir: &Path,
        ip_mode: IpMode,
        scan_mode: ScanMode,
        merge_metadata: bool,
    ) -> Result<PostprocessStats> {
        let start_time = Instant::now();

        if ip_mode == IpMode::Ipv6 {
            return Err(Error::unsupported("decoding IPv6 scan results is not supported"));
        }
        if !input_dir.is_dir() {
            return Err(Error::input_not_found(input_dir));
        }

        let pattern = input_dir.join("*.csv");
        let mut inputs = glob::glob(&pattern.to_string_lossy())?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        inputs.sort();

        info!(
            "Decoding {} {} result files from {} with {} workers",
            inputs.len(),
            scan_mode,
            input_dir.display(),
            self.config.workers
        );

        let coordinator = DecodeCoordinator::new(
            Decoder::for_mode(scan_mode, self.config),
            self.config.workers,
        )
        .with_progress(self.config.show_progress);
        let target_dir = out_dir.join(ip_mode.as_str());

        let mut stats = PostprocessStats::default();
        for input in &inputs {
            match self
                .process_file(&coordinator, input, &target_dir, scan_mode, merge_metadata)
                .await
            {
                Ok(report) => {
                    info!(
                        "Decoded {}: {} rows, {} failed, {} written",
                        input.display(),
                        report.rows_decoded,
                        report.rows_failed,
                        report.rows_written
                    );
                    stats.files_processed += 1;
                    stats.rows_decoded += report.rows_decoded;
                    stats.rows_failed += report.rows_failed;
                    stats.rows_written += report.rows_written;
                    stats.outputs.push(report.output);
                }
                Err(e) => {
                    error!("Failed to postprocess {}: {}", input.display(), e);
                    stats.files_failed += 1;
                    if e.is_critical() {
                        return Err(e);
                    }
                }
            }
        }

        stats.processing_time = start_time.elapsed();
        Ok(stats)
    }

    async fn process_file(
        &self,
        coordinator: &DecodeCoordinator,
        input: &Path,
        target_dir: &Path,
        scan_mode: ScanMode,
        merge_metadata: bool,
    ) -> Result<FileReport> {
        // Resolve metadata first so a missing association costs no decoding
        let metadata = if merge_metadata {
            let metadata_path = resolve_metadata(self.registry, input)?;
            debug!(
                "Merging {} with {}",
                input.display(),
                metadata_path.display()
            );
            Some(load_metadata_table(&metadata_path)?)
        } else {
            None
        };

        let rows = read_scan_results(input)?;
        let outcome = coordinator.decode_rows(rows).await;

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = target_dir.join(get_parsed_filename(&stem));

        let rows_decoded = outcome.records.len();
        let rows_failed = outcome.failures.len();
        let rows_written = match metadata {
            Some(table) => {
                let merged = merge_records(outcome.records, &table);
                write_merged(&output, scan_mode, &merged)?
            }
            None => write_decoded(&output, scan_mode, &outcome.records)?,
        };

        Ok(FileReport {
            rows_decoded,
            rows_failed,
            rows_written,
            output,
        })
    }
}

//! Scan executor
//!
//! Runs the external scanner once per whitelist file, filters its CSV output
//! to in-scope responders and carries the whitelist's metadata association
//! forward to both result files.

pub mod command;
pub mod filter;

pub use command::ScanCommand;
pub use filter::{FilterStats, filter_results, load_whitelist};

use crate::config::PipelineConfig;
use crate::constants::{
    FILTERED_SUBDIR, PROGRESS_TEMPLATE, SCAN_OUTPUT_PREFIX, UNFILTERED_SUBDIR,
};
use crate::models::{IpMode, ScanMode, ScanStats};
use crate::registry::MetadataRegistry;
use crate::{Error, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Output locations of one scanned whitelist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutputs {
    pub unfiltered: PathBuf,
    pub filtered: PathBuf,
}

impl ScanOutputs {
    /// `<out>/<ipmode>/{unfiltered,filtered}/zmap_<scanmode>_<stem>.csv`
    pub fn for_whitelist(
        whitelist: &Path,
        out_dir: &Path,
        ip_mode: IpMode,
        scan_mode: ScanMode,
    ) -> Self {
        let stem = whitelist
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = format!("{}_{}_{}.csv", SCAN_OUTPUT_PREFIX, scan_mode, stem);
        let base = out_dir.join(ip_mode.as_str());

        Self {
            unfiltered: base.join(UNFILTERED_SUBDIR).join(&name),
            filtered: base.join(FILTERED_SUBDIR).join(&name),
        }
    }
}

/// Outcome of scanning one whitelist file
#[derive(Debug)]
enum FileOutcome {
    Skipped,
    Failed,
    Scanned(FilterStats),
}

/// Drives the scanner over a directory of whitelists
pub struct ScanExecutor<'a> {
    config: &'a PipelineConfig,
    registry: &'a MetadataRegistry,
}

impl<'a> ScanExecutor<'a> {
    pub fn new(config: &'a PipelineConfig, registry: &'a MetadataRegistry) -> Self {
        Self { config, registry }
    }

    /// Scan every `*.txt` whitelist in `whitelist_dir`
    ///
    /// A missing whitelist directory or probe template aborts the run. Empty
    /// whitelists are skipped without invoking the scanner and a failed scan
    /// only skips its own file.
    pub async fn scan_directory(
        &self,
        whitelist_dir: &Path,
        out_dir: &Path,
        ip_mode: IpMode,
        scan_mode: ScanMode,
    ) -> Result<ScanStats> {
        if !whitelist_dir.is_dir() {
            return Err(Error::input_not_found(whitelist_dir));
        }

        let template = self
            .config
            .probe_template_path(scan_mode.probe_template());
        if !template.is_file() {
            return Err(Error::input_not_found(template));
        }

        let pattern = whitelist_dir.join("*.txt");
        let mut whitelists = glob::glob(&pattern.to_string_lossy())?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        whitelists.sort();

        info!(
            "Scanning {} whitelists from {} ({} on port {})",
            whitelists.len(),
            whitelist_dir.display(),
            scan_mode,
            scan_mode.port()
        );

        let progress_bar = if self.config.show_progress {
            let pb = ProgressBar::new(whitelists.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(PROGRESS_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let mut stats = ScanStats::default();
        for whitelist in &whitelists {
            if let Some(pb) = &progress_bar {
                pb.set_message(format!("Scanning {}", display_name(whitelist)));
            }

            match self
                .scan_file(whitelist, out_dir, ip_mode, scan_mode)
                .await
            {
                FileOutcome::Skipped => stats.files_skipped += 1,
                FileOutcome::Failed => stats.files_failed += 1,
                FileOutcome::Scanned(filter_stats) => {
                    stats.files_scanned += 1;
                    stats.rows_kept += filter_stats.kept;
                    stats.rows_dropped += filter_stats.dropped;
                }
            }

            if let Some(pb) = &progress_bar {
                pb.inc(1);
            }
        }

        if let Some(pb) = &progress_bar {
            pb.finish_with_message("Scanning complete");
        }

        Ok(stats)
    }

    /// Scan one whitelist; every failure is scoped to this file
    async fn scan_file(
        &self,
        whitelist: &Path,
        out_dir: &Path,
        ip_mode: IpMode,
        scan_mode: ScanMode,
    ) -> FileOutcome {
        let size = match fs::metadata(whitelist) {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                warn!("Skipping unreadable whitelist {}: {}", whitelist.display(), e);
                return FileOutcome::Skipped;
            }
        };
        if size == 0 {
            info!("Skipping empty whitelist {}", whitelist.display());
            return FileOutcome::Skipped;
        }

        let members = match load_whitelist(whitelist) {
            Ok(members) => members,
            Err(e) => {
                warn!("Skipping whitelist {}: {}", whitelist.display(), e);
                return FileOutcome::Failed;
            }
        };

        let outputs = ScanOutputs::for_whitelist(whitelist, out_dir, ip_mode, scan_mode);
        for path in [&outputs.unfiltered, &outputs.filtered] {
            if let Some(parent) = path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    error!("Failed to create {}: {}", parent.display(), e);
                    return FileOutcome::Failed;
                }
            }
        }

        let command = ScanCommand::new(
            self.config,
            scan_mode,
            ip_mode,
            whitelist,
            &outputs.unfiltered,
        );
        if let Err(e) = run_scanner(&command).await {
            error!("Scan of {} failed: {}", whitelist.display(), e);
            return FileOutcome::Failed;
        }

        let filter_stats = match filter_results(&outputs.unfiltered, &outputs.filtered, &members)
        {
            Ok(filter_stats) => filter_stats,
            Err(e) => {
                error!(
                    "Failed to filter results of {}: {}",
                    whitelist.display(),
                    e
                );
                return FileOutcome::Failed;
            }
        };

        self.register_outputs(whitelist, &outputs);

        info!(
            "Scanned {}: {} responders kept, {} dropped",
            display_name(whitelist),
            filter_stats.kept,
            filter_stats.dropped
        );
        FileOutcome::Scanned(filter_stats)
    }

    /// Point both result files at the whitelist's metadata table
    fn register_outputs(&self, whitelist: &Path, outputs: &ScanOutputs) {
        let Some(metadata) = self.registry.get(whitelist) else {
            warn!(
                "No metadata registered for whitelist {}; results cannot be merged",
                whitelist.display()
            );
            return;
        };

        for data in [&outputs.unfiltered, &outputs.filtered] {
            if let Err(e) = self
                .registry
                .set(data, &metadata, self.config.persist_registry)
            {
                warn!(
                    "Failed to persist registry entry for {}: {}",
                    data.display(),
                    e
                );
            }
        }
    }
}

/// Run the scanner to completion, mapping a spawn failure or non-zero exit to an error
pub async fn run_scanner(command: &ScanCommand) -> Result<()> {
    debug!("Running: {}", command);

    let output = command.to_command().output().await.map_err(|e| {
        Error::external_tool(
            command.program().display().to_string(),
            format!("failed to start: {}", e),
        )
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::external_tool(
            command.program().display().to_string(),
            format!("exited with {}: {}", output.status, stderr.trim()),
        ));
    }

    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

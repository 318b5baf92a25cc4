//! Configuration management and validation.
//!
//! Provides the pipeline configuration: where each stage reads and writes,
//! which external tools are invoked and how, and the concurrency settings
//! of the decode stage.

use crate::constants::{
    DATA_DIR_TIMESTAMP_FORMAT, DATA_ROOT, DECODED_RESULTS_DIR, DEFAULT_CONVERTER_BIN,
    DEFAULT_COOLDOWN_SECS, DEFAULT_DISSECTOR_BIN, DEFAULT_PROBE_DIR, DEFAULT_RATE,
    DEFAULT_ROW_TIMEOUT_SECS, DEFAULT_SCANNER_BIN, DEFAULT_WORKERS, ENCODED_RESULTS_DIR, IPS_DIR,
    MAX_WORKERS, REGISTRY_STORE_FILENAME,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Global configuration for a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Per-run data directory holding every stage's output and the registry store
    pub data_dir: PathBuf,

    /// Scanner executable
    pub scanner_bin: PathBuf,

    /// Run the scanner through sudo (raw sockets need privileges)
    pub use_sudo: bool,

    /// Directory containing the probe packet templates
    pub probe_dir: PathBuf,

    /// Hex-dump to capture converter executable
    pub converter_bin: PathBuf,

    /// Packet dissector executable
    pub dissector_bin: PathBuf,

    /// Scanner send rate in packets per second
    pub rate: u32,

    /// Seconds the scanner keeps receiving after sending completes
    pub cooldown_secs: u32,

    /// Concurrent row decodes per result file
    pub workers: usize,

    /// Timeout applied to each external tool invocation (None = wait forever)
    pub row_timeout_secs: Option<u64>,

    /// Write registry associations through to the on-disk store
    pub persist_registry: bool,

    /// Show progress bars
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            scanner_bin: PathBuf::from(DEFAULT_SCANNER_BIN),
            use_sudo: true,
            probe_dir: PathBuf::from(DEFAULT_PROBE_DIR),
            converter_bin: PathBuf::from(DEFAULT_CONVERTER_BIN),
            dissector_bin: PathBuf::from(DEFAULT_DISSECTOR_BIN),
            rate: DEFAULT_RATE,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            workers: DEFAULT_WORKERS,
            row_timeout_secs: Some(DEFAULT_ROW_TIMEOUT_SECS),
            persist_registry: true,
            show_progress: true,
        }
    }
}

impl PipelineConfig {
    /// Timestamped data directory for runs started in the current hour
    pub fn default_data_dir() -> PathBuf {
        let now = chrono::Local::now()
            .format(DATA_DIR_TIMESTAMP_FORMAT)
            .to_string();
        Path::new(DATA_ROOT).join(now)
    }

    /// Default classifier output directory
    pub fn ips_dir(&self) -> PathBuf {
        self.data_dir.join(IPS_DIR)
    }

    /// Default scanner output directory
    pub fn encoded_dir(&self) -> PathBuf {
        self.data_dir.join(ENCODED_RESULTS_DIR)
    }

    /// Default decoder output directory
    pub fn decoded_dir(&self) -> PathBuf {
        self.data_dir.join(DECODED_RESULTS_DIR)
    }

    /// Location of the on-disk registry store
    pub fn registry_store_path(&self) -> PathBuf {
        self.data_dir.join(REGISTRY_STORE_FILENAME)
    }

    /// Path of the probe template file for a template name
    pub fn probe_template_path(&self, template: &str) -> PathBuf {
        self.probe_dir.join(template)
    }

    /// Per-invocation timeout for external tools
    pub fn row_timeout(&self) -> Option<Duration> {
        self.row_timeout_secs.map(Duration::from_secs)
    }

    /// Set the data directory
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Set the scanner executable
    pub fn with_scanner(mut self, scanner_bin: impl Into<PathBuf>) -> Self {
        self.scanner_bin = scanner_bin.into();
        self
    }

    /// Invoke the scanner directly instead of through sudo
    pub fn without_sudo(mut self) -> Self {
        self.use_sudo = false;
        self
    }

    /// Set the probe template directory
    pub fn with_probe_dir(mut self, probe_dir: impl Into<PathBuf>) -> Self {
        self.probe_dir = probe_dir.into();
        self
    }

    /// Set the converter and dissector executables
    pub fn with_dissector_tools(
        mut self,
        converter_bin: impl Into<PathBuf>,
        dissector_bin: impl Into<PathBuf>,
    ) -> Self {
        self.converter_bin = converter_bin.into();
        self.dissector_bin = dissector_bin.into();
        self
    }

    /// Set the scanner rate
    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = rate;
        self
    }

    /// Set the scanner cooldown
    pub fn with_cooldown(mut self, cooldown_secs: u32) -> Self {
        self.cooldown_secs = cooldown_secs;
        self
    }

    /// Set the decode worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the per-row external tool timeout
    pub fn with_row_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.row_timeout_secs = timeout_secs;
        self
    }

    /// Keep registry associations in memory only
    pub fn without_registry_persistence(mut self) -> Self {
        self.persist_registry = false;
        self
    }

    /// Disable progress bars
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::configuration(
                "Number of workers must be greater than 0",
            ));
        }

        if self.workers > MAX_WORKERS {
            return Err(Error::configuration(format!(
                "Number of workers cannot exceed {}",
                MAX_WORKERS
            )));
        }

        if self.rate == 0 {
            return Err(Error::configuration("Scan rate must be greater than 0"));
        }

        if self.row_timeout_secs == Some(0) {
            return Err(Error::configuration(
                "Row timeout must be greater than 0 seconds",
            ));
        }

        debug!("Configuration validated: {:?}", self);
        Ok(())
    }
}

//! Command-line argument definitions for the probe census pipeline
//!
//! Each pipeline stage is its own subcommand so stages can be run
//! independently; `run-all` chains them. Flags shared by every stage
//! (data directory, tool locations, logging) are global.

use crate::constants::MAX_WORKERS;
use crate::models::{IpMode, ScanMode};
use crate::{Error, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// CLI arguments for the probe census pipeline
#[derive(Debug, Clone, Parser)]
#[command(
    name = "probe-census",
    version,
    about = "Scan address populations for NTP and SNMPv3 responders and decode their replies",
    long_about = "Splits geolocated address lists into per-family whitelists, scans them with \
                  zmap, decodes the captured NTP headers and SNMPv3 engine identities and joins \
                  the decoded records with the address metadata they were scanned from."
)]
pub struct Args {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available pipeline stages
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Split raw address lists into per-family whitelists and metadata tables
    Preprocess(PreprocessArgs),
    /// Scan whitelists with the external scanner and filter the results
    ScanIps(ScanArgs),
    /// Decode filtered scan results and merge them with address metadata
    Postprocess(PostprocessArgs),
    /// Run preprocess, scan-ips and postprocess in sequence
    RunAll(RunAllArgs),
}

/// Flags accepted by every subcommand
#[derive(Debug, Clone, ClapArgs)]
pub struct GlobalArgs {
    /// Per-run data directory
    ///
    /// Holds every stage's default output and the metadata registry store.
    /// Defaults to data/<YYYY_MM_DD_HH> for the current hour, so stages run
    /// separately within the same hour share a directory.
    #[arg(long = "data-dir", value_name = "PATH", global = true)]
    pub data_dir: Option<PathBuf>,

    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        global = true,
        help = "Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)"
    )]
    pub verbose: u8,

    #[arg(
        short = 'q',
        long = "quiet",
        global = true,
        conflicts_with = "verbose",
        help = "Suppress output except errors"
    )]
    pub quiet: bool,

    #[arg(long = "no-progress", global = true, help = "Disable progress bars")]
    pub no_progress: bool,

    /// Seconds to wait for each converter or dissector run before treating it as failed
    #[arg(long = "row-timeout", value_name = "SECS", global = true)]
    pub row_timeout: Option<u64>,

    #[arg(long = "scanner", value_name = "PATH", global = true, help = "Scanner executable")]
    pub scanner: Option<PathBuf>,

    #[arg(long = "no-sudo", global = true, help = "Run the scanner without sudo")]
    pub no_sudo: bool,

    #[arg(
        long = "probe-dir",
        value_name = "PATH",
        global = true,
        help = "Directory containing the probe packet templates"
    )]
    pub probe_dir: Option<PathBuf>,

    #[arg(
        long = "text2pcap",
        value_name = "PATH",
        global = true,
        help = "Hex-dump converter executable"
    )]
    pub text2pcap: Option<PathBuf>,

    #[arg(
        long = "tshark",
        value_name = "PATH",
        global = true,
        help = "Packet dissector executable"
    )]
    pub tshark: Option<PathBuf>,

    #[arg(
        long = "output-format",
        value_enum,
        default_value = "human",
        global = true,
        help = "Format of the final summary report"
    )]
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, Parser)]
pub struct PreprocessArgs {
    /// Directory of raw `ip,country,city,asn,asn_name` text files
    #[arg(value_name = "INPUT_DIR")]
    pub input_dir: PathBuf,

    /// Output directory (defaults to <data-dir>/ips)
    #[arg(short = 'o', long = "out-dir", value_name = "PATH")]
    pub out_dir: Option<PathBuf>,

    /// Write one whitelist pair per input file instead of one aggregate pair
    #[arg(long = "per-file")]
    pub per_file: bool,
}

#[derive(Debug, Clone, Parser)]
pub struct ScanArgs {
    #[arg(value_enum, ignore_case = true, value_name = "IP_MODE")]
    pub ip_mode: IpMode,

    #[arg(value_enum, ignore_case = true, value_name = "SCAN_MODE")]
    pub scan_mode: ScanMode,

    /// Whitelist directory (defaults to <data-dir>/ips/<ip-mode>/raw)
    #[arg(short = 'i', long = "input-dir", value_name = "PATH")]
    pub input_dir: Option<PathBuf>,

    /// Output directory (defaults to <data-dir>/results_encoded)
    #[arg(short = 'o', long = "out-dir", value_name = "PATH")]
    pub out_dir: Option<PathBuf>,

    #[arg(short = 'r', long = "rate", value_name = "PPS", help = "Send rate in packets per second")]
    pub rate: Option<u32>,

    #[arg(
        short = 'c',
        long = "cooldown",
        value_name = "SECS",
        help = "Seconds to keep receiving after sending completes"
    )]
    pub cooldown: Option<u32>,
}

#[derive(Debug, Clone, Parser)]
pub struct PostprocessArgs {
    #[arg(value_enum, ignore_case = true, value_name = "IP_MODE")]
    pub ip_mode: IpMode,

    #[arg(value_enum, ignore_case = true, value_name = "SCAN_MODE")]
    pub scan_mode: ScanMode,

    /// Filtered result directory (defaults to <data-dir>/results_encoded/<ip-mode>/filtered)
    #[arg(short = 'i', long = "input-dir", value_name = "PATH")]
    pub input_dir: Option<PathBuf>,

    /// Output directory (defaults to <data-dir>/results_decoded)
    #[arg(short = 'o', long = "out-dir", value_name = "PATH")]
    pub out_dir: Option<PathBuf>,

    #[arg(
        short = 'j',
        long = "max-workers",
        value_name = "COUNT",
        help = "Concurrent row decodes per result file"
    )]
    pub max_workers: Option<usize>,

    /// Write decoded rows without joining them to the address metadata
    #[arg(long = "no-metadata")]
    pub no_metadata: bool,
}

#[derive(Debug, Clone, Parser)]
pub struct RunAllArgs {
    #[arg(value_enum, ignore_case = true, value_name = "IP_MODE")]
    pub ip_mode: IpMode,

    #[arg(value_enum, ignore_case = true, value_name = "SCAN_MODE")]
    pub scan_mode: ScanMode,

    /// Directory of raw `ip,country,city,asn,asn_name` text files
    #[arg(value_name = "INPUT_DIR")]
    pub input_dir: PathBuf,

    /// Root for all stage outputs and the registry store (same as --data-dir)
    #[arg(short = 'o', long = "out-dir", value_name = "PATH")]
    pub out_dir: Option<PathBuf>,

    #[arg(short = 'r', long = "rate", value_name = "PPS", help = "Send rate in packets per second")]
    pub rate: Option<u32>,

    #[arg(
        short = 'c',
        long = "cooldown",
        value_name = "SECS",
        help = "Seconds to keep receiving after sending completes"
    )]
    pub cooldown: Option<u32>,

    #[arg(
        short = 'j',
        long = "max-workers",
        value_name = "COUNT",
        help = "Concurrent row decodes per result file"
    )]
    pub max_workers: Option<usize>,

    #[arg(long = "per-file", help = "Write one whitelist pair per input file")]
    pub per_file: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

impl Args {
    /// Validate argument values before any stage runs
    pub fn validate(&self) -> Result<()> {
        if self.global.row_timeout == Some(0) {
            return Err(Error::configuration(
                "Row timeout must be greater than 0 seconds",
            ));
        }

        let (rate, workers) = match &self.command {
            Some(Commands::ScanIps(scan)) => (scan.rate, None),
            Some(Commands::Postprocess(post)) => (None, post.max_workers),
            Some(Commands::RunAll(all)) => (all.rate, all.max_workers),
            _ => (None, None),
        };

        if rate == Some(0) {
            return Err(Error::configuration("Scan rate must be greater than 0"));
        }

        if let Some(workers) = workers {
            if workers == 0 || workers > MAX_WORKERS {
                return Err(Error::configuration(format!(
                    "Number of workers must be between 1 and {}",
                    MAX_WORKERS
                )));
            }
        }

        Ok(())
    }
}

impl GlobalArgs {
    /// Log level selected by the quiet and verbose flags
    pub fn get_log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }

        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    pub fn show_progress(&self) -> bool {
        !self.no_progress && !self.quiet
    }
}

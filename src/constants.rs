//! Application constants for the probe census pipeline
//!
//! This module contains configuration defaults, directory names and the
//! fixed protocol constants used throughout the pipeline.

// =============================================================================
// Scanner Defaults
// =============================================================================

/// Default scanner send rate in packets per second
pub const DEFAULT_RATE: u32 = 3000;

/// Default scanner cooldown in seconds (receive window after sending ends)
pub const DEFAULT_COOLDOWN_SECS: u32 = 2;

/// Default scanner executable
pub const DEFAULT_SCANNER_BIN: &str = "zmap";

/// Default directory holding probe packet templates
pub const DEFAULT_PROBE_DIR: &str = ".";

// =============================================================================
// Decoding Defaults
// =============================================================================

/// Default number of concurrent row decodes per result file
pub const DEFAULT_WORKERS: usize = 5;

/// Upper bound accepted for the worker pool size
pub const MAX_WORKERS: usize = 256;

/// Default per-row timeout for external tool invocations in seconds
pub const DEFAULT_ROW_TIMEOUT_SECS: u64 = 30;

/// Progress bar layout shared by the scan and decode stages
pub const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Default hex-dump to capture converter executable
pub const DEFAULT_CONVERTER_BIN: &str = "text2pcap";

/// Default packet dissector executable
pub const DEFAULT_DISSECTOR_BIN: &str = "tshark";

// =============================================================================
// Directory and File Layout
// =============================================================================

/// Root directory under which each run gets a timestamped data directory
pub const DATA_ROOT: &str = "data";

/// Timestamp format of the per-run data directory name
pub const DATA_DIR_TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H";

/// Classifier output directory (relative to the data directory)
pub const IPS_DIR: &str = "ips";

/// Scanner output directory (relative to the data directory)
pub const ENCODED_RESULTS_DIR: &str = "results_encoded";

/// Decoder output directory (relative to the data directory)
pub const DECODED_RESULTS_DIR: &str = "results_decoded";

/// On-disk registry store filename (relative to the data directory)
pub const REGISTRY_STORE_FILENAME: &str = "metadata_map.json";

/// Raw address list subdirectory of a classifier partition
pub const RAW_SUBDIR: &str = "raw";

/// Metadata table subdirectory of a classifier partition
pub const METADATA_SUBDIR: &str = "metadata";

/// Unfiltered scan results subdirectory
pub const UNFILTERED_SUBDIR: &str = "unfiltered";

/// Filtered scan results subdirectory
pub const FILTERED_SUBDIR: &str = "filtered";

/// Prefix of scan result filenames
pub const SCAN_OUTPUT_PREFIX: &str = "zmap";

/// Suffix appended to decoded output file stems
pub const PARSED_SUFFIX: &str = "_parsed";

// =============================================================================
// Column Name Constants
// =============================================================================

/// Column names shared by scanner output and metadata tables
pub mod columns {
    // Scanner output columns
    pub const SADDR: &str = "saddr";
    pub const DATA: &str = "data";

    // Address metadata columns
    pub const IP: &str = "ip";
    pub const COUNTRY: &str = "country";
    pub const CITY: &str = "city";
    pub const ASN: &str = "asn";
    pub const ASN_NAME: &str = "asn_name";

    /// Geolocation columns carried alongside decoded records
    pub const GEO: &[&str] = &[COUNTRY, CITY, ASN, ASN_NAME];
}

// =============================================================================
// Protocol Constants
// =============================================================================

/// NTP header constants
pub mod ntp {
    /// Registered NTP port
    pub const PORT: u16 = 123;

    /// Probe packet template for NTP scans
    pub const PROBE_TEMPLATE: &str = "ntp_123.pkt";

    /// Minimum payload length of an NTP header
    pub const HEADER_LEN: usize = 48;

    /// Byte offsets of the reference, origin, receive and transmit timestamps
    pub const TIMESTAMP_OFFSETS: [usize; 4] = [16, 24, 32, 40];

    /// Rendering format for decoded timestamps
    pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
}

/// SNMPv3 constants
pub mod snmp {
    /// Registered SNMP port
    pub const PORT: u16 = 161;

    /// Probe packet template for SNMPv3 scans
    pub const PROBE_TEMPLATE: &str = "snmp3_161.pkt";

    /// Source port of the synthetic datagram wrapped around captured payloads
    pub const SYNTHETIC_SOURCE_PORT: u16 = 50000;

    /// Enterprise value written when the converter or dissector fails
    pub const ERROR_SENTINEL: &str = "ERROR";

    /// Bytes per line of the offset-annotated hex dump
    pub const HEXDUMP_BYTES_PER_LINE: usize = 16;

    /// Seconds per day, hour and minute used to render engine uptime
    pub const UPTIME_UNITS: [u64; 3] = [86_400, 3_600, 60];
}

/// Get the decoded output filename for a scan result stem
pub fn get_parsed_filename(stem: &str) -> String {
    format!("{}{}.csv", stem, PARSED_SUFFIX)
}

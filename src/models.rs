//! Core data structures and types for the probe census pipeline.
//!
//! Defines address-family and measurement modes, the records that flow
//! between pipeline stages, and processing statistics.

use crate::constants::{columns, ntp, snmp};
use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Address families handled by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IpMode {
    Ipv4,
    Ipv6,
}

impl IpMode {
    /// All address families in output order
    pub const ALL: [IpMode; 2] = [IpMode::Ipv4, IpMode::Ipv6];

    /// Lower-case name used in directory and file names
    pub fn as_str(&self) -> &'static str {
        match self {
            IpMode::Ipv4 => "ipv4",
            IpMode::Ipv6 => "ipv6",
        }
    }

    /// Classify a parsed address into its family
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpMode::Ipv4,
            IpAddr::V6(_) => IpMode::Ipv6,
        }
    }
}

impl fmt::Display for IpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How captured payloads of a measurement are turned into records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// Fixed-layout header decoded in-process
    Structural,
    /// Payload handed to an external converter and dissector
    Pipelined,
}

/// Fixed probe settings attached to a measurement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProfile {
    pub port: u16,
    pub probe_template: &'static str,
    pub strategy: DecodeStrategy,
}

/// Measurement modes, each probing one UDP service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Snmpv3 = 0,
    Ntp = 1,
}

/// Probe settings indexed by `ScanMode` discriminant
static SCAN_PROFILES: [ScanProfile; 2] = [
    ScanProfile {
        port: snmp::PORT,
        probe_template: snmp::PROBE_TEMPLATE,
        strategy: DecodeStrategy::Pipelined,
    },
    ScanProfile {
        port: ntp::PORT,
        probe_template: ntp::PROBE_TEMPLATE,
        strategy: DecodeStrategy::Structural,
    },
];

impl ScanMode {
    /// Lower-case name used in file names
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Snmpv3 => "snmpv3",
            ScanMode::Ntp => "ntp",
        }
    }

    /// Look up the fixed port, probe template and decode strategy
    pub fn profile(&self) -> &'static ScanProfile {
        &SCAN_PROFILES[*self as usize]
    }

    pub fn port(&self) -> u16 {
        self.profile().port
    }

    pub fn probe_template(&self) -> &'static str {
        self.profile().probe_template
    }

    pub fn strategy(&self) -> DecodeStrategy {
        self.profile().strategy
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated address with its geolocation metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub ip: String,
    pub country: String,
    pub city: String,
    pub asn: String,
    pub asn_name: String,
}

impl AddressRecord {
    /// Geolocation values in `columns::GEO` order
    pub fn geo_values(&self) -> [&str; 4] {
        [
            self.country.as_str(),
            self.city.as_str(),
            self.asn.as_str(),
            self.asn_name.as_str(),
        ]
    }
}

/// One responder row from the scanner's CSV output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResultRow {
    /// Zero-based position of the row in its result file
    pub index: usize,
    pub saddr: String,
    /// Hex-encoded UDP payload
    pub data: String,
    /// Every other column of the row, keyed by header
    pub passthrough: BTreeMap<String, String>,
}

impl ScanResultRow {
    pub fn new(index: usize, saddr: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            index,
            saddr: saddr.into(),
            data: data.into(),
            passthrough: BTreeMap::new(),
        }
    }

    /// Attach a passthrough column
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.passthrough.insert(name.into(), value.into());
        self
    }

    /// The geolocation columns present on this row
    pub fn geolocation(&self) -> BTreeMap<String, String> {
        self.passthrough
            .iter()
            .filter(|(name, _)| columns::GEO.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// Decoded NTP header fields
#[derive(Debug, Clone, PartialEq)]
pub struct NtpHeader {
    pub leap_indicator: u8,
    pub version: u8,
    pub mode: u8,
    pub stratum: u8,
    /// Poll exponent; the interval is 2^poll seconds
    pub poll: u8,
    /// Precision in seconds
    pub precision: f64,
    /// Root delay in seconds
    pub root_delay: f64,
    /// Root dispersion in seconds
    pub root_dispersion: f64,
    pub reference_id: String,
    pub reference_timestamp: NaiveDateTime,
    pub origin_timestamp: NaiveDateTime,
    pub receive_timestamp: NaiveDateTime,
    pub transmit_timestamp: NaiveDateTime,
}

/// SNMPv3 engine identity fields reported by the dissector
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnmpEngine {
    pub enterprise: String,
    pub engine_id_format: String,
    pub engine_id_data: String,
    pub engine_boots: String,
    /// Engine uptime rendered as `DdHhMmSs`
    pub engine_time: String,
}

impl SnmpEngine {
    /// Record produced when the converter or dissector fails
    pub fn error() -> Self {
        Self {
            enterprise: snmp::ERROR_SENTINEL.to_string(),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.enterprise == snmp::ERROR_SENTINEL
    }
}

/// Protocol-specific part of a decoded record
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolFields {
    /// `None` when the payload is shorter than an NTP header
    Ntp(Option<NtpHeader>),
    Snmp(SnmpEngine),
}

/// Output column names of the NTP fields
pub const NTP_FIELD_NAMES: &[&str] = &[
    "LI",
    "VN",
    "Mode",
    "Stratum",
    "Poll",
    "Precision (s)",
    "Root_Delay (s)",
    "Root_Dispersion (s)",
    "Ref_ID",
    "Ref_Timestamp",
    "Orig_Timestamp",
    "Recv_Timestamp",
    "Tx_Timestamp",
];

/// Output column names of the SNMP fields
pub const SNMP_FIELD_NAMES: &[&str] = &[
    "enterprise",
    "engineIDFormat",
    "engineIDData",
    "snmpEngineBoots",
    "snmpEngineTime",
];

impl ProtocolFields {
    /// Column names for the fields of a measurement mode
    pub fn field_names(mode: ScanMode) -> &'static [&'static str] {
        match mode {
            ScanMode::Ntp => NTP_FIELD_NAMES,
            ScanMode::Snmpv3 => SNMP_FIELD_NAMES,
        }
    }

    /// Render the fields as CSV cell values
    pub fn field_values(&self) -> Vec<String> {
        match self {
            ProtocolFields::Ntp(None) => vec![String::new(); NTP_FIELD_NAMES.len()],
            ProtocolFields::Ntp(Some(header)) => {
                let ts = |t: &NaiveDateTime| t.format(ntp::TIMESTAMP_FORMAT).to_string();
                vec![
                    header.leap_indicator.to_string(),
                    header.version.to_string(),
                    header.mode.to_string(),
                    header.stratum.to_string(),
                    header.poll.to_string(),
                    header.precision.to_string(),
                    header.root_delay.to_string(),
                    header.root_dispersion.to_string(),
                    header.reference_id.clone(),
                    ts(&header.reference_timestamp),
                    ts(&header.origin_timestamp),
                    ts(&header.receive_timestamp),
                    ts(&header.transmit_timestamp),
                ]
            }
            ProtocolFields::Snmp(engine) => vec![
                engine.enterprise.clone(),
                engine.engine_id_format.clone(),
                engine.engine_id_data.clone(),
                engine.engine_boots.clone(),
                engine.engine_time.clone(),
            ],
        }
    }
}

/// One decoded responder
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub ip: String,
    pub fields: ProtocolFields,
    /// Geolocation columns copied from the input row
    pub passthrough: BTreeMap<String, String>,
}

impl DecodedRecord {
    pub fn new(row: &ScanResultRow, fields: ProtocolFields) -> Self {
        Self {
            ip: row.saddr.clone(),
            fields,
            passthrough: row.geolocation(),
        }
    }
}

/// A decoded record joined with the address metadata of its ip
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub decoded: DecodedRecord,
    pub address: AddressRecord,
}

/// Statistics from splitting raw address lists
#[derive(Debug, Default, Clone)]
pub struct ClassifyStats {
    pub files_read: usize,
    pub lines_skipped: usize,
    pub ipv4_written: usize,
    pub ipv6_written: usize,
    pub outputs: Vec<PathBuf>,
}

/// Statistics from scanning whitelist files
#[derive(Debug, Default, Clone)]
pub struct ScanStats {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub rows_kept: usize,
    pub rows_dropped: usize,
}

/// Statistics from decoding result files
#[derive(Debug, Default, Clone)]
pub struct PostprocessStats {
    pub files_processed: usize,
    pub files_failed: usize,
    pub rows_decoded: usize,
    pub rows_failed: usize,
    pub rows_written: usize,
    pub processing_time: Duration,
    pub outputs: Vec<PathBuf>,
}

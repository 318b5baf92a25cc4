//! SNMPv3 decoding through an external converter and dissector
//!
//! Each row's payload is written as an offset-annotated hex dump, wrapped
//! into a synthetic UDP capture by the converter and handed to the dissector,
//! whose JSON output carries the engine fields. All intermediate files live
//! in a temporary directory owned by the row's decode call and removed when
//! it returns.

use super::dissector::parse_engine;
use crate::constants::snmp::{HEXDUMP_BYTES_PER_LINE, PORT, SYNTHETIC_SOURCE_PORT};
use crate::models::{DecodedRecord, ProtocolFields, ScanResultRow, SnmpEngine};
use crate::{Error, Result};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, warn};

const DUMP_FILENAME: &str = "payload.txt";
const CAPTURE_FILENAME: &str = "payload.pcap";

/// Decoder driving the converter and dissector executables
#[derive(Debug, Clone)]
pub struct SnmpDecoder {
    converter_bin: PathBuf,
    dissector_bin: PathBuf,
    timeout: Option<Duration>,
}

impl SnmpDecoder {
    pub fn new(
        converter_bin: impl Into<PathBuf>,
        dissector_bin: impl Into<PathBuf>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            converter_bin: converter_bin.into(),
            dissector_bin: dissector_bin.into(),
            timeout,
        }
    }

    /// Decode one row
    ///
    /// A failing, timed-out or unparseable tool run yields the error sentinel
    /// record rather than an error; geolocation passthrough is kept either way.
    /// Invalid payload hex and local I/O failures are returned as errors.
    pub async fn decode_row(&self, row: &ScanResultRow) -> Result<DecodedRecord> {
        let payload = hex::decode(row.data.trim())
            .map_err(|e| Error::row_decode(row.index, format!("invalid payload hex: {}", e)))?;

        let engine = match self.dissect(&payload).await {
            Ok(engine) => engine,
            Err(e @ Error::ExternalTool { .. }) => {
                warn!("Row {} from {}: {}", row.index, row.saddr, e);
                SnmpEngine::error()
            }
            Err(e) => return Err(Error::row_decode(row.index, e.to_string())),
        };

        Ok(DecodedRecord::new(row, ProtocolFields::Snmp(engine)))
    }

    async fn dissect(&self, payload: &[u8]) -> Result<SnmpEngine> {
        let workspace = TempDir::new()
            .map_err(|e| Error::io("Failed to create temporary decode directory", e))?;
        let dump = workspace.path().join(DUMP_FILENAME);
        let capture = workspace.path().join(CAPTURE_FILENAME);

        fs::write(&dump, hexdump(payload))
            .map_err(|e| Error::io(format!("Failed to write {}", dump.display()), e))?;

        let ports = format!("{},{}", SYNTHETIC_SOURCE_PORT, PORT);
        self.run_tool(
            &self.converter_bin,
            [
                OsStr::new("-q"),
                OsStr::new("-T"),
                OsStr::new(&ports),
                dump.as_os_str(),
                capture.as_os_str(),
            ],
        )
        .await?;

        let output = self
            .run_tool(
                &self.dissector_bin,
                [
                    OsStr::new("-r"),
                    capture.as_os_str(),
                    OsStr::new("-T"),
                    OsStr::new("json"),
                ],
            )
            .await?;

        parse_engine(&output)
    }

    /// Run a tool to completion and return its stdout
    async fn run_tool<'a>(
        &self,
        program: &Path,
        args: impl IntoIterator<Item = &'a OsStr>,
    ) -> Result<Vec<u8>> {
        let tool = program.display().to_string();
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let running = command.output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, running).await.map_err(|_| {
                Error::external_tool(&tool, format!("timed out after {:?}", limit))
            })?,
            None => running.await,
        }
        .map_err(|e| Error::external_tool(&tool, format!("failed to start: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::external_tool(
                &tool,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        debug!("{} produced {} bytes", tool, output.stdout.len());
        Ok(output.stdout)
    }
}

/// Offset-annotated hex dump, 16 bytes per line
///
/// ```text
/// 0000  30 3a 02 01 03 30 0f 02 03 00 ff e3 02 03 00 ff
/// 0010  e3 04 01 04
/// ```
pub fn hexdump(payload: &[u8]) -> String {
    let mut dump = String::new();
    for (i, chunk) in payload.chunks(HEXDUMP_BYTES_PER_LINE).enumerate() {
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        dump.push_str(&format!(
            "{:04x}  {}\n",
            i * HEXDUMP_BYTES_PER_LINE,
            bytes.join(" ")
        ));
    }
    dump
}

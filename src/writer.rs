//! Decoded output writing
//!
//! Output tables carry `ip`, the protocol fields of the measurement mode and
//! the geolocation columns, in that order.

use crate::constants::columns;
use crate::models::{DecodedRecord, MergedRecord, ProtocolFields, ScanMode};
use crate::{Error, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Header of a decoded output table
pub fn output_header(mode: ScanMode) -> Vec<&'static str> {
    let mut header = vec![columns::IP];
    header.extend_from_slice(ProtocolFields::field_names(mode));
    header.extend_from_slice(columns::GEO);
    header
}

fn decoded_row(record: &DecodedRecord) -> Vec<String> {
    let mut row = vec![record.ip.clone()];
    row.extend(record.fields.field_values());
    row.extend(
        columns::GEO
            .iter()
            .map(|column| record.passthrough.get(*column).cloned().unwrap_or_default()),
    );
    row
}

fn merged_row(record: &MergedRecord) -> Vec<String> {
    let mut row = vec![record.decoded.ip.clone()];
    row.extend(record.decoded.fields.field_values());
    row.extend(record.address.geo_values().map(str::to_string));
    row
}

/// Write decoded records with whatever geolocation the scan rows carried
pub fn write_decoded(path: &Path, mode: ScanMode, records: &[DecodedRecord]) -> Result<usize> {
    write_table(path, &output_header(mode), records.iter().map(decoded_row))
}

/// Write merged records with geolocation taken from the metadata table
pub fn write_merged(path: &Path, mode: ScanMode, records: &[MergedRecord]) -> Result<usize> {
    write_table(path, &output_header(mode), records.iter().map(merged_row))
}

fn write_table(
    path: &Path,
    header: &[&str],
    rows: impl Iterator<Item = Vec<String>>,
) -> Result<usize> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::io(format!("Failed to create {}", parent.display()), e))?;
    }

    let file = path.display().to_string();
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| Error::csv_parsing(&file, "Failed to create output", Some(e)))?;
    writer
        .write_record(header)
        .map_err(|e| Error::csv_parsing(&file, "Failed to write header", Some(e)))?;

    let mut written = 0;
    for row in rows {
        writer
            .write_record(&row)
            .map_err(|e| Error::csv_parsing(&file, "Failed to write row", Some(e)))?;
        written += 1;
    }
    writer
        .flush()
        .map_err(|e| Error::io(format!("Failed to flush {}", file), e))?;

    debug!("Wrote {} rows to {}", written, file);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AddressRecord, ScanResultRow, SnmpEngine};
    use tempfile::TempDir;

    #[test]
    fn test_output_header() {
        let header = output_header(ScanMode::Snmpv3);
        assert_eq!(
            header,
            vec![
                "ip",
                "enterprise",
                "engineIDFormat",
                "engineIDData",
                "snmpEngineBoots",
                "snmpEngineTime",
                "country",
                "city",
                "asn",
                "asn_name",
            ]
        );
        assert_eq!(output_header(ScanMode::Ntp).len(), 1 + 13 + 4);
    }

    #[test]
    fn test_write_decoded_fills_missing_geolocation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/out.csv");
        let row = ScanResultRow::new(0, "192.0.2.1", "").with_field("country", "NL");
        let record = DecodedRecord::new(&row, ProtocolFields::Snmp(SnmpEngine::error()));

        let written = write_decoded(&path, ScanMode::Snmpv3, &[record]).unwrap();
        assert_eq!(written, 1);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[1], "192.0.2.1,ERROR,,,,,NL,,,");
    }

    #[test]
    fn test_write_merged_uses_metadata_geolocation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.csv");
        let row = ScanResultRow::new(0, "192.0.2.1", "").with_field("country", "stale");
        let merged = MergedRecord {
            decoded: DecodedRecord::new(&row, ProtocolFields::Ntp(None)),
            address: AddressRecord {
                ip: "192.0.2.1".to_string(),
                country: "NL".to_string(),
                city: "Amsterdam".to_string(),
                asn: "64500".to_string(),
                asn_name: "Example, Inc.".to_string(),
            },
        };

        write_merged(&path, ScanMode::Ntp, &[merged]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        let record = reader.records().next().unwrap().unwrap();
        let value = |name: &str| {
            let index = headers.iter().position(|h| h == name).unwrap();
            record.get(index).unwrap().to_string()
        };

        assert_eq!(value("ip"), "192.0.2.1");
        assert_eq!(value("country"), "NL");
        assert_eq!(value("asn_name"), "Example, Inc.");
        assert_eq!(value("Stratum"), "");
    }
}

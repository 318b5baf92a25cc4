//! Metadata merge
//!
//! Joins decoded records back to the address metadata of the partition the
//! result file was scanned from. The metadata table is found through the
//! registry entry of the result file; rows without a matching ip are dropped.

use crate::models::{AddressRecord, DecodedRecord, MergedRecord};
use crate::registry::MetadataRegistry;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Address metadata keyed by ip
pub type MetadataTable = HashMap<String, AddressRecord>;

/// Resolve the metadata table registered for a result file
pub fn resolve_metadata(registry: &MetadataRegistry, data_path: &Path) -> Result<PathBuf> {
    registry
        .get(data_path)
        .ok_or_else(|| Error::registry_miss(data_path))
}

/// Load an `ip,country,city,asn,asn_name` table
///
/// The first row of a repeated ip wins.
pub fn load_metadata_table(path: &Path) -> Result<MetadataTable> {
    let file = path.display().to_string();
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| Error::csv_parsing(&file, "Failed to open metadata table", Some(e)))?;

    let mut table = MetadataTable::new();
    for record in reader.deserialize::<AddressRecord>() {
        let record =
            record.map_err(|e| Error::csv_parsing(&file, "Invalid metadata row", Some(e)))?;
        table.entry(record.ip.clone()).or_insert(record);
    }

    debug!("Loaded {} metadata rows from {}", table.len(), file);
    Ok(table)
}

/// Inner join of decoded records with metadata by exact ip
pub fn merge_records(records: Vec<DecodedRecord>, table: &MetadataTable) -> Vec<MergedRecord> {
    records
        .into_iter()
        .filter_map(|decoded| {
            let address = table.get(&decoded.ip)?.clone();
            Some(MergedRecord { decoded, address })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProtocolFields, ScanResultRow};
    use std::fs;
    use tempfile::TempDir;

    fn decoded(ip: &str) -> DecodedRecord {
        DecodedRecord::new(&ScanResultRow::new(0, ip, ""), ProtocolFields::Ntp(None))
    }

    #[test]
    fn test_load_metadata_table() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("meta.csv");
        fs::write(
            &path,
            "ip,country,city,asn,asn_name\n\
             192.0.2.1,NL,Amsterdam,64500,\"Example, Inc.\"\n\
             192.0.2.1,DE,Berlin,64501,Other\n\
             192.0.2.2,FR,Paris,64502,Third\n",
        )
        .unwrap();

        let table = load_metadata_table(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table["192.0.2.1"].country, "NL");
        assert_eq!(table["192.0.2.1"].asn_name, "Example, Inc.");
    }

    #[test]
    fn test_merge_drops_unmatched_records() {
        let mut table = MetadataTable::new();
        table.insert(
            "192.0.2.1".to_string(),
            AddressRecord {
                ip: "192.0.2.1".to_string(),
                country: "NL".to_string(),
                city: "Amsterdam".to_string(),
                asn: "64500".to_string(),
                asn_name: "Example".to_string(),
            },
        );

        // Exact match only: no prefix or whitespace tolerance
        let merged = merge_records(
            vec![decoded("192.0.2.1"), decoded("192.0.2.10"), decoded(" 192.0.2.1")],
            &table,
        );

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].decoded.ip, "192.0.2.1");
        assert_eq!(merged[0].address.city, "Amsterdam");
    }

    #[test]
    fn test_resolve_metadata_miss() {
        let temp_dir = TempDir::new().unwrap();
        let registry = MetadataRegistry::new(temp_dir.path().join("map.json"));

        match resolve_metadata(&registry, &temp_dir.path().join("r.csv")).unwrap_err() {
            Error::RegistryMiss { path } => assert!(path.ends_with("r.csv")),
            _ => panic!("Expected RegistryMiss error"),
        }
    }
}

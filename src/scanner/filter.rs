//! Scan result filtering
//!
//! Scanners report every response they receive, including stray replies
//! from addresses that were never probed and responders with an empty
//! payload. Filtering keeps only rows whose `saddr` is an exact member of
//! the whitelist and whose `data` column is non-empty.

use crate::constants::columns;
use crate::{Error, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Row counts of one filtered result file
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    pub kept: usize,
    pub dropped: usize,
}

/// Load a whitelist as the set of its trimmed, non-empty lines
pub fn load_whitelist(path: &Path) -> Result<HashSet<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::io(format!("Failed to read whitelist {}", path.display()), e))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Copy the in-scope rows of `unfiltered` into `filtered`, header included
pub fn filter_results(
    unfiltered: &Path,
    filtered: &Path,
    whitelist: &HashSet<String>,
) -> Result<FilterStats> {
    let source = unfiltered.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(unfiltered)
        .map_err(|e| Error::csv_parsing(&source, "Failed to open scan results", Some(e)))?;

    let headers = reader
        .headers()
        .map_err(|e| Error::csv_parsing(&source, "Failed to read header", Some(e)))?
        .clone();
    let saddr_idx = column_index(&headers, columns::SADDR, &source)?;
    let data_idx = column_index(&headers, columns::DATA, &source)?;

    let target = filtered.display().to_string();
    let mut writer = csv::Writer::from_path(filtered)
        .map_err(|e| Error::csv_parsing(&target, "Failed to create filtered results", Some(e)))?;
    writer
        .write_record(&headers)
        .map_err(|e| Error::csv_parsing(&target, "Failed to write header", Some(e)))?;

    let mut stats = FilterStats::default();
    for record in reader.records() {
        let record =
            record.map_err(|e| Error::csv_parsing(&source, "Failed to read row", Some(e)))?;

        let saddr = record.get(saddr_idx).unwrap_or_default();
        let data = record.get(data_idx).unwrap_or_default();
        if whitelist.contains(saddr) && !data.is_empty() {
            writer
                .write_record(&record)
                .map_err(|e| Error::csv_parsing(&target, "Failed to write row", Some(e)))?;
            stats.kept += 1;
        } else {
            stats.dropped += 1;
        }
    }

    writer
        .flush()
        .map_err(|e| Error::io(format!("Failed to flush {}", target), e))?;

    debug!(
        "Filtered {}: kept {}, dropped {}",
        source, stats.kept, stats.dropped
    );
    Ok(stats)
}

fn column_index(headers: &csv::StringRecord, name: &str, file: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| Error::csv_parsing(file, format!("missing '{}' column", name), None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_whitelist_trims_and_skips_blank_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("w.txt");
        fs::write(&path, "192.0.2.1\n  192.0.2.2 \n\n").unwrap();

        let whitelist = load_whitelist(&path).unwrap();
        assert_eq!(whitelist.len(), 2);
        assert!(whitelist.contains("192.0.2.2"));
    }

    #[test]
    fn test_filter_keeps_whitelisted_non_empty_rows() {
        let temp_dir = TempDir::new().unwrap();
        let unfiltered = temp_dir.path().join("raw.csv");
        let filtered = temp_dir.path().join("filtered.csv");
        fs::write(
            &unfiltered,
            "saddr,sport,data\n\
             192.0.2.1,123,1c02\n\
             192.0.2.2,123,\n\
             198.51.100.7,123,1c02\n\
             192.0.2.10,123,1c02\n",
        )
        .unwrap();

        // 192.0.2.10 shares a prefix with 192.0.2.1 but is not a member
        let whitelist: HashSet<String> = ["192.0.2.1", "192.0.2.2"]
            .into_iter()
            .map(String::from)
            .collect();

        let stats = filter_results(&unfiltered, &filtered, &whitelist).unwrap();
        assert_eq!(stats, FilterStats { kept: 1, dropped: 3 });

        let content = fs::read_to_string(&filtered).unwrap();
        assert_eq!(content, "saddr,sport,data\n192.0.2.1,123,1c02\n");
    }

    #[test]
    fn test_filter_requires_saddr_and_data_columns() {
        let temp_dir = TempDir::new().unwrap();
        let unfiltered = temp_dir.path().join("raw.csv");
        fs::write(&unfiltered, "addr,payload\n192.0.2.1,00\n").unwrap();

        let result = filter_results(
            &unfiltered,
            &temp_dir.path().join("out.csv"),
            &HashSet::new(),
        );
        match result.unwrap_err() {
            Error::CsvParsing { message, .. } => assert!(message.contains("saddr")),
            _ => panic!("Expected CsvParsing error"),
        }
    }
}

//! Address classifier
//!
//! Splits raw `ip,country,city,asn,asn_name` lists into per-family
//! partitions, de-duplicates them by ip, writes one whitelist and one
//! metadata table per partition and links the two in the registry.

use crate::constants::{METADATA_SUBDIR, RAW_SUBDIR, columns};
use crate::models::{AddressRecord, ClassifyStats, IpMode};
use crate::registry::MetadataRegistry;
use crate::{Error, Result};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Leading `traceroute-` token or a standalone `ips` segment
static NAME_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^traceroute-)|(?:^|_)ips(?:_|$)").expect("name token pattern is valid")
});

/// Time-of-day token dropped from aggregate output names
static TIME_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"T\d{4}").expect("time token pattern is valid"));

/// Fallback base name when token stripping leaves nothing
const FALLBACK_NAME: &str = "addresses";

/// De-duplicated, insertion-ordered address set of one family
#[derive(Debug, Default)]
pub struct Partition {
    seen: HashSet<String>,
    records: Vec<AddressRecord>,
}

impl Partition {
    /// Add a record unless its ip is already present
    pub fn insert(&mut self, record: AddressRecord) -> bool {
        if !self.seen.insert(record.ip.clone()) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AddressRecord] {
        &self.records
    }
}

/// One partition per address family
#[derive(Debug, Default)]
struct Buckets {
    ipv4: Partition,
    ipv6: Partition,
}

impl Buckets {
    fn get(&self, mode: IpMode) -> &Partition {
        match mode {
            IpMode::Ipv4 => &self.ipv4,
            IpMode::Ipv6 => &self.ipv6,
        }
    }

    fn get_mut(&mut self, mode: IpMode) -> &mut Partition {
        match mode {
            IpMode::Ipv4 => &mut self.ipv4,
            IpMode::Ipv6 => &mut self.ipv6,
        }
    }
}

/// Paths of one written partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFiles {
    pub raw: PathBuf,
    pub metadata: PathBuf,
}

/// Splits raw address lists and registers the outputs
pub struct AddressClassifier<'a> {
    registry: &'a MetadataRegistry,
    persist: bool,
}

impl<'a> AddressClassifier<'a> {
    pub fn new(registry: &'a MetadataRegistry, persist: bool) -> Self {
        Self { registry, persist }
    }

    /// Classify every `*.txt` file directly inside `input_dir`
    ///
    /// In per-file mode the buckets are reset for each input file and one
    /// output pair per family is written for it. Otherwise the buckets
    /// accumulate across all files and a single pair per family is written
    /// at the end.
    pub fn split_ips(
        &self,
        input_dir: &Path,
        out_dir: &Path,
        per_file: bool,
    ) -> Result<ClassifyStats> {
        let inputs = discover_inputs(input_dir)?;
        info!(
            "Classifying {} address files from {} ({})",
            inputs.len(),
            input_dir.display(),
            if per_file { "per-file" } else { "aggregate" }
        );

        let mut stats = ClassifyStats::default();
        let mut buckets = Buckets::default();
        let mut last_stem = None;

        for input in &inputs {
            if per_file {
                buckets = Buckets::default();
            }

            if let Err(e) = read_into(input, &mut buckets, &mut stats) {
                warn!("Skipping {}: {}", input.display(), e);
                continue;
            }
            let stem = file_stem(input);

            if per_file {
                let name = output_name(&stem, false);
                self.write_buckets(&buckets, out_dir, &name, &mut stats)?;
            }
            last_stem = Some(stem);
        }

        match last_stem {
            Some(stem) if !per_file => {
                let name = output_name(&stem, true);
                self.write_buckets(&buckets, out_dir, &name, &mut stats)?;
            }
            None => warn!("No address files found in {}", input_dir.display()),
            _ => {}
        }

        Ok(stats)
    }

    fn write_buckets(
        &self,
        buckets: &Buckets,
        out_dir: &Path,
        name: &str,
        stats: &mut ClassifyStats,
    ) -> Result<()> {
        for mode in IpMode::ALL {
            let partition = buckets.get(mode);
            let files = write_partition(partition, out_dir, mode, name)?;

            if let Err(e) = self.registry.set(&files.raw, &files.metadata, self.persist) {
                warn!(
                    "Failed to persist registry entry for {}: {}",
                    files.raw.display(),
                    e
                );
            }

            match mode {
                IpMode::Ipv4 => stats.ipv4_written += partition.len(),
                IpMode::Ipv6 => stats.ipv6_written += partition.len(),
            }
            info!(
                "Wrote {} {} addresses to {}",
                partition.len(),
                mode,
                files.raw.display()
            );
            stats.outputs.push(files.raw);
        }
        Ok(())
    }
}

/// `*.txt` files directly inside `dir`, in file-name order
fn discover_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::input_not_found(dir));
    }

    let mut inputs = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "txt") {
            inputs.push(path.to_path_buf());
        }
    }
    Ok(inputs)
}

/// Read one address file into the buckets
///
/// Lines are decoded individually so a line that is not valid UTF-8 is
/// skipped like any other malformed line.
fn read_into(path: &Path, buckets: &mut Buckets, stats: &mut ClassifyStats) -> Result<()> {
    let content =
        fs::read(path).map_err(|e| Error::io(format!("Failed to read {}", path.display()), e))?;
    let file = path.display().to_string();
    stats.files_read += 1;

    let mut duplicates = 0usize;
    for (i, bytes) in content.split(|b| *b == b'\n').enumerate() {
        let parsed = std::str::from_utf8(bytes)
            .map_err(|_| Error::invalid_line(&file, i + 1, "line is not valid UTF-8"))
            .and_then(|line| parse_line(line, &file, i + 1));
        match parsed {
            Ok(Some((mode, record))) => {
                if !buckets.get_mut(mode).insert(record) {
                    duplicates += 1;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("{}", e);
                stats.lines_skipped += 1;
            }
        }
    }

    debug!("Read {}: {} duplicate addresses", file, duplicates);
    Ok(())
}

/// Parse one `ip,country,city,asn,asn_name` line
///
/// Returns `Ok(None)` for blank lines. The line is split on the first four
/// commas so `asn_name` may itself contain commas.
pub fn parse_line(
    line: &str,
    file: &str,
    line_no: usize,
) -> Result<Option<(IpMode, AddressRecord)>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let fields: Vec<&str> = line.splitn(5, ',').collect();
    let [ip, country, city, asn, asn_name] = fields[..] else {
        return Err(Error::invalid_line(
            file,
            line_no,
            format!("expected 5 fields, found {}", fields.len()),
        ));
    };

    let addr: IpAddr = ip
        .parse()
        .map_err(|_| Error::invalid_line(file, line_no, format!("invalid ip address '{}'", ip)))?;

    Ok(Some((
        IpMode::of(&addr),
        AddressRecord {
            ip: ip.to_string(),
            country: country.to_string(),
            city: city.to_string(),
            asn: asn.to_string(),
            asn_name: asn_name.to_string(),
        },
    )))
}

/// Derive the output base name from an input file stem
pub fn output_name(stem: &str, aggregate: bool) -> String {
    let mut name = NAME_TOKENS.replace_all(stem, "_").into_owned();
    if aggregate {
        name = TIME_TOKEN.replace_all(&name, "").into_owned();
    }

    let name = name.trim_matches('_');
    if name.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        name.to_string()
    }
}

/// Write the raw list and metadata table of one partition
pub fn write_partition(
    partition: &Partition,
    out_dir: &Path,
    mode: IpMode,
    name: &str,
) -> Result<PartitionFiles> {
    let raw_dir = out_dir.join(mode.as_str()).join(RAW_SUBDIR);
    let meta_dir = out_dir.join(mode.as_str()).join(METADATA_SUBDIR);
    for dir in [&raw_dir, &meta_dir] {
        fs::create_dir_all(dir)
            .map_err(|e| Error::io(format!("Failed to create {}", dir.display()), e))?;
    }

    let raw = raw_dir.join(format!("{}_{}.txt", name, mode));
    let metadata = meta_dir.join(format!("{}_{}.csv", name, mode));

    let mut listing = String::new();
    for record in partition.records() {
        listing.push_str(&record.ip);
        listing.push('\n');
    }
    fs::write(&raw, listing)
        .map_err(|e| Error::io(format!("Failed to write {}", raw.display()), e))?;

    write_metadata_table(&metadata, partition.records())?;

    Ok(PartitionFiles {
        raw: fs::canonicalize(&raw).unwrap_or(raw),
        metadata: fs::canonicalize(&metadata).unwrap_or(metadata),
    })
}

/// Write an `ip,country,city,asn,asn_name` table, header included even when empty
pub fn write_metadata_table(path: &Path, records: &[AddressRecord]) -> Result<()> {
    let file_name = path.display().to_string();
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| Error::csv_parsing(&file_name, "Failed to create metadata table", Some(e)))?;

    let mut header = vec![columns::IP];
    header.extend_from_slice(columns::GEO);
    writer
        .write_record(&header)
        .map_err(|e| Error::csv_parsing(&file_name, "Failed to write header", Some(e)))?;

    for record in records {
        writer
            .serialize(record)
            .map_err(|e| Error::csv_parsing(&file_name, "Failed to write record", Some(e)))?;
    }

    writer
        .flush()
        .map_err(|e| Error::io(format!("Failed to flush {}", file_name), e))?;
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_input(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_parse_line_classifies_families() {
        let (mode, record) = parse_line("192.0.2.1,NL,Amsterdam,64500,Example", "f", 1)
            .unwrap()
            .unwrap();
        assert_eq!(mode, IpMode::Ipv4);
        assert_eq!(record.city, "Amsterdam");

        let (mode, _) = parse_line("2001:db8::1,DE,Berlin,64501,Other", "f", 2)
            .unwrap()
            .unwrap();
        assert_eq!(mode, IpMode::Ipv6);
    }

    #[test]
    fn test_parse_line_keeps_commas_in_asn_name() {
        let (_, record) = parse_line("192.0.2.1,US,Austin,64500,Example, Inc.", "f", 1)
            .unwrap()
            .unwrap();
        assert_eq!(record.asn_name, "Example, Inc.");
    }

    #[test]
    fn test_parse_line_rejects_bad_input() {
        match parse_line("not-an-ip,NL,Amsterdam,64500,Example", "f.txt", 7).unwrap_err() {
            Error::InvalidLine { file, line, .. } => {
                assert_eq!(file, "f.txt");
                assert_eq!(line, 7);
            }
            _ => panic!("Expected InvalidLine error"),
        }
        assert!(parse_line("192.0.2.1,NL", "f", 1).is_err());
        assert!(parse_line("   ", "f", 1).unwrap().is_none());
    }

    #[test]
    fn test_output_name_strips_tokens() {
        assert_eq!(output_name("traceroute-2024_ips_T1200", false), "2024_T1200");
        assert_eq!(output_name("traceroute-2024_ips_T1200", true), "2024");
        assert_eq!(output_name("ips_sample", false), "sample");
        assert_eq!(output_name("sample_ips", false), "sample");
        assert_eq!(output_name("tips_sample", false), "tips_sample");
        assert_eq!(output_name("ips", false), FALLBACK_NAME);
    }

    #[test]
    fn test_partition_deduplicates_in_insertion_order() {
        let record = |ip: &str| AddressRecord {
            ip: ip.to_string(),
            country: "NL".to_string(),
            city: String::new(),
            asn: String::new(),
            asn_name: String::new(),
        };
        let mut partition = Partition::default();
        assert!(partition.insert(record("192.0.2.2")));
        assert!(partition.insert(record("192.0.2.1")));
        assert!(!partition.insert(record("192.0.2.2")));

        let ips: Vec<_> = partition.records().iter().map(|r| r.ip.as_str()).collect();
        assert_eq!(ips, vec!["192.0.2.2", "192.0.2.1"]);
    }

    #[test]
    fn test_aggregate_mode_writes_one_pair_per_family() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_input(
            input.path(),
            "traceroute-a_ips_T0100.txt",
            "192.0.2.1,NL,Amsterdam,64500,A\n2001:db8::1,DE,Berlin,64501,B\n",
        );
        write_input(
            input.path(),
            "traceroute-a_ips_T0200.txt",
            "192.0.2.1,NL,Amsterdam,64500,A\nbogus,XX,Nowhere,0,None\n192.0.2.9,FR,Paris,64502,C\n",
        );
        write_input(input.path(), "notes.md", "ignored");

        let registry = MetadataRegistry::new(output.path().join("map.json"));
        let stats = AddressClassifier::new(&registry, false)
            .split_ips(input.path(), output.path(), false)
            .unwrap();

        assert_eq!(stats.files_read, 2);
        assert_eq!(stats.lines_skipped, 1);
        assert_eq!(stats.ipv4_written, 2);
        assert_eq!(stats.ipv6_written, 1);
        assert_eq!(stats.outputs.len(), 2);

        let raw_v4 = output.path().join("ipv4/raw/a_ipv4.txt");
        assert_eq!(read_lines(&raw_v4), vec!["192.0.2.1", "192.0.2.9"]);

        let meta_v4 = output.path().join("ipv4/metadata/a_ipv4.csv");
        let meta_lines = read_lines(&meta_v4);
        assert_eq!(meta_lines[0], "ip,country,city,asn,asn_name");
        assert_eq!(meta_lines.len(), 3);

        let resolved = registry.get(&raw_v4).unwrap();
        assert_eq!(resolved, fs::canonicalize(&meta_v4).unwrap());
    }

    #[test]
    fn test_per_file_mode_resets_buckets() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_input(input.path(), "first_ips.txt", "192.0.2.1,NL,A,1,X\n");
        write_input(input.path(), "second_ips.txt", "192.0.2.2,NL,B,2,Y\n");

        let registry = MetadataRegistry::new(output.path().join("map.json"));
        let stats = AddressClassifier::new(&registry, false)
            .split_ips(input.path(), output.path(), true)
            .unwrap();

        assert_eq!(stats.outputs.len(), 4);
        assert_eq!(
            read_lines(&output.path().join("ipv4/raw/first_ipv4.txt")),
            vec!["192.0.2.1"]
        );
        assert_eq!(
            read_lines(&output.path().join("ipv4/raw/second_ipv4.txt")),
            vec!["192.0.2.2"]
        );

        // No IPv6 input leaves an empty whitelist and a header-only table
        let raw_v6 = output.path().join("ipv6/raw/first_ipv6.txt");
        assert_eq!(fs::metadata(&raw_v6).unwrap().len(), 0);
        let meta_v6 = output.path().join("ipv6/metadata/first_ipv6.csv");
        assert_eq!(read_lines(&meta_v6).len(), 1);
    }

    #[test]
    fn test_persisted_classification_is_visible_to_fresh_registry() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_input(input.path(), "batch.txt", "192.0.2.1,NL,A,1,X\n");
        let store = output.path().join("map.json");

        AddressClassifier::new(&MetadataRegistry::new(&store), true)
            .split_ips(input.path(), output.path(), false)
            .unwrap();

        let fresh = MetadataRegistry::new(&store);
        assert!(fresh.get(&output.path().join("ipv4/raw/batch_ipv4.txt")).is_some());
    }

    #[test]
    fn test_non_utf8_line_is_skipped() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        fs::write(
            input.path().join("a.txt"),
            b"192.0.2.1,NL,Amsterdam,64500,A\n192.0.2.5,CH,Z\xfcrich,64505,B\n".as_slice(),
        )
        .unwrap();
        write_input(input.path(), "b.txt", "192.0.2.2,DE,Berlin,64501,C\n");

        let registry = MetadataRegistry::new(output.path().join("map.json"));
        let stats = AddressClassifier::new(&registry, false)
            .split_ips(input.path(), output.path(), false)
            .unwrap();

        assert_eq!(stats.files_read, 2);
        assert_eq!(stats.lines_skipped, 1);
        assert_eq!(stats.ipv4_written, 2);
        assert_eq!(
            read_lines(&output.path().join("ipv4/raw/b_ipv4.txt")),
            vec!["192.0.2.1", "192.0.2.2"]
        );
    }

    #[test]
    fn test_missing_input_directory() {
        let output = TempDir::new().unwrap();
        let registry = MetadataRegistry::new(output.path().join("map.json"));
        let result = AddressClassifier::new(&registry, false).split_ips(
            &output.path().join("missing"),
            output.path(),
            false,
        );

        match result.unwrap_err() {
            Error::InputNotFound { .. } => {}
            _ => panic!("Expected InputNotFound error"),
        }
    }
}

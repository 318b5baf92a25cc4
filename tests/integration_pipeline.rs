//! End-to-end pipeline tests: classify, scan with a stand-in scanner,
//! decode and merge.

#![cfg(unix)]

use probe_census::classifier::AddressClassifier;
use probe_census::coordinator::Postprocessor;
use probe_census::scanner::ScanExecutor;
use probe_census::{IpMode, MetadataRegistry, PipelineConfig, ScanMode};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// NTP server reply: LI=0, VN=4, Mode=4, stratum 2, poll 6, precision -23
fn ntp_reply_hex() -> String {
    let mut payload = vec![0x24, 0x02, 0x06, 0xE9];
    payload.extend_from_slice(&[0x00, 0x00, 0x01, 0x00]);
    payload.extend_from_slice(&[0x00, 0x00, 0x02, 0x00]);
    payload.extend_from_slice(&[192, 0, 2, 254]);
    for _ in 0..4 {
        payload.extend_from_slice(&3_910_000_000u32.to_be_bytes());
        payload.extend_from_slice(&0u32.to_be_bytes());
    }
    hex::encode(payload)
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Scanner stand-in answering for every whitelisted address plus one stray
fn fake_scanner(dir: &Path, payload: &str) -> PathBuf {
    let body = format!(
        r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    -w) wl="$2"; shift ;;
  esac
  shift
done
echo "saddr,sport,data" > "$out"
while read -r ip; do
  [ -n "$ip" ] && echo "$ip,123,{payload}" >> "$out"
done < "$wl"
echo "203.0.113.99,123,{payload}" >> "$out"
"#
    );
    write_script(dir, "fake-zmap.sh", &body)
}

fn pipeline_config(root: &Path) -> PipelineConfig {
    let probes = root.join("probes");
    fs::create_dir_all(&probes).unwrap();
    fs::write(probes.join("ntp_123.pkt"), [0xe3, 0x00, 0x04, 0xfa]).unwrap();
    fs::write(probes.join("snmp3_161.pkt"), [0x30]).unwrap();

    PipelineConfig::default()
        .with_data_dir(root.join("data"))
        .with_scanner(fake_scanner(root, &ntp_reply_hex()))
        .without_sudo()
        .with_probe_dir(probes)
        .with_workers(3)
        .without_progress()
}

#[tokio::test]
async fn test_ntp_pipeline_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let raw = temp_dir.path().join("raw");
    fs::create_dir_all(&raw).unwrap();
    fs::write(
        raw.join("traceroute-sample_ips.txt"),
        "192.0.2.1,NL,Amsterdam,64500,Example\n\
         192.0.2.2,DE,Berlin,64501,Other, GmbH\n\
         192.0.2.1,NL,Amsterdam,64500,Example\n\
         2001:db8::1,FR,Paris,64502,Third\n\
         999.1.1.1,XX,Nowhere,0,Invalid\n",
    )
    .unwrap();

    let config = pipeline_config(temp_dir.path());

    // Each stage gets its own registry, as separate invocations would
    let classify_stats = AddressClassifier::new(
        &MetadataRegistry::new(config.registry_store_path()),
        config.persist_registry,
    )
    .split_ips(&raw, &config.ips_dir(), false)
    .unwrap();
    assert_eq!(classify_stats.ipv4_written, 2);
    assert_eq!(classify_stats.ipv6_written, 1);
    assert_eq!(classify_stats.lines_skipped, 1);

    let scan_registry = MetadataRegistry::new(config.registry_store_path());
    let scan_stats = ScanExecutor::new(&config, &scan_registry)
        .scan_directory(
            &config.ips_dir().join("ipv4/raw"),
            &config.encoded_dir(),
            IpMode::Ipv4,
            ScanMode::Ntp,
        )
        .await
        .unwrap();
    assert_eq!(scan_stats.files_scanned, 1);
    assert_eq!(scan_stats.rows_kept, 2);
    assert_eq!(scan_stats.rows_dropped, 1);

    let decode_registry = MetadataRegistry::new(config.registry_store_path());
    let stats = Postprocessor::new(&config, &decode_registry)
        .run(
            &config.encoded_dir().join("ipv4/filtered"),
            &config.decoded_dir(),
            IpMode::Ipv4,
            ScanMode::Ntp,
            true,
        )
        .await
        .unwrap();
    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.files_failed, 0);
    assert_eq!(stats.rows_written, 2);

    let output = config
        .decoded_dir()
        .join("ipv4/zmap_ntp_sample_ipv4_parsed.csv");
    assert_eq!(stats.outputs, vec![output.clone()]);

    let mut reader = csv::Reader::from_path(&output).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(&headers[0], "ip");
    assert_eq!(&headers[headers.len() - 1], "asn_name");

    let column = |name: &str| headers.iter().position(|h| h == name).unwrap();
    let mut rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    rows.sort_by(|a, b| a[0].cmp(&b[0]));

    assert_eq!(&rows[0][0], "192.0.2.1");
    assert_eq!(&rows[0][column("VN")], "4");
    assert_eq!(&rows[0][column("Stratum")], "2");
    assert_eq!(&rows[0][column("Root_Delay (s)")], "0.00390625");
    assert_eq!(&rows[0][column("Ref_ID")], "192.0.2.254");
    assert_eq!(
        &rows[0][column("Tx_Timestamp")],
        "2023-11-26 15:06:40.000000"
    );
    assert_eq!(&rows[0][column("city")], "Amsterdam");
    assert_eq!(&rows[1][column("asn_name")], "Other, GmbH");
}

#[tokio::test]
async fn test_snmp_postprocess_without_metadata() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("filtered");
    fs::create_dir_all(&input).unwrap();
    fs::write(
        input.join("zmap_snmpv3_batch_ipv4.csv"),
        "saddr,sport,data,country\n\
         192.0.2.1,161,303a020103,NL\n\
         192.0.2.2,161,not-hex,DE\n\
         192.0.2.3,161,303a020103,FR\n",
    )
    .unwrap();

    let converter = write_script(temp_dir.path(), "text2pcap.sh", "#!/bin/sh\ntouch \"$5\"\n");
    let dissector = write_script(
        temp_dir.path(),
        "tshark.sh",
        r#"#!/bin/sh
cat <<'EOF'
[{"_source":{"layers":{"snmp":{
  "snmp.msgAuthoritativeEngineID_tree":{"snmp.engineid.enterprise":"2636",
    "snmp.engineid.format":"3","snmp.engineid.mac":"aa:bb:cc:dd:ee:ff"},
  "snmp.msgAuthoritativeEngineBoots":"4","snmp.msgAuthoritativeEngineTime":"90061"}}}}]
EOF
"#,
    );

    let config = PipelineConfig::default()
        .with_data_dir(temp_dir.path().join("data"))
        .with_dissector_tools(converter, dissector)
        .with_row_timeout(Some(10))
        .without_progress();
    let registry = MetadataRegistry::new(config.registry_store_path());

    let stats = Postprocessor::new(&config, &registry)
        .run(
            &input,
            &config.decoded_dir(),
            IpMode::Ipv4,
            ScanMode::Snmpv3,
            false,
        )
        .await
        .unwrap();

    assert_eq!(stats.rows_decoded, 2);
    assert_eq!(stats.rows_failed, 1);
    assert_eq!(stats.rows_written, 2);

    let content = fs::read_to_string(&stats.outputs[0]).unwrap();
    let mut lines: Vec<&str> = content.lines().skip(1).collect();
    lines.sort();
    assert_eq!(
        lines,
        vec![
            "192.0.2.1,2636,3,aa:bb:cc:dd:ee:ff,4,1d1h1m1s,NL,,,",
            "192.0.2.3,2636,3,aa:bb:cc:dd:ee:ff,4,1d1h1m1s,FR,,,",
        ]
    );
}

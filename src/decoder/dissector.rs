//! Dissector JSON schema
//!
//! Only the keys the SNMP decoder consumes are modelled. The dissector
//! emits `[{"_source": {"layers": {"snmp": {...}}}}]` with every field
//! value rendered as a string; anything that does not match this shape is
//! reported as a dissector failure.

use crate::constants::snmp::UPTIME_UNITS;
use crate::models::SnmpEngine;
use crate::{Error, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Packet {
    #[serde(rename = "_source")]
    source: Source,
}

#[derive(Debug, Deserialize)]
struct Source {
    layers: Layers,
}

#[derive(Debug, Deserialize)]
struct Layers {
    snmp: SnmpLayer,
}

#[derive(Debug, Deserialize)]
struct SnmpLayer {
    #[serde(rename = "snmp.msgAuthoritativeEngineID_tree")]
    engine_id: EngineIdTree,

    #[serde(rename = "snmp.msgAuthoritativeEngineBoots")]
    engine_boots: String,

    #[serde(rename = "snmp.msgAuthoritativeEngineTime")]
    engine_time: String,
}

#[derive(Debug, Deserialize)]
struct EngineIdTree {
    #[serde(rename = "snmp.engineid.enterprise")]
    enterprise: String,

    #[serde(rename = "snmp.engineid.format")]
    format: String,

    /// Only present for MAC-address engine IDs
    #[serde(rename = "snmp.engineid.mac", default)]
    mac: Option<String>,
}

/// Extract the engine fields from dissector JSON output
pub fn parse_engine(output: &[u8]) -> Result<SnmpEngine> {
    let packets: Vec<Packet> = serde_json::from_slice(output)
        .map_err(|e| Error::external_tool("dissector", format!("unexpected output: {}", e)))?;

    let packet = packets
        .into_iter()
        .next()
        .ok_or_else(|| Error::external_tool("dissector", "no packets in output"))?;
    let snmp = packet.source.layers.snmp;

    let uptime_secs: u64 = snmp.engine_time.trim().parse().map_err(|_| {
        Error::external_tool(
            "dissector",
            format!("engine time '{}' is not an integer", snmp.engine_time),
        )
    })?;

    Ok(SnmpEngine {
        enterprise: snmp.engine_id.enterprise,
        engine_id_format: snmp.engine_id.format,
        engine_id_data: snmp.engine_id.mac.unwrap_or_default(),
        engine_boots: snmp.engine_boots,
        engine_time: format_uptime(uptime_secs),
    })
}

/// Render a seconds count as `DdHhMmSs`
pub fn format_uptime(seconds: u64) -> String {
    let [day, hour, minute] = UPTIME_UNITS;
    let days = seconds / day;
    let hours = seconds % day / hour;
    let minutes = seconds % hour / minute;
    let secs = seconds % minute;
    format!("{}d{}h{}m{}s", days, hours, minutes, secs)
}

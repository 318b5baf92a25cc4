//! Protocol decoding
//!
//! A [`Decoder`] turns one scan result row into one decoded record using the
//! strategy attached to the measurement mode:
//!
//! - **Structural** (NTP): fixed-layout header decoded in-process
//! - **Pipelined** (SNMPv3): payload handed to an external converter and
//!   dissector
//!
//! Tool failures never escape a decoder: they become empty or sentinel
//! fields on the record. Only a payload that is not hex at all, or a local
//! I/O failure, is returned as a row decode error.

pub mod dissector;
pub mod ntp;
pub mod snmp;

pub use snmp::SnmpDecoder;

use crate::config::PipelineConfig;
use crate::models::{DecodeStrategy, DecodedRecord, ScanMode, ScanResultRow};
use crate::Result;

/// Row decoder for one measurement mode
#[derive(Debug, Clone)]
pub enum Decoder {
    Structural,
    Pipelined(SnmpDecoder),
}

impl Decoder {
    /// Decoder for the strategy of `mode`, configured from `config`
    pub fn for_mode(mode: ScanMode, config: &PipelineConfig) -> Self {
        match mode.strategy() {
            DecodeStrategy::Structural => Decoder::Structural,
            DecodeStrategy::Pipelined => Decoder::Pipelined(SnmpDecoder::new(
                &config.converter_bin,
                &config.dissector_bin,
                config.row_timeout(),
            )),
        }
    }

    pub fn strategy(&self) -> DecodeStrategy {
        match self {
            Decoder::Structural => DecodeStrategy::Structural,
            Decoder::Pipelined(_) => DecodeStrategy::Pipelined,
        }
    }

    /// Decode one row into one record
    pub async fn decode(&self, row: &ScanResultRow) -> Result<DecodedRecord> {
        match self {
            Decoder::Structural => ntp::decode_row(row),
            Decoder::Pipelined(snmp) => snmp.decode_row(row).await,
        }
    }
}

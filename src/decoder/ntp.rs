//! Structural NTP header decoding
//!
//! Layout of the 48-byte header:
//!
//! | Bytes | Field                                              |
//! |-------|----------------------------------------------------|
//! | 0     | leap indicator (2 bits), version (3), mode (3)     |
//! | 1     | stratum                                            |
//! | 2     | poll exponent                                      |
//! | 3     | precision exponent (signed)                        |
//! | 4-7   | root delay, 16.16 fixed point                      |
//! | 8-11  | root dispersion, 16.16 fixed point                 |
//! | 12-15 | reference identifier                               |
//! | 16-47 | reference, origin, receive, transmit timestamps    |
//!
//! Each timestamp is 32 bits of seconds since 1900-01-01T00:00:00Z followed
//! by a 32-bit binary fraction of a second.

use crate::constants::ntp::{HEADER_LEN, TIMESTAMP_OFFSETS};
use crate::models::{DecodedRecord, NtpHeader, ProtocolFields, ScanResultRow};
use crate::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use tracing::debug;

/// Decode the hex payload of one row
///
/// Payloads shorter than a header yield empty NTP fields; payloads that are
/// not valid hex are a decode failure for the row.
pub fn decode_row(row: &ScanResultRow) -> Result<DecodedRecord> {
    let payload = hex::decode(row.data.trim())
        .map_err(|e| Error::row_decode(row.index, format!("invalid payload hex: {}", e)))?;

    let header = decode_header(&payload);
    if header.is_none() {
        debug!(
            "Row {} from {}: {} byte payload is too short for an NTP header",
            row.index,
            row.saddr,
            payload.len()
        );
    }

    Ok(DecodedRecord::new(row, ProtocolFields::Ntp(header)))
}

/// Decode a raw NTP header, `None` if fewer than 48 bytes are available
pub fn decode_header(payload: &[u8]) -> Option<NtpHeader> {
    if payload.len() < HEADER_LEN {
        return None;
    }

    let flags = payload[0];
    let [reference, origin, receive, transmit] =
        TIMESTAMP_OFFSETS.map(|offset| timestamp(&payload[offset..offset + 8]));

    Some(NtpHeader {
        leap_indicator: flags >> 6,
        version: (flags >> 3) & 0x07,
        mode: flags & 0x07,
        stratum: payload[1],
        poll: payload[2],
        precision: 2f64.powi(i32::from(payload[3] as i8)),
        root_delay: fixed_16_16(read_u32(&payload[4..8])),
        root_dispersion: fixed_16_16(read_u32(&payload[8..12])),
        reference_id: format!(
            "{}.{}.{}.{}",
            payload[12], payload[13], payload[14], payload[15]
        ),
        reference_timestamp: reference?,
        origin_timestamp: origin?,
        receive_timestamp: receive?,
        transmit_timestamp: transmit?,
    })
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn fixed_16_16(value: u32) -> f64 {
    f64::from(value >> 16) + f64::from(value & 0xffff) / 65536.0
}

/// Convert an 8-byte NTP timestamp to a calendar time
///
/// The fraction is rounded to the nearest microsecond.
fn timestamp(bytes: &[u8]) -> Option<NaiveDateTime> {
    let seconds = read_u32(&bytes[0..4]);
    let fraction = read_u32(&bytes[4..8]);
    let micros = (u64::from(fraction) * 1_000_000 + (1 << 31)) >> 32;

    ntp_epoch()?
        .checked_add_signed(TimeDelta::seconds(i64::from(seconds)))?
        .checked_add_signed(TimeDelta::microseconds(micros as i64))
}

fn ntp_epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1900, 1, 1)?.and_hms_opt(0, 0, 0)
}

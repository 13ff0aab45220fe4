//! KDBX timestamps come in two on-disk flavors: KDBX3 and earlier clients
//! write plain ISO-8601 strings, while KDBX4 clients write the base64
//! encoding of an 8-byte little-endian tick count (100ns units since
//! `0001-01-01T00:00:00`). Neither the XML nor the call sites in this crate
//! carry an explicit flag for which one to expect, so we detect it: if the
//! text base64-decodes to exactly 8 bytes, treat it as ticks, otherwise fall
//! back to the ISO-8601 string form.

use chrono::{NaiveDate, NaiveDateTime};

use base64::{engine::general_purpose as base64_engine, Engine as _};
use byteorder::{ByteOrder, LittleEndian};

use crate::error::XmlParseError;

fn ticks_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

pub(crate) fn parse_time(s: &str) -> Result<NaiveDateTime, XmlParseError> {
    let s = s.trim();

    if let Ok(bytes) = base64_engine::STANDARD.decode(s) {
        if bytes.len() == 8 {
            let ticks = LittleEndian::read_i64(&bytes);
            return Ok(ticks_epoch() + chrono::Duration::seconds(ticks / 10_000_000));
        }
    }

    Ok(NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")?)
}

pub(crate) fn format_time(t: &NaiveDateTime) -> String {
    let seconds = (*t - ticks_epoch()).num_seconds();
    let mut bytes = [0u8; 8];
    LittleEndian::write_i64(&mut bytes, seconds * 10_000_000);
    base64_engine::STANDARD.encode(bytes)
}

#[cfg(test)]
mod time_tests {
    use super::*;

    #[test]
    fn roundtrip_ticks() {
        let t = NaiveDate::from_ymd_opt(2023, 6, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        let encoded = format_time(&t);
        assert_eq!(parse_time(&encoded).unwrap(), t);
    }

    #[test]
    fn parses_iso8601() {
        let t = parse_time("2023-06-01T12:30:00Z").unwrap();
        assert_eq!(
            t,
            NaiveDate::from_ymd_opt(2023, 6, 1)
                .unwrap()
                .and_hms_opt(12, 30, 0)
                .unwrap()
        );
    }
}

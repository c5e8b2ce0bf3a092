//! Line codec for the network dataset file.
//!
//! ```text
//! ssid;bssid;rssi;frequency;capabilities;yyyy-MM-dd HH:mm:ss[;label;latitude;longitude]
//! ```
//!
//! `\`, `;`, CR and LF inside a field are backslash-escaped so an SSID can
//! never split a row. Rows written before labels and positions existed (six
//! fields) still parse; missing labels read as DANGEROUS and missing
//! coordinates as the `(0, 0)` sentinel. Extra trailing fields are ignored.

#![allow(missing_docs)]

use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime};

use crate::pipeline::records::{GeoPoint, NetworkRecord, RiskLabel};

pub const FIELD_SEPARATOR: char = ';';
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const MIN_FIELDS: usize = 6;
pub const LABEL_WHEN_MISSING: RiskLabel = RiskLabel::Dangerous;

/// Why a line was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    TooFewFields(usize),
    BadNumber { field: &'static str, raw: String },
    BadTimestamp(String),
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewFields(n) => write!(f, "expected at least {MIN_FIELDS} fields, got {n}"),
            Self::BadNumber { field, raw } => write!(f, "unparsable {field} {raw:?}"),
            Self::BadTimestamp(raw) => write!(f, "unparsable timestamp {raw:?}"),
        }
    }
}

/// Serialize one record, without the trailing newline.
#[must_use]
pub fn encode_line(record: &NetworkRecord) -> String {
    let (lat, lon) = record
        .location
        .map_or((0.0, 0.0), |p| (p.latitude, p.longitude));
    let fields = [
        escape_field(&record.ssid),
        escape_field(&record.bssid),
        record.rssi.to_string(),
        record.frequency.to_string(),
        escape_field(&record.capabilities),
        format_timestamp(record.observed_at),
        record.label.to_string(),
        format_coordinate(lat),
        format_coordinate(lon),
    ];
    fields.join(";")
}

/// Parse one line (without its newline).
pub fn decode_line(line: &str) -> Result<NetworkRecord, LineError> {
    let fields = split_fields(line.trim_end_matches('\r'));
    if fields.len() < MIN_FIELDS {
        return Err(LineError::TooFewFields(fields.len()));
    }

    let rssi = parse_number::<i32>("rssi", &fields[2])?;
    let frequency = parse_number::<u32>("frequency", &fields[3])?;
    let observed_at = parse_timestamp(&fields[5])?;

    let label = fields
        .get(6)
        .and_then(|raw| raw.parse::<RiskLabel>().ok())
        .unwrap_or(LABEL_WHEN_MISSING);
    let latitude = parse_optional_coordinate("latitude", fields.get(7))?;
    let longitude = parse_optional_coordinate("longitude", fields.get(8))?;

    let mut fields = fields.into_iter();
    let ssid = fields.next().unwrap_or_default();
    let bssid = fields.next().unwrap_or_default();
    let capabilities = fields.nth(2).unwrap_or_default();

    Ok(NetworkRecord {
        ssid,
        bssid,
        rssi,
        frequency,
        capabilities,
        label,
        observed_at,
        location: GeoPoint::from_stored(latitude, longitude),
    })
}

/// Store key of a line, or `None` for lines that [`decode_line`] rejects.
#[must_use]
pub fn decode_key(line: &str) -> Option<String> {
    decode_line(line).ok().map(|record| record.key())
}

#[must_use]
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Accepts the canonical format and bare epoch milliseconds.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, LineError> {
    let raw = raw.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        return Ok(ts);
    }
    if raw.len() >= 10 && raw.bytes().all(|b| b.is_ascii_digit())
        && let Ok(millis) = raw.parse::<i64>()
        && let Some(utc) = DateTime::from_timestamp_millis(millis)
    {
        return Ok(utc.with_timezone(&Local).naive_local());
    }
    Err(LineError::BadTimestamp(raw.to_string()))
}

#[must_use]
pub fn escape_field(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Split on unescaped separators, unescaping as it goes.
#[must_use]
pub fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::with_capacity(9);
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('n') => current.push('\n'),
                Some('r') => current.push('\r'),
                Some(other) => current.push(other),
                None => current.push('\\'),
            },
            FIELD_SEPARATOR => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

fn parse_number<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, LineError> {
    raw.trim().parse::<T>().map_err(|_| LineError::BadNumber {
        field,
        raw: raw.to_string(),
    })
}

fn parse_optional_coordinate(field: &'static str, raw: Option<&String>) -> Result<f64, LineError> {
    match raw.map(|r| r.trim()) {
        None | Some("") => Ok(0.0),
        Some(value) => {
            let parsed = parse_number::<f64>(field, value)?;
            if parsed.is_finite() {
                Ok(parsed)
            } else {
                Err(LineError::BadNumber {
                    field,
                    raw: value.to_string(),
                })
            }
        }
    }
}

fn format_coordinate(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).unwrap()
    }

    fn sample() -> NetworkRecord {
        NetworkRecord {
            ssid: "Cafe".to_string(),
            bssid: "00:11:22:33:44:55".to_string(),
            rssi: -67,
            frequency: 2437,
            capabilities: "[WPA2-PSK-CCMP][ESS]".to_string(),
            label: RiskLabel::Safe,
            observed_at: ts("2024-05-01 12:30:00"),
            location: Some(GeoPoint {
                latitude: 52.52,
                longitude: 13.405,
            }),
        }
    }

    #[test]
    fn encodes_extended_schema() {
        assert_eq!(
            encode_line(&sample()),
            "Cafe;00:11:22:33:44:55;-67;2437;[WPA2-PSK-CCMP][ESS];2024-05-01 12:30:00;SAFE;52.52;13.405"
        );
    }

    #[test]
    fn unknown_location_writes_zero_sentinel() {
        let mut record = sample();
        record.location = None;
        assert!(encode_line(&record).ends_with(";SAFE;0.0;0.0"));
        assert_eq!(decode_line(&encode_line(&record)).unwrap().location, None);
    }

    #[test]
    fn decodes_what_it_encodes() {
        let record = sample();
        assert_eq!(decode_line(&encode_line(&record)).unwrap(), record);
    }

    #[test]
    fn six_field_rows_default_label_and_location() {
        let record =
            decode_line("Old;aa:bb;-80;2412;[WEP][ESS];2023-01-02 03:04:05").unwrap();
        assert_eq!(record.label, RiskLabel::Dangerous);
        assert_eq!(record.location, None);
        assert_eq!(record.observed_at, ts("2023-01-02 03:04:05"));
    }

    #[test]
    fn extra_trailing_fields_are_ignored() {
        let record = decode_line(
            "X;aa;-50;5180;[ESS];2023-01-02 03:04:05;MEDIUM;1.5;2.5;future;fields",
        )
        .unwrap();
        assert_eq!(record.label, RiskLabel::Medium);
        assert_eq!(
            record.location,
            Some(GeoPoint {
                latitude: 1.5,
                longitude: 2.5
            })
        );
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert_eq!(
            decode_line("a;b;c").unwrap_err(),
            LineError::TooFewFields(3)
        );
        assert!(matches!(
            decode_line("a;b;loud;2412;[ESS];2023-01-02 03:04:05").unwrap_err(),
            LineError::BadNumber { field: "rssi", .. }
        ));
        assert!(matches!(
            decode_line("a;b;-50;-1;[ESS];2023-01-02 03:04:05").unwrap_err(),
            LineError::BadNumber {
                field: "frequency",
                ..
            }
        ));
        assert!(matches!(
            decode_line("a;b;-50;2412;[ESS];yesterday").unwrap_err(),
            LineError::BadTimestamp(_)
        ));
        assert!(matches!(
            decode_line("a;b;-50;2412;[ESS];2023-01-02 03:04:05;SAFE;north;0").unwrap_err(),
            LineError::BadNumber {
                field: "latitude",
                ..
            }
        ));
    }

    #[test]
    fn unknown_label_text_reads_as_dangerous() {
        let record = decode_line("a;b;-50;2412;[ESS];2023-01-02 03:04:05;SHRUG").unwrap();
        assert_eq!(record.label, RiskLabel::Dangerous);
    }

    #[test]
    fn epoch_millis_timestamps_are_accepted() {
        let record = decode_line("a;b;-50;2412;[ESS];1700000000000").unwrap();
        let expected = DateTime::from_timestamp_millis(1_700_000_000_000)
            .unwrap()
            .with_timezone(&Local)
            .naive_local();
        assert_eq!(record.observed_at, expected);
    }

    #[test]
    fn separators_inside_fields_are_escaped() {
        let mut record = sample();
        record.ssid = "semi;colon\\back\nslash".to_string();
        let line = encode_line(&record);
        assert!(!line.contains('\n'));
        assert_eq!(line.matches(';').count() - line.matches("\\;").count(), 8);
        assert_eq!(decode_line(&line).unwrap().ssid, record.ssid);
    }

    #[test]
    fn decode_key_matches_record_key() {
        let record = sample();
        assert_eq!(decode_key(&encode_line(&record)), Some(record.key()));
        assert_eq!(decode_key("garbage"), None);
    }
}

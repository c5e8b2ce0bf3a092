//! Observation and record types shared by the scan pipeline and the store.

#![allow(missing_docs)]

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WsnError};

/// Risk label assigned to a network. Total over every capability string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLabel {
    Safe,
    Medium,
    Dangerous,
}

impl RiskLabel {
    pub const ALL: [Self; 3] = [Self::Safe, Self::Medium, Self::Dangerous];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Medium => "MEDIUM",
            Self::Dangerous => "DANGEROUS",
        }
    }
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLabel {
    type Err = WsnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SAFE" => Ok(Self::Safe),
            "MEDIUM" => Ok(Self::Medium),
            "DANGEROUS" => Ok(Self::Dangerous),
            other => Err(WsnError::StoreRecord {
                details: format!("unknown risk label {other:?}"),
            }),
        }
    }
}

/// Latitude/longitude pair. `(0, 0)` is the "unknown" sentinel on disk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Build a point, mapping the `(0, 0)` sentinel to `None`.
    #[must_use]
    pub fn from_stored(latitude: f64, longitude: f64) -> Option<Self> {
        if latitude == 0.0 && longitude == 0.0 {
            None
        } else {
            Some(Self {
                latitude,
                longitude,
            })
        }
    }
}

/// One raw hit from a radio scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkObservation {
    pub ssid: String,
    pub bssid: String,
    /// dBm; more negative is weaker.
    pub rssi: i32,
    /// MHz.
    pub frequency: u32,
    pub capabilities: String,
    #[serde(default = "now_seconds")]
    pub observed_at: NaiveDateTime,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

impl NetworkObservation {
    /// Observation stamped with the current local wall-clock time.
    #[must_use]
    pub fn now(
        ssid: impl Into<String>,
        bssid: impl Into<String>,
        rssi: i32,
        frequency: u32,
        capabilities: impl Into<String>,
    ) -> Self {
        Self {
            ssid: ssid.into(),
            bssid: bssid.into(),
            rssi,
            frequency,
            capabilities: capabilities.into(),
            observed_at: now_seconds(),
            location: None,
        }
    }

    /// `isBlank` semantics: empty or whitespace-only SSIDs carry no identity.
    #[must_use]
    pub fn has_blank_ssid(&self) -> bool {
        self.ssid.trim().is_empty()
    }

    /// Consume the observation into a labeled record.
    #[must_use]
    pub fn into_record(self, label: RiskLabel) -> NetworkRecord {
        NetworkRecord {
            ssid: self.ssid,
            bssid: self.bssid,
            rssi: self.rssi,
            frequency: self.frequency,
            capabilities: self.capabilities,
            label,
            observed_at: self.observed_at,
            location: self.location,
        }
    }
}

/// Durable, classified unit keyed by `(ssid, bssid)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub ssid: String,
    pub bssid: String,
    pub rssi: i32,
    pub frequency: u32,
    pub capabilities: String,
    pub label: RiskLabel,
    pub observed_at: NaiveDateTime,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

impl NetworkRecord {
    /// Store identity, `"ssid:bssid"`.
    #[must_use]
    pub fn key(&self) -> String {
        record_key(&self.ssid, &self.bssid)
    }

    #[must_use]
    pub fn is_dangerous(&self) -> bool {
        self.label == RiskLabel::Dangerous
    }
}

/// Format the store identity for a `(ssid, bssid)` pair.
#[must_use]
pub fn record_key(ssid: &str, bssid: &str) -> String {
    format!("{ssid}:{bssid}")
}

/// Local wall-clock time truncated to whole seconds (the on-disk precision).
#[must_use]
pub fn now_seconds() -> NaiveDateTime {
    let now = chrono::Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_parses_case_insensitively() {
        assert_eq!("safe".parse::<RiskLabel>().unwrap(), RiskLabel::Safe);
        assert_eq!(" MEDIUM ".parse::<RiskLabel>().unwrap(), RiskLabel::Medium);
        assert_eq!(
            "Dangerous".parse::<RiskLabel>().unwrap(),
            RiskLabel::Dangerous
        );
        let err = "UNKNOWN".parse::<RiskLabel>().unwrap_err();
        assert_eq!(err.code(), "WSN-2201");
    }

    #[test]
    fn label_display_matches_storage_form() {
        for label in RiskLabel::ALL {
            assert_eq!(label.to_string().parse::<RiskLabel>().unwrap(), label);
        }
        assert_eq!(
            serde_json::to_string(&RiskLabel::Dangerous).unwrap(),
            "\"DANGEROUS\""
        );
    }

    #[test]
    fn zero_zero_location_is_unknown() {
        assert!(GeoPoint::from_stored(0.0, 0.0).is_none());
        let p = GeoPoint::from_stored(52.52, 13.40).unwrap();
        assert!((p.latitude - 52.52).abs() < f64::EPSILON);
    }

    #[test]
    fn blank_ssid_detection_uses_whitespace() {
        let mut obs = NetworkObservation::now("  ", "aa:bb", -50, 2412, "[ESS]");
        assert!(obs.has_blank_ssid());
        obs.ssid = "Cafe".to_string();
        assert!(!obs.has_blank_ssid());
    }

    #[test]
    fn record_key_joins_with_colon() {
        let record = NetworkObservation::now("Home", "00:11:22:33:44:55", -40, 5180, "[WPA2]")
            .into_record(RiskLabel::Safe);
        assert_eq!(record.key(), "Home:00:11:22:33:44:55");
        assert!(!record.is_dangerous());
    }

    #[test]
    fn now_seconds_has_no_fraction() {
        assert_eq!(now_seconds().nanosecond(), 0);
    }
}

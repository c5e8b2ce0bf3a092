//! Feature extraction: one observation in, a fixed ten-slot vector out.
//!
//! The slot order is part of the model contract. A model trained against this
//! layout reads `values[i]` as `FEATURE_NAMES[i]`; reordering slots silently
//! breaks every deployed model file.

#![allow(missing_docs)]

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::pipeline::records::NetworkObservation;

/// Number of slots in a [`FeatureVector`].
pub const FEATURE_COUNT: usize = 10;

/// Slot names, in vector order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "is_open",
    "uses_wep",
    "uses_tkip",
    "uses_wpa2_ccmp",
    "uses_wpa3",
    "wps_enabled",
    "rssi_class",
    "is_5ghz",
    "looks_hidden",
    "is_public",
];

/// Substrings that mark a hotspot as a public/venue network.
pub const PUBLIC_SSID_MARKERS: [&str; 4] = ["eduroam", "citywifi", "public", "free"];

/// Signal at or above this is "strong" (class 0).
pub const RSSI_STRONG_DBM: i32 = -60;
/// Signal at or below this is "weak" (class 2).
pub const RSSI_WEAK_DBM: i32 = -80;
/// Frequencies above this are treated as the 5 GHz band.
pub const FIVE_GHZ_THRESHOLD_MHZ: u32 = 4000;

static HIDDEN_SUFFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[0-9A-Fa-f]{4}$").ok());

/// Ordered numeric features for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureVector {
    values: [f32; FEATURE_COUNT],
}

impl FeatureVector {
    #[must_use]
    pub const fn from_values(values: [f32; FEATURE_COUNT]) -> Self {
        Self { values }
    }

    #[must_use]
    pub const fn values(&self) -> &[f32; FEATURE_COUNT] {
        &self.values
    }

    /// Value of a named slot, if the name is part of the layout.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f32> {
        FEATURE_NAMES
            .iter()
            .position(|candidate| *candidate == name)
            .map(|idx| self.values[idx])
    }

    /// `(name, value)` pairs in slot order.
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f32)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }
}

/// Raw inputs of the extractor, borrowed from whatever carries them.
#[derive(Debug, Clone, Copy)]
pub struct FeatureInput<'a> {
    pub capabilities: &'a str,
    pub rssi: i32,
    pub frequency: u32,
    pub ssid: &'a str,
}

impl<'a> From<&'a NetworkObservation> for FeatureInput<'a> {
    fn from(obs: &'a NetworkObservation) -> Self {
        Self {
            capabilities: &obs.capabilities,
            rssi: obs.rssi,
            frequency: obs.frequency,
            ssid: &obs.ssid,
        }
    }
}

/// Build the feature vector. Pure and total.
#[must_use]
pub fn extract(input: FeatureInput<'_>) -> FeatureVector {
    let caps = input.capabilities.to_lowercase();
    let ssid_lower = input.ssid.to_lowercase();

    let is_open = caps.contains("ess") && !caps.contains("wpa") && !caps.contains("rsn");
    let is_public = PUBLIC_SSID_MARKERS
        .iter()
        .any(|marker| ssid_lower.contains(marker));

    FeatureVector {
        values: [
            flag(is_open),
            flag(caps.contains("wep")),
            flag(caps.contains("tkip")),
            flag(caps.contains("wpa2") && caps.contains("ccmp")),
            flag(caps.contains("sae")),
            flag(caps.contains("wps")),
            rssi_class(input.rssi),
            flag(input.frequency > FIVE_GHZ_THRESHOLD_MHZ),
            flag(looks_hidden(input.ssid)),
            flag(is_public),
        ],
    }
}

/// Convenience wrapper over [`extract`] for a whole observation.
#[must_use]
pub fn extract_observation(obs: &NetworkObservation) -> FeatureVector {
    extract(FeatureInput::from(obs))
}

/// 0 = strong, 1 = medium, 2 = weak.
#[must_use]
pub fn rssi_class(rssi: i32) -> f32 {
    if rssi >= RSSI_STRONG_DBM {
        0.0
    } else if rssi <= RSSI_WEAK_DBM {
        2.0
    } else {
        1.0
    }
}

/// Router-default names such as `NETGEAR-3F2A` end in four hex digits.
#[must_use]
pub fn looks_hidden(ssid: &str) -> bool {
    HIDDEN_SUFFIX
        .as_ref()
        .is_some_and(|re| re.is_match(ssid))
}

const fn flag(value: bool) -> f32 {
    if value { 1.0 } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn input<'a>(caps: &'a str, rssi: i32, frequency: u32, ssid: &'a str) -> FeatureInput<'a> {
        FeatureInput {
            capabilities: caps,
            rssi,
            frequency,
            ssid,
        }
    }

    #[test]
    fn ess_without_wpa_or_rsn_is_open() {
        let v = extract(input("[ESS]", -50, 2412, "Cafe"));
        assert_eq!(v.get("is_open"), Some(1.0));
        assert_eq!(v.get("uses_wep"), Some(0.0));
        assert_eq!(v.get("uses_wpa2_ccmp"), Some(0.0));
    }

    #[test]
    fn wpa2_ccmp_network_is_not_open() {
        let v = extract(input("[WPA2-PSK-CCMP][RSN-PSK-CCMP][ESS][WPS]", -70, 5180, "Home"));
        assert_eq!(
            v.values(),
            &[0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn sae_marks_wpa3() {
        let v = extract(input("[RSN-SAE-CCMP][ESS]", -40, 2437, "Office"));
        assert_eq!(v.get("uses_wpa3"), Some(1.0));
        assert_eq!(v.get("is_open"), Some(0.0));
    }

    #[test]
    fn wep_and_tkip_flags() {
        let v = extract(input("[WEP][ESS]", -65, 2412, "Old"));
        assert_eq!(v.get("uses_wep"), Some(1.0));
        let v = extract(input("[WPA-PSK-TKIP][ESS]", -65, 2412, "Old"));
        assert_eq!(v.get("uses_tkip"), Some(1.0));
        assert_eq!(v.get("is_open"), Some(0.0));
    }

    #[test]
    fn rssi_class_boundaries() {
        assert_eq!(rssi_class(-30), 0.0);
        assert_eq!(rssi_class(-60), 0.0);
        assert_eq!(rssi_class(-61), 1.0);
        assert_eq!(rssi_class(-79), 1.0);
        assert_eq!(rssi_class(-80), 2.0);
        assert_eq!(rssi_class(-95), 2.0);
    }

    #[test]
    fn band_threshold_is_exclusive() {
        assert_eq!(extract(input("", -50, 4000, "x")).get("is_5ghz"), Some(0.0));
        assert_eq!(extract(input("", -50, 4001, "x")).get("is_5ghz"), Some(1.0));
    }

    #[test]
    fn hidden_heuristic_wants_four_trailing_hex_digits() {
        assert!(looks_hidden("NETGEAR-3F2A"));
        assert!(looks_hidden("beef"));
        assert!(!looks_hidden("Home"));
        assert!(!looks_hidden("ABC"));
        assert!(!looks_hidden("Router-12G4"));
    }

    #[test]
    fn public_markers_are_case_insensitive() {
        for ssid in ["EDUROAM", "CityWiFi-Center", "Public Library", "FreeWifi"] {
            assert_eq!(
                extract(input("[ESS]", -50, 2412, ssid)).get("is_public"),
                Some(1.0),
                "{ssid} should be public"
            );
        }
        assert_eq!(
            extract(input("[ESS]", -50, 2412, "Private")).get("is_public"),
            Some(0.0)
        );
    }

    #[test]
    fn unrecognized_capabilities_zero_the_capability_flags() {
        let v = extract(input("garbage text", -85, 5500, "Cafe"));
        assert_eq!(&v.values()[..6], &[0.0; 6]);
        assert_eq!(v.get("rssi_class"), Some(2.0));
        assert_eq!(v.get("is_5ghz"), Some(1.0));
    }

    #[test]
    fn named_iterates_in_layout_order() {
        let v = extract(input("[ESS]", -50, 2412, "Cafe"));
        let names: Vec<&str> = v.named().map(|(n, _)| n).collect();
        assert_eq!(names, FEATURE_NAMES);
        assert_eq!(v.get("nonexistent"), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Every slot is 0/1 except rssi_class, which is 0/1/2.
        #[test]
        fn every_slot_is_in_range(
            caps in ".{0,64}",
            ssid in ".{0,32}",
            rssi in -120i32..0,
            frequency in 2000u32..7000,
        ) {
            let v = extract(input(&caps, rssi, frequency, &ssid));
            for (idx, value) in v.values().iter().enumerate() {
                if FEATURE_NAMES[idx] == "rssi_class" {
                    prop_assert!([0.0, 1.0, 2.0].contains(value));
                } else {
                    prop_assert!(*value == 0.0 || *value == 1.0);
                }
            }
        }
    }
}

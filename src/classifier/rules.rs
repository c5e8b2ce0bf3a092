//! Rule-based risk labeling from the raw capability string.

use crate::classifier::{ClassifierInput, RiskClassifier};
use crate::pipeline::records::RiskLabel;

/// Label a capability string by protocol markers alone.
///
/// WPA2/WPA3 wins over everything, WEP without them is MEDIUM, and anything
/// with no WPA marker at all (including the empty string) is DANGEROUS.
#[must_use]
pub fn label_for_capabilities(capabilities: &str) -> RiskLabel {
    if capabilities.contains("WPA3") || capabilities.contains("WPA2") {
        RiskLabel::Safe
    } else if capabilities.contains("WEP") {
        RiskLabel::Medium
    } else if capabilities.trim().is_empty() || !capabilities.contains("WPA") {
        RiskLabel::Dangerous
    } else {
        RiskLabel::Medium
    }
}

/// Classifier that never touches a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleClassifier;

impl RiskClassifier for RuleClassifier {
    fn name(&self) -> &'static str {
        "rules"
    }

    fn classify(&self, input: &ClassifierInput<'_>) -> RiskLabel {
        label_for_capabilities(input.capabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn wpa2_and_wpa3_are_safe() {
        assert_eq!(
            label_for_capabilities("[WPA2-PSK-CCMP][ESS]"),
            RiskLabel::Safe
        );
        assert_eq!(
            label_for_capabilities("[WPA3-SAE-CCMP][ESS]"),
            RiskLabel::Safe
        );
        assert_eq!(
            label_for_capabilities("[WEP][WPA2-PSK-CCMP]"),
            RiskLabel::Safe
        );
    }

    #[test]
    fn wep_without_wpa2_is_medium() {
        assert_eq!(label_for_capabilities("[WEP][ESS]"), RiskLabel::Medium);
    }

    #[test]
    fn blank_and_open_are_dangerous() {
        assert_eq!(label_for_capabilities(""), RiskLabel::Dangerous);
        assert_eq!(label_for_capabilities("   "), RiskLabel::Dangerous);
        assert_eq!(label_for_capabilities("[ESS]"), RiskLabel::Dangerous);
    }

    #[test]
    fn legacy_wpa_is_medium() {
        assert_eq!(
            label_for_capabilities("[WPA-PSK-TKIP][ESS]"),
            RiskLabel::Medium
        );
    }

    #[test]
    fn markers_are_case_sensitive() {
        // Capability text from radios is upper-case; lower-case "wpa2" is not a marker.
        assert_eq!(label_for_capabilities("[wpa2-psk]"), RiskLabel::Dangerous);
    }

    proptest! {
        #[test]
        fn any_string_with_wpa2_or_wpa3_is_safe(
            prefix in ".{0,24}",
            suffix in ".{0,24}",
            marker in prop::sample::select(vec!["WPA2", "WPA3"]),
        ) {
            let caps = format!("{prefix}{marker}{suffix}");
            prop_assert_eq!(label_for_capabilities(&caps), RiskLabel::Safe);
        }

        #[test]
        fn strings_without_wpa_are_never_safe(caps in "[^W]{0,40}") {
            prop_assert_ne!(label_for_capabilities(&caps), RiskLabel::Safe);
        }
    }
}

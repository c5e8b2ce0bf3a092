//! Grouped alerting for dangerous networks.
//!
//! One cycle produces at most one alert, however many networks it found.

#![allow(missing_docs)]

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::config::AlertsConfig;
use crate::core::settings::Settings;
use crate::pipeline::records::NetworkRecord;

pub const DEFAULT_MAX_LINES: usize = 5;
pub const ALERT_SUMMARY: &str = "Insecure WiFi detected";

/// What a notification sink renders: headline, body, expandable lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedAlert {
    pub title: String,
    pub summary: String,
    pub lines: Vec<String>,
    /// Networks covered, including ones folded into the `+N more` line.
    pub count: usize,
    /// Ask the sink for an urgent presentation.
    pub vibrate: bool,
}

/// Receives grouped alerts. Delivery is fire-and-forget.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, alert: &GroupedAlert);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    max_lines: usize,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES)
    }
}

impl AlertPolicy {
    #[must_use]
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
        }
    }

    #[must_use]
    pub fn from_config(config: &AlertsConfig) -> Self {
        Self::new(config.max_lines)
    }

    /// Build the alert for one cycle's dangerous records, if one is due.
    #[must_use]
    pub fn evaluate(&self, dangerous: &[NetworkRecord], settings: &Settings) -> Option<GroupedAlert> {
        if dangerous.is_empty() || !settings.notifications_enabled {
            return None;
        }

        let count = dangerous.len();
        let mut lines: Vec<String> = dangerous
            .iter()
            .take(self.max_lines)
            .map(|record| format!("{} ({})", record.ssid, record.label))
            .collect();
        if count > self.max_lines {
            lines.push(format!("+{} more", count - self.max_lines));
        }

        Some(GroupedAlert {
            title: format!(
                "{count} insecure network{} found",
                if count == 1 { "" } else { "s" }
            ),
            summary: ALERT_SUMMARY.to_string(),
            lines,
            count,
            vibrate: settings.vibration_enabled,
        })
    }
}

/// Keeps every delivered alert in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<GroupedAlert>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn delivered(&self) -> Vec<GroupedAlert> {
        self.delivered.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.delivered.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delivered.lock().is_empty()
    }
}

impl NotificationSink for RecordingSink {
    fn deliver(&self, alert: &GroupedAlert) {
        self.delivered.lock().push(alert.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::records::{NetworkObservation, RiskLabel};

    fn dangerous(n: usize) -> Vec<NetworkRecord> {
        (0..n)
            .map(|i| {
                NetworkObservation::now(format!("Open{i}"), format!("b{i}"), -60, 2412, "[ESS]")
                    .into_record(RiskLabel::Dangerous)
            })
            .collect()
    }

    fn notify_on() -> Settings {
        Settings {
            notifications_enabled: true,
            ..Settings::default()
        }
    }

    #[test]
    fn seven_networks_show_five_lines_plus_overflow() {
        let alert = AlertPolicy::default()
            .evaluate(&dangerous(7), &notify_on())
            .unwrap();
        assert_eq!(alert.count, 7);
        assert_eq!(alert.title, "7 insecure networks found");
        assert_eq!(alert.lines.len(), 6);
        assert_eq!(alert.lines[0], "Open0 (DANGEROUS)");
        assert_eq!(alert.lines[4], "Open4 (DANGEROUS)");
        assert_eq!(alert.lines[5], "+2 more");
    }

    #[test]
    fn exactly_five_has_no_overflow_line() {
        let alert = AlertPolicy::default()
            .evaluate(&dangerous(5), &notify_on())
            .unwrap();
        assert_eq!(alert.lines.len(), 5);
        assert!(alert.lines.iter().all(|l| !l.starts_with('+')));
    }

    #[test]
    fn single_network_title_is_singular() {
        let alert = AlertPolicy::default()
            .evaluate(&dangerous(1), &notify_on())
            .unwrap();
        assert_eq!(alert.title, "1 insecure network found");
        assert_eq!(alert.summary, ALERT_SUMMARY);
    }

    #[test]
    fn no_alert_for_empty_batch() {
        assert!(AlertPolicy::default().evaluate(&[], &notify_on()).is_none());
    }

    #[test]
    fn no_alert_when_notifications_disabled() {
        assert!(
            AlertPolicy::default()
                .evaluate(&dangerous(3), &Settings::default())
                .is_none()
        );
    }

    #[test]
    fn vibration_setting_marks_alert_urgent() {
        let settings = Settings {
            notifications_enabled: true,
            vibration_enabled: true,
            ..Settings::default()
        };
        assert!(
            AlertPolicy::default()
                .evaluate(&dangerous(2), &settings)
                .unwrap()
                .vibrate
        );
    }

    #[test]
    fn configured_line_cap_applies() {
        let alert = AlertPolicy::from_config(&AlertsConfig { max_lines: 2 })
            .evaluate(&dangerous(3), &notify_on())
            .unwrap();
        assert_eq!(alert.lines, vec!["Open0 (DANGEROUS)", "Open1 (DANGEROUS)", "+1 more"]);
    }

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        let policy = AlertPolicy::default();
        sink.deliver(&policy.evaluate(&dangerous(1), &notify_on()).unwrap());
        sink.deliver(&policy.evaluate(&dangerous(2), &notify_on()).unwrap());
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.delivered()[1].count, 2);
    }
}

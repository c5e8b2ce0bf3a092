//! Multi-channel notification system: desktop, file, journal, and webhook channels.
//!
//! Dispatches structured notifications through configured channels with min-level
//! filtering. Channels are fire-and-forget: a failed delivery is dropped and never
//! blocks a scan cycle.

#![allow(missing_docs)]

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::config::home_dir;
use crate::daemon::alerts::{GroupedAlert, NotificationSink};

// ──────────────────── notification level ────────────────────

/// Severity level for notification filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// ──────────────────── notification events ────────────────────

/// A structured notification event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    InsecureNetworks {
        title: String,
        summary: String,
        lines: Vec<String>,
        count: usize,
        vibrate: bool,
    },
    DaemonStarted {
        version: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    Error {
        code: String,
        details: String,
    },
}

impl From<&GroupedAlert> for NotificationEvent {
    fn from(alert: &GroupedAlert) -> Self {
        Self::InsecureNetworks {
            title: alert.title.clone(),
            summary: alert.summary.clone(),
            lines: alert.lines.clone(),
            count: alert.count,
            vibrate: alert.vibrate,
        }
    }
}

impl NotificationEvent {
    /// The severity level of this event (for min-level filtering).
    #[must_use]
    pub const fn level(&self) -> NotificationLevel {
        match self {
            Self::DaemonStarted { .. } | Self::DaemonStopped { .. } => NotificationLevel::Info,
            Self::InsecureNetworks { vibrate: true, .. } | Self::Error { .. } => {
                NotificationLevel::Critical
            }
            Self::InsecureNetworks { .. } => NotificationLevel::Warning,
        }
    }

    /// Headline for channels with a title slot.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::InsecureNetworks { title, .. } => title.clone(),
            Self::DaemonStarted { .. } | Self::DaemonStopped { .. } => "WiFi Sentinel".to_string(),
            Self::Error { .. } => "WiFi Sentinel error".to_string(),
        }
    }

    /// Short human-readable summary line.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::InsecureNetworks { title, summary, .. } => format!("{summary}: {title}"),
            Self::DaemonStarted { version } => format!("wsn v{version} started"),
            Self::DaemonStopped {
                reason,
                uptime_secs,
            } => {
                let hours = uptime_secs / 3600;
                let minutes = (uptime_secs % 3600) / 60;
                format!("wsn stopped ({reason}) after {hours}h {minutes}m")
            }
            Self::Error { code, details } => format!("[{code}] {details}"),
        }
    }

    /// Summary followed by the expandable lines, one per row.
    #[must_use]
    pub fn body(&self) -> String {
        match self {
            Self::InsecureNetworks { summary, lines, .. } => {
                let mut body = summary.clone();
                for line in lines {
                    body.push('\n');
                    body.push_str(line);
                }
                body
            }
            _ => self.summary(),
        }
    }

    #[must_use]
    pub const fn count(&self) -> usize {
        match self {
            Self::InsecureNetworks { count, .. } => *count,
            _ => 0,
        }
    }
}

// ──────────────────── configuration ────────────────────

/// Top-level notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationConfig {
    /// Master switch for all channels. The user's notification setting is
    /// checked separately, before an alert is ever built.
    pub enabled: bool,
    /// Which channel names to activate.
    pub channels: Vec<String>,
    pub desktop: DesktopConfig,
    pub webhook: WebhookConfig,
    pub file: FileConfig,
    pub journal: JournalConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: vec!["journal".to_string(), "file".to_string()],
            desktop: DesktopConfig::default(),
            webhook: WebhookConfig::default(),
            file: FileConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

/// Desktop notification settings (notify-send on Linux, osascript on macOS).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DesktopConfig {
    pub enabled: bool,
    pub min_level: NotificationLevel,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_level: NotificationLevel::Warning,
        }
    }
}

/// Webhook notification settings (HTTP POST via curl).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
    pub min_level: NotificationLevel,
    /// Template string with `${TITLE}`, `${SUMMARY}`, `${COUNT}`, `${LEVEL}` placeholders.
    pub template: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            min_level: NotificationLevel::Warning,
            template: r#"{"text": "wsn: ${TITLE}", "summary": "${SUMMARY}", "count": ${COUNT}}"#
                .to_string(),
        }
    }
}

/// File notification settings (append-only JSONL).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub path: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: home_dir()
                .join(".local")
                .join("share")
                .join("wsn")
                .join("notifications.jsonl"),
        }
    }
}

/// Journal notification settings (systemd journal via stderr).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JournalConfig {
    pub min_level: NotificationLevel,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            min_level: NotificationLevel::Info,
        }
    }
}

// ──────────────────── JSONL record ────────────────────

#[derive(Debug, Serialize)]
struct NotificationRecord {
    ts: String,
    level: NotificationLevel,
    message: String,
    #[serde(flatten)]
    event: NotificationEvent,
}

// ──────────────────── notification channels ────────────────────

trait Channel: Send + Sync {
    fn name(&self) -> &'static str;
    fn send(&self, event: &NotificationEvent);
}

// ──── Desktop (notify-send / osascript) ────

struct DesktopChannel {
    min_level: NotificationLevel,
}

impl DesktopChannel {
    const fn new(config: &DesktopConfig) -> Self {
        Self {
            min_level: config.min_level,
        }
    }
}

impl Channel for DesktopChannel {
    fn name(&self) -> &'static str {
        "desktop"
    }

    fn send(&self, event: &NotificationEvent) {
        if event.level() < self.min_level {
            return;
        }

        let title = event.title();
        let body = event.body();
        let urgency = match event.level() {
            NotificationLevel::Critical => "critical",
            NotificationLevel::Warning => "normal",
            NotificationLevel::Info => "low",
        };

        #[cfg(target_os = "linux")]
        {
            let _ = Command::new("notify-send")
                .arg("--urgency")
                .arg(urgency)
                .arg("--app-name=wsn")
                .arg(&title)
                .arg(&body)
                .spawn();
        }

        #[cfg(target_os = "macos")]
        {
            let script = format!(
                "display notification \"{}\" with title \"wsn\" subtitle \"{}\"",
                body.replace('"', "\\\""),
                title.replace('"', "\\\"")
            );
            let _ = Command::new("osascript").arg("-e").arg(&script).spawn();
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            let _ = (urgency, title, body);
        }
    }
}

// ──── File (append-only JSONL) ────

struct FileChannel {
    path: PathBuf,
}

impl FileChannel {
    fn new(config: &FileConfig) -> Self {
        Self {
            path: config.path.clone(),
        }
    }
}

impl Channel for FileChannel {
    fn name(&self) -> &'static str {
        "file"
    }

    fn send(&self, event: &NotificationEvent) {
        let record = NotificationRecord {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: event.level(),
            message: event.summary(),
            event: event.clone(),
        };

        let Ok(json) = serde_json::to_string(&record) else {
            return;
        };

        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        let file = {
            let mut opts = OpenOptions::new();
            opts.create(true).append(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            opts.open(&self.path)
        };

        match file {
            Ok(mut f) => {
                let _ = writeln!(f, "{json}");
            }
            Err(e) => {
                eprintln!(
                    "[WSN-NOTIFY] cannot append to {}: {e}",
                    self.path.display()
                );
            }
        }
    }
}

// ──── Journal (systemd structured stderr) ────

struct JournalChannel {
    min_level: NotificationLevel,
}

impl JournalChannel {
    const fn new(config: &JournalConfig) -> Self {
        Self {
            min_level: config.min_level,
        }
    }
}

impl Channel for JournalChannel {
    fn name(&self) -> &'static str {
        "journal"
    }

    fn send(&self, event: &NotificationEvent) {
        if event.level() < self.min_level {
            return;
        }

        let priority = match event.level() {
            NotificationLevel::Critical => "CRIT",
            NotificationLevel::Warning => "WARNING",
            NotificationLevel::Info => "INFO",
        };

        eprintln!("[WSN-NOTIFY] [{priority}] {}", event.summary());
        if let NotificationEvent::InsecureNetworks { lines, .. } = event {
            for line in lines {
                eprintln!("[WSN-NOTIFY] [{priority}]   {line}");
            }
        }
    }
}

// ──── Webhook (HTTP POST via curl) ────

struct WebhookChannel {
    url: String,
    min_level: NotificationLevel,
    template: String,
}

impl WebhookChannel {
    fn new(config: &WebhookConfig) -> Self {
        Self {
            url: config.url.clone(),
            min_level: config.min_level,
            template: config.template.clone(),
        }
    }

    fn render_body(&self, event: &NotificationEvent) -> String {
        // JSON-escape values to prevent injection in webhook payloads.
        let esc = |s: &str| {
            s.replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\n', "\\n")
        };

        self.template
            .replace("${TITLE}", &esc(&event.title()))
            .replace("${SUMMARY}", &esc(&event.body()))
            .replace("${COUNT}", &event.count().to_string())
            .replace("${LEVEL}", &event.level().to_string())
    }
}

impl Channel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn send(&self, event: &NotificationEvent) {
        if event.level() < self.min_level || self.url.is_empty() {
            return;
        }

        let body = self.render_body(event);

        let _ = Command::new("curl")
            .arg("--silent")
            .arg("--max-time")
            .arg("5")
            .arg("--header")
            .arg("Content-Type: application/json")
            .arg("--data")
            .arg(&body)
            .arg(&self.url)
            .spawn();
    }
}

// ──────────────────── notification manager ────────────────────

/// Coordinates dispatching notification events to all enabled channels.
///
/// Shared between the scheduled job and the daemon loop, so dispatch takes
/// `&self`; individual channel failures never propagate.
pub struct NotificationManager {
    channels: Vec<Box<dyn Channel>>,
    enabled: bool,
    last_send: Mutex<Option<Instant>>,
}

impl NotificationManager {
    /// Build a manager from configuration.
    #[must_use]
    pub fn from_config(config: &NotificationConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let mut channels: Vec<Box<dyn Channel>> = Vec::new();
        for channel_name in &config.channels {
            match channel_name.as_str() {
                "desktop" if config.desktop.enabled => {
                    channels.push(Box::new(DesktopChannel::new(&config.desktop)));
                }
                "file" => channels.push(Box::new(FileChannel::new(&config.file))),
                "journal" => channels.push(Box::new(JournalChannel::new(&config.journal))),
                "webhook" if config.webhook.enabled => {
                    channels.push(Box::new(WebhookChannel::new(&config.webhook)));
                }
                _ => {}
            }
        }

        Self {
            channels,
            enabled: true,
            last_send: Mutex::new(None),
        }
    }

    /// Create a disabled (no-op) manager.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            channels: Vec::new(),
            enabled: false,
            last_send: Mutex::new(None),
        }
    }

    /// Dispatch a notification event to all enabled channels.
    pub fn notify(&self, event: &NotificationEvent) {
        if !self.enabled {
            return;
        }
        *self.last_send.lock() = Some(Instant::now());
        for channel in &self.channels {
            channel.send(event);
        }
    }

    /// When the last event was dispatched, if ever.
    #[must_use]
    pub fn last_send(&self) -> Option<Instant> {
        *self.last_send.lock()
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }
}

impl NotificationSink for NotificationManager {
    fn deliver(&self, alert: &GroupedAlert) {
        self.notify(&NotificationEvent::from(alert));
    }
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn insecure(count: usize, vibrate: bool) -> NotificationEvent {
        NotificationEvent::InsecureNetworks {
            title: format!("{count} insecure networks found"),
            summary: "Insecure WiFi detected".to_string(),
            lines: vec!["Cafe (DANGEROUS)".to_string(), "Lobby \"2\" (DANGEROUS)".to_string()],
            count,
            vibrate,
        }
    }

    #[test]
    fn notification_level_ordering() {
        assert!(NotificationLevel::Info < NotificationLevel::Warning);
        assert!(NotificationLevel::Warning < NotificationLevel::Critical);
    }

    #[test]
    fn vibration_raises_insecure_alert_to_critical() {
        assert_eq!(insecure(2, false).level(), NotificationLevel::Warning);
        assert_eq!(insecure(2, true).level(), NotificationLevel::Critical);
    }

    #[test]
    fn lifecycle_events_are_info() {
        let started = NotificationEvent::DaemonStarted {
            version: "0.1.0".to_string(),
        };
        assert_eq!(started.level(), NotificationLevel::Info);
        assert!(started.summary().contains("0.1.0"));
    }

    #[test]
    fn daemon_stopped_summary_formats_uptime() {
        let event = NotificationEvent::DaemonStopped {
            reason: "signal".to_string(),
            uptime_secs: 3 * 3600 + 25 * 60,
        };
        assert_eq!(event.summary(), "wsn stopped (signal) after 3h 25m");
    }

    #[test]
    fn body_lists_every_line_under_summary() {
        let body = insecure(2, false).body();
        let rows: Vec<&str> = body.lines().collect();
        assert_eq!(rows[0], "Insecure WiFi detected");
        assert_eq!(rows[1], "Cafe (DANGEROUS)");
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn default_config_has_journal_and_file() {
        let config = NotificationConfig::default();
        assert!(config.enabled);
        assert!(config.channels.contains(&"journal".to_string()));
        assert!(config.channels.contains(&"file".to_string()));
        assert!(!config.desktop.enabled);
        assert!(!config.webhook.enabled);
        assert!(config.file.path.ends_with("wsn/notifications.jsonl"));
    }

    #[test]
    fn disabled_manager_has_no_channels() {
        let manager = NotificationManager::disabled();
        assert!(!manager.is_enabled());
        assert_eq!(manager.channel_count(), 0);
    }

    #[test]
    fn manager_from_default_config() {
        let manager = NotificationManager::from_config(&NotificationConfig::default());
        assert!(manager.is_enabled());
        assert_eq!(manager.channel_count(), 2);
        let names = manager.channel_names();
        assert!(names.contains(&"journal"));
        assert!(names.contains(&"file"));
    }

    #[test]
    fn manager_skips_disabled_desktop_and_webhook() {
        let config = NotificationConfig {
            channels: vec![
                "desktop".to_string(),
                "webhook".to_string(),
                "journal".to_string(),
                "pager".to_string(),
            ],
            ..Default::default()
        };
        let manager = NotificationManager::from_config(&config);
        assert_eq!(manager.channel_names(), vec!["journal"]);
    }

    #[test]
    fn file_channel_writes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("notifications.jsonl");
        let channel = FileChannel { path: path.clone() };

        channel.send(&insecure(7, false));
        channel.send(&NotificationEvent::DaemonStarted {
            version: "0.1.0".to_string(),
        });

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "insecure_networks");
        assert_eq!(first["level"], "warning");
        assert_eq!(first["count"], 7);
        assert_eq!(first["lines"][0], "Cafe (DANGEROUS)");
        assert_eq!(first["summary"], "Insecure WiFi detected");
        assert_eq!(first["message"], "Insecure WiFi detected: 7 insecure networks found");
    }

    #[cfg(unix)]
    #[test]
    fn file_channel_is_owner_only() {
        use std::os::unix::fs::PermissionsExt as _;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifications.jsonl");
        FileChannel { path: path.clone() }.send(&insecure(1, false));
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn webhook_channel_renders_and_escapes_template() {
        let channel = WebhookChannel {
            url: "https://hooks.example.com/test".to_string(),
            min_level: NotificationLevel::Warning,
            template: r#"{"t": "${TITLE}", "s": "${SUMMARY}", "n": ${COUNT}, "l": "${LEVEL}"}"#
                .to_string(),
        };
        let body = channel.render_body(&insecure(7, true));
        assert!(body.contains(r#""t": "7 insecure networks found""#));
        assert!(body.contains(r#""n": 7"#));
        assert!(body.contains(r#""l": "critical""#));
        assert!(body.contains(r#"Lobby \"2\""#));
        assert!(body.contains("\\n"));
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["n"], 7);
    }

    #[test]
    fn webhook_channel_skips_empty_url() {
        let channel = WebhookChannel {
            url: String::new(),
            min_level: NotificationLevel::Info,
            template: r#"{"text": "${SUMMARY}"}"#.to_string(),
        };
        channel.send(&insecure(1, false));
    }

    #[test]
    fn sink_delivery_reaches_file_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifications.jsonl");
        let config = NotificationConfig {
            channels: vec!["file".to_string()],
            file: FileConfig { path: path.clone() },
            ..Default::default()
        };
        let manager = NotificationManager::from_config(&config);
        assert!(manager.last_send().is_none());

        let alert = GroupedAlert {
            title: "3 insecure networks found".to_string(),
            summary: "Insecure WiFi detected".to_string(),
            lines: vec!["A (DANGEROUS)".to_string()],
            count: 3,
            vibrate: false,
        };
        manager.deliver(&alert);

        assert!(manager.last_send().is_some());
        let content = fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["title"], "3 insecure networks found");
    }

    #[test]
    fn disabled_manager_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifications.jsonl");
        let config = NotificationConfig {
            enabled: false,
            channels: vec!["file".to_string()],
            file: FileConfig { path: path.clone() },
            ..Default::default()
        };
        NotificationManager::from_config(&config).notify(&insecure(1, false));
        assert!(!path.exists());
    }

    #[test]
    fn notification_config_roundtrip_toml() {
        let config = NotificationConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: NotificationConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }
}

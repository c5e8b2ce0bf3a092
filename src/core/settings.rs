//! User-facing preference switches, re-read at the start of every job run.
//!
//! Stored as a small TOML document separate from the config file so the
//! `settings set` command can rewrite it without touching operator config.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WsnError};
use crate::core::fsio::write_atomic;

const SETTINGS_MODE: u32 = 0o644;

/// Four boolean preferences. Every switch defaults to off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Run the background scan job at all.
    pub auto_scan_enabled: bool,
    /// Persist what the background job finds.
    pub auto_save_enabled: bool,
    /// Raise a grouped alert for dangerous networks.
    pub notifications_enabled: bool,
    /// Mark alerts as urgent.
    pub vibration_enabled: bool,
}

/// Name accepted by `wsn settings set <NAME> <on|off>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    AutoScan,
    AutoSave,
    Notifications,
    Vibration,
}

impl SettingKey {
    pub const ALL: [Self; 4] = [
        Self::AutoScan,
        Self::AutoSave,
        Self::Notifications,
        Self::Vibration,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AutoScan => "auto_scan",
            Self::AutoSave => "auto_save",
            Self::Notifications => "notifications",
            Self::Vibration => "vibration",
        }
    }
}

impl std::str::FromStr for SettingKey {
    type Err = WsnError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let normalized = normalized.trim_end_matches("_enabled");
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == normalized)
            .ok_or_else(|| WsnError::InvalidConfig {
                details: format!(
                    "unknown setting {s:?}; expected one of auto_scan, auto_save, notifications, vibration"
                ),
            })
    }
}

impl Settings {
    #[must_use]
    pub const fn get(&self, key: SettingKey) -> bool {
        match key {
            SettingKey::AutoScan => self.auto_scan_enabled,
            SettingKey::AutoSave => self.auto_save_enabled,
            SettingKey::Notifications => self.notifications_enabled,
            SettingKey::Vibration => self.vibration_enabled,
        }
    }

    pub const fn set(&mut self, key: SettingKey, value: bool) {
        match key {
            SettingKey::AutoScan => self.auto_scan_enabled = value,
            SettingKey::AutoSave => self.auto_save_enabled = value,
            SettingKey::Notifications => self.notifications_enabled = value,
            SettingKey::Vibration => self.vibration_enabled = value,
        }
    }
}

/// Parse `on`/`off` style switch values.
pub fn parse_switch(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" | "enable" | "enabled" => Ok(true),
        "off" | "false" | "no" | "0" | "disable" | "disabled" => Ok(false),
        other => Err(WsnError::InvalidConfig {
            details: format!("expected on or off, got {other:?}"),
        }),
    }
}

/// Where the job reads preferences from.
pub trait SettingsSource: Send + Sync {
    fn fetch(&self) -> Result<Settings>;
}

/// `settings.toml` on disk. A missing file means all defaults.
#[derive(Debug, Clone)]
pub struct FileSettingsSource {
    path: PathBuf,
}

impl FileSettingsSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self, settings: &Settings) -> Result<()> {
        let body = toml::to_string_pretty(settings)?;
        write_atomic(&self.path, body.as_bytes(), SETTINGS_MODE)
    }

    /// Read, flip one switch, write back.
    pub fn update(&self, key: SettingKey, value: bool) -> Result<Settings> {
        let mut settings = self.fetch()?;
        settings.set(key, value);
        self.store(&settings)?;
        Ok(settings)
    }
}

impl SettingsSource for FileSettingsSource {
    fn fetch(&self) -> Result<Settings> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(source) => Err(WsnError::io(&self.path, source)),
        }
    }
}

/// In-memory settings, swappable at runtime.
#[derive(Debug, Default)]
pub struct StaticSettings {
    current: Mutex<Settings>,
}

impl StaticSettings {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            current: Mutex::new(settings),
        }
    }

    pub fn replace(&self, settings: Settings) {
        *self.current.lock() = settings;
    }
}

impl SettingsSource for StaticSettings {
    fn fetch(&self) -> Result<Settings> {
        Ok(*self.current.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everything_defaults_off() {
        let s = Settings::default();
        for key in SettingKey::ALL {
            assert!(!s.get(key), "{} should default off", key.as_str());
        }
    }

    #[test]
    fn missing_file_reads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSettingsSource::new(dir.path().join("settings.toml"));
        assert_eq!(source.fetch().unwrap(), Settings::default());
    }

    #[test]
    fn update_persists_one_switch() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSettingsSource::new(dir.path().join("settings.toml"));
        source.update(SettingKey::AutoScan, true).unwrap();
        source.update(SettingKey::Notifications, true).unwrap();

        let reread = FileSettingsSource::new(source.path()).fetch().unwrap();
        assert!(reread.auto_scan_enabled);
        assert!(reread.notifications_enabled);
        assert!(!reread.auto_save_enabled);
        assert!(!reread.vibration_enabled);
    }

    #[test]
    fn partial_file_fills_missing_switches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "auto_save_enabled = true\n").unwrap();
        let s = FileSettingsSource::new(&path).fetch().unwrap();
        assert!(s.auto_save_enabled);
        assert!(!s.auto_scan_enabled);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "auto_scan_enabled = maybe\n").unwrap();
        let err = FileSettingsSource::new(&path).fetch().unwrap_err();
        assert_eq!(err.code(), "WSN-1003");
    }

    #[test]
    fn setting_keys_accept_common_spellings() {
        assert_eq!("auto-scan".parse::<SettingKey>().unwrap(), SettingKey::AutoScan);
        assert_eq!(
            "notifications_enabled".parse::<SettingKey>().unwrap(),
            SettingKey::Notifications
        );
        assert!("volume".parse::<SettingKey>().is_err());
    }

    #[test]
    fn switch_values() {
        assert!(parse_switch("ON").unwrap());
        assert!(!parse_switch("off").unwrap());
        assert!(parse_switch("sometimes").is_err());
    }

    #[test]
    fn static_settings_can_be_swapped() {
        let source = StaticSettings::new(Settings::default());
        source.replace(Settings {
            auto_scan_enabled: true,
            ..Settings::default()
        });
        assert!(source.fetch().unwrap().auto_scan_enabled);
    }
}

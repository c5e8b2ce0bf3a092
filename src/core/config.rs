//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WsnError};
use crate::daemon::notifications::NotificationConfig;
use crate::platform::pal::SourceSpec;

/// Full WSN configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub session: SessionConfig,
    pub job: JobConfig,
    pub scheduler: SchedulerConfig,
    pub classifier: ClassifierConfig,
    pub alerts: AlertsConfig,
    pub location: LocationConfig,
    pub paths: PathsConfig,
    pub notifications: NotificationConfig,
}

/// Which radio backend to drive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    /// `nmcli` or `replay:<path-to-json>`.
    pub source: String,
    /// Restrict nmcli to one interface (e.g. `wlan0`).
    pub interface: Option<String>,
}

/// Live scan session cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Wait between triggering a scan and reading its results.
    pub settle_ms: u64,
    /// Wait between the end of one cycle and the next trigger.
    pub interval_ms: u64,
}

/// One-shot background job knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JobConfig {
    /// Pause after asking the host to switch the radio on.
    pub radio_enable_wait_ms: u64,
    /// Consecutive retries before a cycle is abandoned as a success. 0 = unbounded.
    pub max_consecutive_retries: u32,
    /// Hard deadline for one job run.
    pub timeout_secs: u64,
}

/// Periodic scheduling and retry backoff for the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub initial_delay_secs: u64,
    pub interval_secs: u64,
    pub backoff_initial_secs: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_secs: u64,
    /// Fractional jitter applied to each backoff delay, in `[0, 1)`.
    pub jitter: f64,
}

/// How networks are labeled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierMode {
    /// Model when a model file exists, rules otherwise.
    #[default]
    Auto,
    Rules,
    Model,
}

impl std::str::FromStr for ClassifierMode {
    type Err = WsnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "rules" => Ok(Self::Rules),
            "model" => Ok(Self::Model),
            other => Err(WsnError::InvalidConfig {
                details: format!("classifier.mode must be auto, rules or model, got {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ClassifierConfig {
    pub mode: ClassifierMode,
    pub model_path: Option<PathBuf>,
    /// Expected lowercase hex SHA-256 of the model file.
    pub model_sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AlertsConfig {
    /// Network lines shown in a grouped alert before the `+N more` line.
    pub max_lines: usize,
}

/// Fixed sensor position; both coordinates or neither.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Filesystem paths used by wsn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub dataset: PathBuf,
    pub settings_file: PathBuf,
    pub state_file: PathBuf,
    pub sqlite_db: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            source: "nmcli".to_string(),
            interface: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_ms: 1_000,
            interval_ms: 2_000,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            radio_enable_wait_ms: 2_000,
            max_consecutive_retries: 0,
            timeout_secs: 120,
        }
    }
}

impl JobConfig {
    #[must_use]
    pub const fn radio_enable_wait(&self) -> Duration {
        Duration::from_millis(self.radio_enable_wait_ms)
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 5 * 60,
            interval_secs: 15 * 60,
            backoff_initial_secs: 30,
            backoff_multiplier: 2.0,
            backoff_max_secs: 5 * 60 * 60,
            jitter: 0.1,
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self { max_lines: 5 }
    }
}

impl PathsConfig {
    /// Data files rooted at `data_dir`, config file left as given.
    #[must_use]
    pub fn under(data_dir: &Path, config_file: PathBuf) -> Self {
        Self {
            config_file,
            dataset: data_dir.join("wifis_dataset.csv"),
            settings_file: data_dir.join("settings.toml"),
            state_file: data_dir.join("state.json"),
            sqlite_db: data_dir.join("activity.sqlite3"),
            jsonl_log: data_dir.join("activity.jsonl"),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = home_dir();
        let cfg = home_dir.join(".config").join("wsn").join("config.toml");
        Self::under(&default_data_dir_in(&home_dir), cfg)
    }
}

/// `$HOME`, or `/tmp` with a warning when unset.
#[must_use]
pub fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[WSN-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

fn default_data_dir_in(home: &Path) -> PathBuf {
    home.join(".local").join("share").join("wsn")
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw =
                fs::read_to_string(&path_buf).map_err(|source| WsnError::io(&path_buf, source))?;
            Self::from_toml(&raw)?
        } else if is_explicit_path {
            return Err(WsnError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Render as TOML (for `wsn config show`).
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON; `DefaultHasher` seeds may change
    /// between Rust releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Apply `WSN_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut get = |name: &str| lookup(name).filter(|raw| !raw.trim().is_empty());

        if let Some(raw) = get("WSN_DATA_DIR") {
            let notifications_file = PathBuf::from(&raw).join("notifications.jsonl");
            self.paths = PathsConfig::under(Path::new(&raw), self.paths.config_file.clone());
            self.notifications.file.path = notifications_file;
        }
        if let Some(raw) = get("WSN_SCANNER_SOURCE") {
            self.scanner.source = raw;
        }
        if let Some(raw) = get("WSN_SCANNER_INTERFACE") {
            self.scanner.interface = Some(raw);
        }
        if let Some(raw) = get("WSN_SESSION_SETTLE_MS") {
            self.session.settle_ms = parse_env("WSN_SESSION_SETTLE_MS", &raw)?;
        }
        if let Some(raw) = get("WSN_SESSION_INTERVAL_MS") {
            self.session.interval_ms = parse_env("WSN_SESSION_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = get("WSN_JOB_RADIO_ENABLE_WAIT_MS") {
            self.job.radio_enable_wait_ms = parse_env("WSN_JOB_RADIO_ENABLE_WAIT_MS", &raw)?;
        }
        if let Some(raw) = get("WSN_JOB_MAX_CONSECUTIVE_RETRIES") {
            self.job.max_consecutive_retries = parse_env("WSN_JOB_MAX_CONSECUTIVE_RETRIES", &raw)?;
        }
        if let Some(raw) = get("WSN_JOB_TIMEOUT_SECS") {
            self.job.timeout_secs = parse_env("WSN_JOB_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = get("WSN_SCHEDULER_INITIAL_DELAY_SECS") {
            self.scheduler.initial_delay_secs = parse_env("WSN_SCHEDULER_INITIAL_DELAY_SECS", &raw)?;
        }
        if let Some(raw) = get("WSN_SCHEDULER_INTERVAL_SECS") {
            self.scheduler.interval_secs = parse_env("WSN_SCHEDULER_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = get("WSN_CLASSIFIER_MODE") {
            self.classifier.mode = raw.parse()?;
        }
        if let Some(raw) = get("WSN_CLASSIFIER_MODEL_PATH") {
            self.classifier.model_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = get("WSN_ALERTS_MAX_LINES") {
            self.alerts.max_lines = parse_env("WSN_ALERTS_MAX_LINES", &raw)?;
        }
        if let Some(raw) = get("WSN_LOCATION_LATITUDE") {
            self.location.latitude = Some(parse_env("WSN_LOCATION_LATITUDE", &raw)?);
        }
        if let Some(raw) = get("WSN_LOCATION_LONGITUDE") {
            self.location.longitude = Some(parse_env("WSN_LOCATION_LONGITUDE", &raw)?);
        }
        if let Some(raw) = get("WSN_DATASET") {
            self.paths.dataset = PathBuf::from(raw);
        }
        if let Some(raw) = get("WSN_NOTIFICATIONS_ENABLED") {
            self.notifications.enabled = parse_env("WSN_NOTIFICATIONS_ENABLED", &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        SourceSpec::parse(&self.scanner.source)?;

        if self.session.interval_ms == 0 {
            return Err(invalid("session.interval_ms must be > 0"));
        }
        if self.job.timeout_secs == 0 {
            return Err(invalid("job.timeout_secs must be > 0"));
        }

        let sched = &self.scheduler;
        if sched.interval_secs == 0 {
            return Err(invalid("scheduler.interval_secs must be > 0"));
        }
        if sched.backoff_initial_secs == 0 {
            return Err(invalid("scheduler.backoff_initial_secs must be > 0"));
        }
        if sched.backoff_max_secs < sched.backoff_initial_secs {
            return Err(invalid(
                "scheduler.backoff_max_secs must be >= scheduler.backoff_initial_secs",
            ));
        }
        if !sched.backoff_multiplier.is_finite() || sched.backoff_multiplier < 1.0 {
            return Err(WsnError::InvalidConfig {
                details: format!(
                    "scheduler.backoff_multiplier must be >= 1.0, got {}",
                    sched.backoff_multiplier
                ),
            });
        }
        if !(0.0..1.0).contains(&sched.jitter) {
            return Err(WsnError::InvalidConfig {
                details: format!("scheduler.jitter must be in [0, 1), got {}", sched.jitter),
            });
        }

        if self.alerts.max_lines == 0 {
            return Err(invalid("alerts.max_lines must be >= 1"));
        }

        if let Some(digest) = &self.classifier.model_sha256
            && (digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()))
        {
            return Err(invalid("classifier.model_sha256 must be 64 hex characters"));
        }

        match (self.location.latitude, self.location.longitude) {
            (None, None) => {}
            (Some(lat), Some(lon)) => {
                if !(-90.0..=90.0).contains(&lat) {
                    return Err(WsnError::InvalidConfig {
                        details: format!("location.latitude must be in [-90, 90], got {lat}"),
                    });
                }
                if !(-180.0..=180.0).contains(&lon) {
                    return Err(WsnError::InvalidConfig {
                        details: format!("location.longitude must be in [-180, 180], got {lon}"),
                    });
                }
            }
            _ => {
                return Err(invalid(
                    "location.latitude and location.longitude must be set together",
                ));
            }
        }

        Ok(())
    }
}

fn invalid(details: &str) -> WsnError {
    WsnError::InvalidConfig {
        details: details.to_string(),
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| WsnError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

//! JSONL activity log: one self-contained JSON object per line.
//!
//! Lines are built in memory and handed to `write_all` whole so a `tail -f`
//! never sees half an entry. When the primary file cannot be written the
//! writer falls back to a secondary path, then to stderr (`[WSN-JSONL]`), then
//! drops entries. Logging never fails the caller.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WsnError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DaemonStart,
    DaemonStop,
    ScanCycle,
    AlertRaised,
    StoreRewrite,
    JobOutcome,
    ClassifierFailure,
    ConfigReload,
    Error,
}

impl EventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DaemonStart => "daemon_start",
            Self::DaemonStop => "daemon_stop",
            Self::ScanCycle => "scan_cycle",
            Self::AlertRaised => "alert_raised",
            Self::StoreRewrite => "store_rewrite",
            Self::JobOutcome => "job_outcome",
            Self::ClassifierFailure => "classifier_failure",
            Self::ConfigReload => "config_reload",
            Self::Error => "error",
        }
    }
}

/// One log line. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC with milliseconds.
    pub ts: String,
    pub event: Option<EventType>,
    pub severity: Option<Severity>,
    /// `session`, `job` or `cli`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dangerous: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Entry stamped with the current UTC time.
    #[must_use]
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event: Some(event),
            severity: Some(severity),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Secondary file used when `path` cannot be opened or written.
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the active file would exceed this size.
    pub max_size_bytes: u64,
    /// Rotated generations kept as `<path>.1` .. `<path>.N`.
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl JsonlConfig {
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: crate::core::config::PathsConfig::default().jsonl_log,
            fallback_path: Some(std::env::temp_dir().join("wsn-activity.jsonl")),
            max_size_bytes: 20 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 10,
        }
    }
}

enum Sink {
    File {
        writer: BufWriter<File>,
        path: PathBuf,
        size: u64,
        primary: bool,
    },
    Stderr,
    Discard,
}

/// Appending JSONL writer with size rotation and the fallback chain.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
    last_fsync: Instant,
}

impl JsonlWriter {
    #[must_use]
    pub fn open(config: JsonlConfig) -> Self {
        let sink = open_chain(&config);
        Self {
            config,
            sink,
            last_fsync: Instant::now(),
        }
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.write_line(&format!("{json}\n")),
            Err(e) => eprintln!("[WSN-JSONL] serialize error: {e}"),
        }
    }

    pub fn flush(&mut self) {
        if let Sink::File { writer, .. } = &mut self.sink {
            let _ = writer.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Sink::File { writer, .. } = &mut self.sink {
            let _ = writer.flush();
            let _ = writer.get_ref().sync_data();
        }
        self.last_fsync = Instant::now();
    }

    /// `normal`, `fallback`, `stderr` or `discard`.
    #[must_use]
    pub const fn state(&self) -> &'static str {
        match &self.sink {
            Sink::File { primary: true, .. } => "normal",
            Sink::File { primary: false, .. } => "fallback",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    /// Reopen the primary file after a degradation.
    pub fn try_recover(&mut self) {
        if matches!(self.sink, Sink::File { primary: true, .. }) {
            return;
        }
        if let Ok((file, size)) = open_append(&self.config.path) {
            self.sink = Sink::File {
                writer: BufWriter::new(file),
                path: self.config.path.clone(),
                size,
                primary: true,
            };
            eprintln!(
                "[WSN-JSONL] recovered to primary path: {}",
                self.config.path.display()
            );
        }
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if let Sink::File { size, .. } = &self.sink
            && *size + len > self.config.max_size_bytes
        {
            self.rotate();
        }

        match &mut self.sink {
            Sink::File { writer, size, .. } => {
                if writer.write_all(line.as_bytes()).is_ok() {
                    *size += len;
                    if self.last_fsync.elapsed().as_secs() >= self.config.fsync_interval_secs {
                        self.fsync();
                    }
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            Sink::Stderr => {
                let _ = write!(io::stderr(), "[WSN-JSONL] {line}");
            }
            Sink::Discard => {}
        }
    }

    fn degrade(&mut self) {
        self.sink = match std::mem::replace(&mut self.sink, Sink::Discard) {
            Sink::File { primary: true, .. } => match &self.config.fallback_path {
                Some(fallback) => open_file_sink(fallback, false).unwrap_or(Sink::Stderr),
                None => Sink::Stderr,
            },
            Sink::File { primary: false, .. } => {
                eprintln!("[WSN-JSONL] fallback write failed, using stderr");
                Sink::Stderr
            }
            Sink::Stderr | Sink::Discard => Sink::Discard,
        };
    }

    fn rotate(&mut self) {
        let Sink::File {
            writer,
            path,
            primary,
            ..
        } = std::mem::replace(&mut self.sink, Sink::Discard)
        else {
            return;
        };
        drop(writer);

        let keep = self.config.max_rotated_files;
        if keep == 0 {
            let _ = fs::remove_file(&path);
        } else {
            let _ = fs::remove_file(rotated_name(&path, keep));
            for generation in (1..keep).rev() {
                let _ = fs::rename(
                    rotated_name(&path, generation),
                    rotated_name(&path, generation + 1),
                );
            }
            let _ = fs::rename(&path, rotated_name(&path, 1));
        }

        self.sink = open_file_sink(&path, primary).unwrap_or_else(|| {
            eprintln!("[WSN-JSONL] reopen after rotation failed, using stderr");
            Sink::Stderr
        });
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

fn open_chain(config: &JsonlConfig) -> Sink {
    if let Some(sink) = open_file_sink(&config.path, true) {
        return sink;
    }
    if let Some(fallback) = &config.fallback_path
        && let Some(sink) = open_file_sink(fallback, false)
    {
        eprintln!(
            "[WSN-JSONL] primary path failed, using fallback: {}",
            fallback.display()
        );
        return sink;
    }
    eprintln!("[WSN-JSONL] no writable log path, using stderr");
    Sink::Stderr
}

fn open_file_sink(path: &Path, primary: bool) -> Option<Sink> {
    open_append(path).ok().map(|(file, size)| Sink::File {
        writer: BufWriter::with_capacity(64 * 1024, file),
        path: path.to_path_buf(),
        size,
        primary,
    })
}

/// Open or create for appending. Returns the file and its current size.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| WsnError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| WsnError::io(path, source))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok((file, size))
}

/// `activity.jsonl` -> `activity.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

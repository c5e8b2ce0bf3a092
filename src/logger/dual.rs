//! Dual-write activity logger: SQLite + JSONL on a dedicated thread.
//!
//! Producers hold a cloneable [`ActivityLoggerHandle`] and never block: events
//! go through a bounded crossbeam channel with `try_send`, and overflow only
//! bumps a counter that the logger thread reports on its next write.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{Result, WsnError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
#[cfg(feature = "sqlite")]
use crate::logger::sqlite::{ActivityRow, CycleRow, SqliteLogger};

const CHANNEL_CAPACITY: usize = 1024;
#[cfg(feature = "sqlite")]
const SQLITE_RETENTION_DAYS: u32 = 90;
#[cfg(feature = "sqlite")]
const SQLITE_MAX_FAILURES: u32 = 3;

/// Everything worth remembering about a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    ScanCycleCompleted {
        origin: &'static str,
        observed: usize,
        unique: usize,
        persisted: usize,
        dangerous: usize,
        duration_ms: u64,
    },
    AlertRaised {
        count: usize,
        shown: usize,
    },
    StoreRewritten {
        operation: &'static str,
        records: usize,
    },
    JobOutcome {
        outcome: String,
        reason: Option<String>,
        consecutive_retries: u32,
    },
    ClassifierFailure {
        classifier: &'static str,
        failures: u64,
    },
    ConfigReloaded {
        details: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Flush and stop the logger thread.
    Shutdown,
}

/// Cloneable, non-blocking sender side of the logger.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Handle whose events go nowhere (tests, `--no-log` style callers).
    #[must_use]
    pub fn detached() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue an event. Drops it (and counts the drop) when the channel is full.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only until queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

pub struct DualLoggerConfig {
    /// `None` disables the SQLite side.
    pub sqlite_path: Option<PathBuf>,
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl DualLoggerConfig {
    #[must_use]
    pub fn from_paths(paths: &crate::core::config::PathsConfig) -> Self {
        Self {
            sqlite_path: Some(paths.sqlite_db.clone()),
            jsonl_config: JsonlConfig::at(paths.jsonl_log.clone()),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Start the logger thread.
pub fn spawn_logger(
    config: DualLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("wsn-logger".to_string())
        .spawn(move || {
            logger_thread_main(&rx, config.sqlite_path, config.jsonl_config, &dropped);
        })
        .map_err(|e| WsnError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(
    rx: &Receiver<ActivityEvent>,
    sqlite_path: Option<PathBuf>,
    jsonl_config: JsonlConfig,
    dropped: &AtomicU64,
) {
    #[cfg(feature = "sqlite")]
    let mut sqlite = sqlite_path.and_then(|p| match SqliteLogger::open(&p) {
        Ok(db) => {
            if let Err(e) = db
                .prune_activity_log(SQLITE_RETENTION_DAYS)
                .and_then(|_| db.prune_scan_cycles(SQLITE_RETENTION_DAYS))
            {
                eprintln!("[WSN-DUAL] SQLite retention prune failed: {e}");
            }
            Some(db)
        }
        Err(e) => {
            eprintln!("[WSN-DUAL] failed to open SQLite at {}: {e}", p.display());
            None
        }
    });
    #[cfg(not(feature = "sqlite"))]
    let _ = sqlite_path;
    #[cfg(feature = "sqlite")]
    let mut sqlite_failures: u32 = 0;

    let mut jsonl = JsonlWriter::open(jsonl_config);

    while let Ok(event) = rx.recv() {
        let missed = dropped.swap(0, Ordering::Relaxed);
        if missed > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{missed} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if event == ActivityEvent::Shutdown {
            break;
        }

        jsonl.write_entry(&to_log_entry(&event));

        #[cfg(feature = "sqlite")]
        if let Some(db) = &sqlite {
            if write_sqlite(db, &event).is_ok() {
                sqlite_failures = 0;
            } else {
                sqlite_failures += 1;
                if sqlite_failures >= SQLITE_MAX_FAILURES {
                    eprintln!("[WSN-DUAL] SQLite write failed {sqlite_failures} times, disabling");
                    sqlite = None;
                }
            }
        }
    }

    jsonl.fsync();
}

// ──────────────────── event conversion ────────────────────

fn to_log_entry(event: &ActivityEvent) -> LogEntry {
    let (kind, severity) = classify_event(event);
    let mut e = LogEntry::new(kind, severity);
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
        } => {
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
        }
        ActivityEvent::ScanCycleCompleted {
            origin,
            observed,
            unique,
            persisted,
            dangerous,
            duration_ms,
        } => {
            e.origin = Some((*origin).to_string());
            e.observed = Some(*observed);
            e.unique = Some(*unique);
            e.persisted = Some(*persisted);
            e.dangerous = Some(*dangerous);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
        }
        ActivityEvent::AlertRaised { count, shown } => {
            e.dangerous = Some(*count);
            e.details = Some(format!("shown={shown}"));
        }
        ActivityEvent::StoreRewritten { operation, records } => {
            e.details = Some(format!("operation={operation} records={records}"));
            e.ok = Some(true);
        }
        ActivityEvent::JobOutcome {
            outcome,
            reason,
            consecutive_retries,
        } => {
            e.origin = Some("job".to_string());
            e.ok = Some(outcome != "retry");
            e.details = Some(match reason {
                Some(reason) => format!(
                    "outcome={outcome} reason={reason} consecutive_retries={consecutive_retries}"
                ),
                None => format!("outcome={outcome} consecutive_retries={consecutive_retries}"),
            });
        }
        ActivityEvent::ClassifierFailure {
            classifier,
            failures,
        } => {
            e.details = Some(format!("classifier={classifier} failures={failures}"));
            e.ok = Some(false);
        }
        ActivityEvent::ConfigReloaded { details } => {
            e.details = Some(details.clone());
            e.ok = Some(true);
        }
        ActivityEvent::Error { code, message } => {
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
        }
        ActivityEvent::Shutdown => {}
    }
    e
}

const fn classify_event(event: &ActivityEvent) -> (EventType, Severity) {
    match event {
        ActivityEvent::DaemonStarted { .. } => (EventType::DaemonStart, Severity::Info),
        ActivityEvent::DaemonStopped { .. } | ActivityEvent::Shutdown => {
            (EventType::DaemonStop, Severity::Info)
        }
        ActivityEvent::ScanCycleCompleted { .. } => (EventType::ScanCycle, Severity::Info),
        ActivityEvent::AlertRaised { .. } => (EventType::AlertRaised, Severity::Warning),
        ActivityEvent::StoreRewritten { .. } => (EventType::StoreRewrite, Severity::Info),
        ActivityEvent::JobOutcome { .. } => (EventType::JobOutcome, Severity::Info),
        ActivityEvent::ClassifierFailure { .. } => {
            (EventType::ClassifierFailure, Severity::Warning)
        }
        ActivityEvent::ConfigReloaded { .. } => (EventType::ConfigReload, Severity::Info),
        ActivityEvent::Error { .. } => (EventType::Error, Severity::Critical),
    }
}

#[cfg(feature = "sqlite")]
#[allow(clippy::cast_possible_wrap)]
fn write_sqlite(db: &SqliteLogger, event: &ActivityEvent) -> Result<()> {
    let entry = to_log_entry(event);
    if let ActivityEvent::ScanCycleCompleted {
        origin,
        observed,
        unique,
        persisted,
        dangerous,
        duration_ms,
    } = event
    {
        db.log_cycle(&CycleRow {
            timestamp: entry.ts.clone(),
            origin: (*origin).to_string(),
            observed: *observed as i64,
            unique_count: *unique as i64,
            persisted: *persisted as i64,
            dangerous: *dangerous as i64,
            duration_ms: *duration_ms as i64,
        })?;
    }

    let count = match event {
        ActivityEvent::AlertRaised { count, .. } => Some(*count as i64),
        ActivityEvent::StoreRewritten { records, .. } => Some(*records as i64),
        ActivityEvent::ClassifierFailure { failures, .. } => Some(*failures as i64),
        ActivityEvent::ScanCycleCompleted { persisted, .. } => Some(*persisted as i64),
        _ => None,
    };
    db.log_activity(&ActivityRow {
        timestamp: entry.ts,
        event_type: entry.event.map_or("unknown", EventType::as_str).to_string(),
        severity: match entry.severity {
            Some(Severity::Info) | None => "info",
            Some(Severity::Warning) => "warning",
            Some(Severity::Critical) => "critical",
        }
        .to_string(),
        origin: entry.origin,
        count,
        duration_ms: entry.duration_ms.map(|ms| ms as i64),
        success: i32::from(entry.ok.unwrap_or(true)),
        error_code: entry.error_code,
        error_message: entry.error_message,
        details: entry.details,
    })
}

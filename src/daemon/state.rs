//! Persisted job bookkeeping (`state.json`).
//!
//! Survives between one-shot `wsn job` invocations so the retry budget and
//! totals carry over from one timer firing to the next.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WsnError};
use crate::core::fsio::write_atomic;

const STATE_MODE: u32 = 0o644;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobState {
    /// Retries since the last success; drives the retry budget.
    pub consecutive_retries: u32,
    /// `"success"` or `"retry"`.
    pub last_outcome: Option<String>,
    pub last_reason: Option<String>,
    pub last_run: Option<DateTime<Local>>,
    pub last_success: Option<DateTime<Local>>,
    pub total_runs: u64,
    pub total_successes: u64,
    pub total_retries: u64,
    pub total_persisted: u64,
    pub total_alerts: u64,
}

impl JobState {
    /// Load state; a missing file is a fresh state.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(raw) if raw.trim().is_empty() => Ok(Self::default()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(WsnError::io(path, source)),
        }
    }

    /// Like [`JobState::load`], but an unreadable or corrupt file resets to a
    /// fresh state instead of failing the run.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            eprintln!(
                "[WSN-JOB] discarding unreadable job state {}: {e}",
                path.display()
            );
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut body = serde_json::to_string_pretty(self)?;
        body.push('\n');
        write_atomic(path, body.as_bytes(), STATE_MODE)
    }

    pub fn record_success(&mut self, reason: Option<&str>, persisted: usize, alerted: bool) {
        let now = Local::now();
        self.consecutive_retries = 0;
        self.last_outcome = Some("success".to_string());
        self.last_reason = reason.map(str::to_string);
        self.last_run = Some(now);
        self.last_success = Some(now);
        self.total_runs += 1;
        self.total_successes += 1;
        self.total_persisted += persisted as u64;
        if alerted {
            self.total_alerts += 1;
        }
    }

    pub fn record_retry(&mut self, reason: &str) {
        self.consecutive_retries = self.consecutive_retries.saturating_add(1);
        self.last_outcome = Some("retry".to_string());
        self.last_reason = Some(reason.to_string());
        self.last_run = Some(Local::now());
        self.total_runs += 1;
        self.total_retries += 1;
    }
}

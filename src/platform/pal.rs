//! Scan-source abstraction and the replay implementation used by tests and demos.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WsnError};
use crate::pipeline::records::{NetworkObservation, now_seconds};

/// Radio access used by the session and the scheduled job.
///
/// Implementations wrap whatever the host offers (NetworkManager, a replay
/// file, a test double). Calls may block on external processes, so callers
/// keep them off any interactive thread.
pub trait ScanSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Switch the radio on if it is off. `Ok(true)` means it was just
    /// enabled and needs a moment before a scan will be accepted.
    fn ensure_radio_enabled(&self) -> Result<bool>;

    /// Ask the radio for a fresh scan. `false` means the request was refused.
    fn trigger_scan(&self) -> bool;

    /// Most recent scan results, or `None` when none are available.
    fn latest_results(&self) -> Option<Vec<NetworkObservation>>;
}

/// Fixture file layout for [`ReplayScanSource::from_file`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayFixture {
    /// `null` entries model "no results available".
    pub batches: Vec<Option<Vec<NetworkObservation>>>,
    /// Keep serving the final batch once the queue is drained.
    pub repeat_last: bool,
    /// Answer for `trigger_scan`.
    pub accept_scans: bool,
    /// Initial radio state.
    pub radio_enabled: bool,
}

impl Default for ReplayFixture {
    fn default() -> Self {
        Self {
            batches: Vec::new(),
            repeat_last: false,
            accept_scans: true,
            radio_enabled: true,
        }
    }
}

impl ReplayFixture {
    #[must_use]
    pub fn new(batches: Vec<Option<Vec<NetworkObservation>>>) -> Self {
        Self {
            batches,
            ..Self::default()
        }
    }
}

/// Serves pre-recorded batches, one per `latest_results` call.
#[derive(Debug)]
pub struct ReplayScanSource {
    queue: Mutex<VecDeque<Option<Vec<NetworkObservation>>>>,
    last: Mutex<Option<Vec<NetworkObservation>>>,
    repeat_last: bool,
    accept_scans: AtomicBool,
    radio_enabled: AtomicBool,
    trigger_calls: AtomicUsize,
    result_calls: AtomicUsize,
    radio_calls: AtomicUsize,
}

impl ReplayScanSource {
    #[must_use]
    pub fn new(fixture: ReplayFixture) -> Self {
        Self {
            queue: Mutex::new(fixture.batches.into_iter().collect()),
            last: Mutex::new(None),
            repeat_last: fixture.repeat_last,
            accept_scans: AtomicBool::new(fixture.accept_scans),
            radio_enabled: AtomicBool::new(fixture.radio_enabled),
            trigger_calls: AtomicUsize::new(0),
            result_calls: AtomicUsize::new(0),
            radio_calls: AtomicUsize::new(0),
        }
    }

    /// One batch per call, in order, then `None`.
    #[must_use]
    pub fn with_batches(batches: Vec<Option<Vec<NetworkObservation>>>) -> Self {
        Self::new(ReplayFixture::new(batches))
    }

    /// Load a fixture. A bare JSON array of observations is one repeating batch.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| WsnError::io(path, source))?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        let fixture = if value.is_array() {
            let batch: Vec<NetworkObservation> = serde_json::from_value(value)?;
            ReplayFixture {
                repeat_last: true,
                ..ReplayFixture::new(vec![Some(batch)])
            }
        } else {
            serde_json::from_value(value)?
        };
        Ok(Self::new(fixture))
    }

    pub fn set_accept_scans(&self, accept: bool) {
        self.accept_scans.store(accept, Ordering::SeqCst);
    }

    pub fn set_radio_enabled(&self, enabled: bool) {
        self.radio_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Queue another batch behind the remaining ones.
    pub fn push_batch(&self, batch: Option<Vec<NetworkObservation>>) {
        self.queue.lock().push_back(batch);
    }

    #[must_use]
    pub fn trigger_calls(&self) -> usize {
        self.trigger_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn result_calls(&self) -> usize {
        self.result_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn radio_calls(&self) -> usize {
        self.radio_calls.load(Ordering::SeqCst)
    }

    /// Total calls of any kind; zero means the radio was never touched.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.trigger_calls() + self.result_calls() + self.radio_calls()
    }
}

impl ScanSource for ReplayScanSource {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn ensure_radio_enabled(&self) -> Result<bool> {
        self.radio_calls.fetch_add(1, Ordering::SeqCst);
        Ok(!self.radio_enabled.swap(true, Ordering::SeqCst))
    }

    fn trigger_scan(&self) -> bool {
        self.trigger_calls.fetch_add(1, Ordering::SeqCst);
        self.accept_scans.load(Ordering::SeqCst)
    }

    fn latest_results(&self) -> Option<Vec<NetworkObservation>> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.queue.lock().pop_front();
        let batch = match next {
            Some(batch) => {
                if batch.is_some() {
                    self.last.lock().clone_from(&batch);
                }
                batch
            }
            None if self.repeat_last => self.last.lock().clone(),
            None => None,
        }?;

        let stamp = now_seconds();
        Some(
            batch
                .into_iter()
                .map(|mut obs| {
                    obs.observed_at = stamp;
                    obs
                })
                .collect(),
        )
    }
}

/// Parsed `--source` / `scanner.source` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Nmcli,
    Replay(PathBuf),
}

impl SourceSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("nmcli") {
            return Ok(Self::Nmcli);
        }
        if let Some(path) = raw.strip_prefix("replay:")
            && !path.is_empty()
        {
            return Ok(Self::Replay(PathBuf::from(path)));
        }
        Err(WsnError::InvalidConfig {
            details: format!("unknown scan source {raw:?} (expected \"nmcli\" or \"replay:<path>\")"),
        })
    }
}

/// Build the scan source named by `spec`.
pub fn open_scan_source(spec: &SourceSpec, interface: Option<&str>) -> Result<Arc<dyn ScanSource>> {
    match spec {
        SourceSpec::Replay(path) => Ok(Arc::new(ReplayScanSource::from_file(path)?)),
        SourceSpec::Nmcli => {
            #[cfg(target_os = "linux")]
            {
                Ok(Arc::new(crate::platform::nmcli::NmcliScanSource::new(
                    interface.map(str::to_string),
                )))
            }
            #[cfg(not(target_os = "linux"))]
            {
                let _ = interface;
                Err(WsnError::UnsupportedPlatform {
                    details: "the nmcli scan source needs Linux with NetworkManager".to_string(),
                })
            }
        }
    }
}

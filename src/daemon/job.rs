//! One background scan cycle with its retry policy.
//!
//! `do_work` never returns an error: every failure between reading the
//! settings and raising the alert, panics included, becomes a `Retry`.

#![allow(missing_docs)]

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use serde::Serialize;

use crate::classifier::{RiskClassifier, build_classifier};
use crate::core::config::{Config, JobConfig};
use crate::core::errors::Result;
use crate::core::settings::{FileSettingsSource, SettingsSource};
use crate::daemon::alerts::{AlertPolicy, GroupedAlert, NotificationSink};
use crate::daemon::scheduler::{CancelToken, RunResult};
use crate::daemon::state::JobState;
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};
use crate::pipeline::ingest::{BatchSummary, process_batch};
use crate::platform::location::{LocationProvider, location_from_config};
use crate::platform::pal::{ScanSource, SourceSpec, open_scan_source};
use crate::store::network_store::NetworkStore;

/// How often a waiting caller re-checks its cancel token.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Why a successful run did less than a full cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AutoScanDisabled,
    ScanNotStarted,
    /// Stopped after the store was already updated; the alert was not raised.
    CancelledAfterPersist,
    RetryBudgetExhausted,
}

impl SkipReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AutoScanDisabled => "auto_scan_disabled",
            Self::ScanNotStarted => "scan_not_started",
            Self::CancelledAfterPersist => "cancelled_after_persist",
            Self::RetryBudgetExhausted => "retry_budget_exhausted",
        }
    }
}

/// Why a run asked to be retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "details", rename_all = "snake_case")]
pub enum RetryReason {
    SettingsUnavailable(String),
    ResultsUnavailable,
    PersistFailed(String),
    Cancelled(&'static str),
    Panicked(String),
}

impl RetryReason {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SettingsUnavailable(_) => "settings_unavailable",
            Self::ResultsUnavailable => "results_unavailable",
            Self::PersistFailed(_) => "persist_failed",
            Self::Cancelled(_) => "cancelled",
            Self::Panicked(_) => "panicked",
        }
    }
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SettingsUnavailable(e) => write!(f, "settings unavailable: {e}"),
            Self::ResultsUnavailable => write!(f, "scan results unavailable"),
            Self::PersistFailed(e) => write!(f, "persist failed: {e}"),
            Self::Cancelled(stage) => write!(f, "cancelled during {stage}"),
            Self::Panicked(msg) => write!(f, "cycle panicked: {msg}"),
        }
    }
}

/// What a successful run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobReport {
    pub skipped: Option<SkipReason>,
    pub radio_switched_on: bool,
    pub summary: BatchSummary,
    /// Keys newly written to the store.
    pub persisted: Vec<String>,
    pub alert: Option<GroupedAlert>,
    pub duration_ms: u64,
}

impl JobReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Success(JobReport),
    Retry { reason: RetryReason },
}

impl JobOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub const fn run_result(&self) -> RunResult {
        match self {
            Self::Success(_) => RunResult::Success,
            Self::Retry { .. } => RunResult::Retry,
        }
    }
}

/// Collaborators of a job run.
#[derive(Clone)]
pub struct JobContext {
    pub source: Arc<dyn ScanSource>,
    pub settings: Arc<dyn SettingsSource>,
    pub classifier: Arc<dyn RiskClassifier>,
    pub location: Arc<dyn LocationProvider>,
    pub store: Arc<NetworkStore>,
    pub sink: Arc<dyn NotificationSink>,
    pub logger: ActivityLoggerHandle,
}

impl JobContext {
    /// Wire up the configured scan source, settings file, classifier,
    /// location and dataset.
    pub fn from_config(
        config: &Config,
        sink: Arc<dyn NotificationSink>,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        let spec = SourceSpec::parse(&config.scanner.source)?;
        Ok(Self {
            source: open_scan_source(&spec, config.scanner.interface.as_deref())?,
            settings: Arc::new(FileSettingsSource::new(&config.paths.settings_file)),
            classifier: build_classifier(&config.classifier),
            location: location_from_config(&config.location),
            store: Arc::new(NetworkStore::open(&config.paths.dataset)),
            sink,
            logger,
        })
    }
}

/// The periodic background unit of work.
#[derive(Clone)]
pub struct ScheduledScanJob {
    ctx: JobContext,
    policy: AlertPolicy,
    config: JobConfig,
    state: Arc<Mutex<JobState>>,
    state_path: Option<PathBuf>,
}

impl ScheduledScanJob {
    #[must_use]
    pub fn new(ctx: JobContext, policy: AlertPolicy, config: JobConfig) -> Self {
        Self {
            ctx,
            policy,
            config,
            state: Arc::new(Mutex::new(JobState::default())),
            state_path: None,
        }
    }

    /// Persist bookkeeping in `path` so it outlives the process.
    #[must_use]
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        *self.state.lock() = JobState::load_or_default(&path);
        self.state_path = Some(path);
        self
    }

    #[must_use]
    pub const fn context(&self) -> &JobContext {
        &self.ctx
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        self.state.lock().clone()
    }

    /// Swap collaborators and knobs; bookkeeping is kept.
    pub fn reconfigure(&mut self, ctx: JobContext, policy: AlertPolicy, config: JobConfig) {
        self.ctx = ctx;
        self.policy = policy;
        self.config = config;
    }

    /// Run one cycle and apply the retry budget.
    pub fn do_work(&self, cancel: &CancelToken) -> JobOutcome {
        let started = Instant::now();
        if let Some(path) = &self.state_path {
            *self.state.lock() = JobState::load_or_default(path);
        }
        let failures_before = self.ctx.classifier.failure_count();

        let outcome = match self.run_isolated(cancel) {
            JobOutcome::Success(mut report) => {
                report.duration_ms = elapsed_ms(started);
                JobOutcome::Success(report)
            }
            JobOutcome::Retry { reason } => self.apply_retry_budget(reason, started),
        };

        self.record(&outcome);
        self.log_outcome(&outcome, failures_before);
        outcome
    }

    /// Runs the cycle on its own thread so a panic is contained to this run.
    ///
    /// The caller waits at most until `cancel` fires. A cycle stuck inside
    /// the scan source is left detached; its token is already cancelled, so
    /// it stops before touching the store once the source returns.
    fn run_isolated(&self, cancel: &CancelToken) -> JobOutcome {
        let job = self.clone();
        let token = cancel.clone();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let spawned = thread::Builder::new()
            .name("wsn-job".to_string())
            .spawn(move || {
                let _ = tx.send(job.cycle(&token));
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                return JobOutcome::Retry {
                    reason: RetryReason::Panicked(format!("cannot spawn job thread: {e}")),
                };
            }
        };

        loop {
            match rx.recv_timeout(WAIT_SLICE) {
                Ok(outcome) => {
                    let _ = handle.join();
                    return outcome;
                }
                Err(RecvTimeoutError::Disconnected) => return panicked(handle),
                Err(RecvTimeoutError::Timeout) if cancel.is_cancelled() => {
                    let stage = if cancel.timed_out() { "timeout" } else { "shutdown" };
                    eprintln!("[WSN-JOB] abandoning scan cycle still running at {stage}");
                    return cancelled(stage);
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    fn cycle(&self, cancel: &CancelToken) -> JobOutcome {
        let settings = match self.ctx.settings.fetch() {
            Ok(settings) => settings,
            Err(e) => {
                return JobOutcome::Retry {
                    reason: RetryReason::SettingsUnavailable(e.to_string()),
                };
            }
        };
        if !settings.auto_scan_enabled {
            return JobOutcome::Success(JobReport::skipped(SkipReason::AutoScanDisabled));
        }

        let mut report = JobReport::default();
        match self.ctx.source.ensure_radio_enabled() {
            Ok(true) => {
                report.radio_switched_on = true;
                if !cancel.sleep(self.config.radio_enable_wait()) {
                    return cancelled("radio_enable_wait");
                }
            }
            Ok(false) => {}
            Err(e) => eprintln!("[WSN-JOB] could not enable radio, scanning anyway: {e}"),
        }

        if !self.ctx.source.trigger_scan() {
            report.skipped = Some(SkipReason::ScanNotStarted);
            return JobOutcome::Success(report);
        }
        let Some(observations) = self.ctx.source.latest_results() else {
            return JobOutcome::Retry {
                reason: RetryReason::ResultsUnavailable,
            };
        };
        if cancel.is_cancelled() {
            return cancelled("classification");
        }

        let batch = process_batch(
            observations,
            self.ctx.classifier.as_ref(),
            self.ctx.location.as_ref(),
        );
        report.summary = batch.summary;

        if cancel.is_cancelled() {
            return cancelled("persist");
        }
        if settings.auto_save_enabled {
            match self.ctx.store.append_new(&batch.records) {
                Ok(appended) => report.persisted = appended.appended,
                Err(e) => {
                    return JobOutcome::Retry {
                        reason: RetryReason::PersistFailed(e.to_string()),
                    };
                }
            }
        }

        if cancel.is_cancelled() {
            report.skipped = Some(SkipReason::CancelledAfterPersist);
            return JobOutcome::Success(report);
        }

        let dangerous = batch.dangerous();
        if let Some(alert) = self.policy.evaluate(&dangerous, &settings) {
            self.ctx.sink.deliver(&alert);
            report.alert = Some(alert);
        }
        JobOutcome::Success(report)
    }

    fn apply_retry_budget(&self, reason: RetryReason, started: Instant) -> JobOutcome {
        let max = self.config.max_consecutive_retries;
        let spent = self.state.lock().consecutive_retries;
        if max > 0 && spent >= max {
            eprintln!(
                "[WSN-JOB] giving up after {spent} consecutive retries, last failure: {reason}"
            );
            return JobOutcome::Success(JobReport {
                skipped: Some(SkipReason::RetryBudgetExhausted),
                duration_ms: elapsed_ms(started),
                ..JobReport::default()
            });
        }
        JobOutcome::Retry { reason }
    }

    fn record(&self, outcome: &JobOutcome) {
        let mut state = self.state.lock();
        match outcome {
            JobOutcome::Success(report) => state.record_success(
                report.skipped.map(SkipReason::as_str),
                report.persisted.len(),
                report.alert.is_some(),
            ),
            JobOutcome::Retry { reason } => state.record_retry(reason.code()),
        }
        if let Some(path) = &self.state_path
            && let Err(e) = state.save(path)
        {
            eprintln!("[WSN-JOB] failed to save job state: {e}");
        }
    }

    fn log_outcome(&self, outcome: &JobOutcome, failures_before: u64) {
        let logger = &self.ctx.logger;
        let consecutive_retries = self.state.lock().consecutive_retries;

        match outcome {
            JobOutcome::Success(report) => {
                if report.skipped.is_none() || report.summary.observed > 0 {
                    logger.send(ActivityEvent::ScanCycleCompleted {
                        origin: "job",
                        observed: report.summary.observed,
                        unique: report.summary.unique,
                        persisted: report.persisted.len(),
                        dangerous: report.summary.dangerous,
                        duration_ms: report.duration_ms,
                    });
                }
                if let Some(alert) = &report.alert {
                    logger.send(ActivityEvent::AlertRaised {
                        count: alert.count,
                        shown: alert.lines.len(),
                    });
                }
                logger.send(ActivityEvent::JobOutcome {
                    outcome: "success".to_string(),
                    reason: report.skipped.map(|s| s.as_str().to_string()),
                    consecutive_retries,
                });
            }
            JobOutcome::Retry { reason } => {
                logger.send(ActivityEvent::JobOutcome {
                    outcome: "retry".to_string(),
                    reason: Some(reason.to_string()),
                    consecutive_retries,
                });
            }
        }

        let failures = self.ctx.classifier.failure_count();
        if failures > failures_before {
            eprintln!(
                "[WSN-CLASSIFY] {} classifications fell back to MEDIUM this run",
                failures - failures_before
            );
            logger.send(ActivityEvent::ClassifierFailure {
                classifier: self.ctx.classifier.name(),
                failures,
            });
        }
    }
}

/// The worker dropped its sender without sending: it panicked.
fn panicked(handle: thread::JoinHandle<()>) -> JobOutcome {
    let msg = match handle.join() {
        Ok(()) => "job thread exited without an outcome".to_string(),
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
    };
    eprintln!("[WSN-JOB] scan cycle panicked: {msg}");
    JobOutcome::Retry {
        reason: RetryReason::Panicked(msg),
    }
}

fn cancelled(stage: &'static str) -> JobOutcome {
    JobOutcome::Retry {
        reason: RetryReason::Cancelled(stage),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

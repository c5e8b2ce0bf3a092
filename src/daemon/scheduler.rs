//! When the background job runs: fixed cadence, exponential backoff after
//! retries, and the cancel token handed to each run.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::core::config::SchedulerConfig;

/// Granularity of [`CancelToken::sleep`].
const SLEEP_SLICE: Duration = Duration::from_millis(50);

// ──────────────────── cancellation ────────────────────

/// Cooperative cancellation for one job run.
///
/// Cancelled when the shared flag is raised (daemon shutdown) or the
/// deadline passes.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Token that is only cancelled by [`CancelToken::cancel`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Token tied to an existing flag, such as the daemon's shutdown flag.
    #[must_use]
    pub const fn linked(flag: Arc<AtomicBool>) -> Self {
        Self {
            flag,
            deadline: None,
        }
    }

    /// Same flag, plus a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// True once the deadline has passed, whatever the flag says.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Sleep for `duration` unless cancelled first. Returns `true` when the
    /// full duration elapsed.
    #[must_use]
    pub fn sleep(&self, duration: Duration) -> bool {
        let end = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= end {
                return true;
            }
            std::thread::sleep((end - now).min(SLEEP_SLICE));
        }
    }
}

// ──────────────────── scheduler ────────────────────

/// How the last run ended, as far as scheduling is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    Success,
    Retry,
}

/// Decides when the next background run is due.
#[derive(Debug, Clone)]
pub struct JobScheduler {
    config: SchedulerConfig,
    next_due: Instant,
    consecutive_retries: u32,
}

impl JobScheduler {
    /// First run falls `initial_delay_secs` after `now`.
    #[must_use]
    pub fn new(config: SchedulerConfig, now: Instant) -> Self {
        let next_due = now + Duration::from_secs(config.initial_delay_secs);
        Self {
            config,
            next_due,
            consecutive_retries: 0,
        }
    }

    /// Resume a backoff sequence, e.g. from persisted job state.
    #[must_use]
    pub const fn with_consecutive_retries(mut self, retries: u32) -> Self {
        self.consecutive_retries = retries;
        self
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    #[must_use]
    pub const fn next_due(&self) -> Instant {
        self.next_due
    }

    #[must_use]
    pub fn time_until_due(&self, now: Instant) -> Duration {
        self.next_due.saturating_duration_since(now)
    }

    #[must_use]
    pub const fn consecutive_retries(&self) -> u32 {
        self.consecutive_retries
    }

    /// Make the job due immediately.
    pub fn run_now(&mut self, now: Instant) {
        self.next_due = now;
    }

    /// Schedule the next run after a finished one and return the delay chosen.
    pub fn record(&mut self, result: RunResult, now: Instant) -> Duration {
        let delay = match result {
            RunResult::Success => {
                self.consecutive_retries = 0;
                Duration::from_secs(self.config.interval_secs)
            }
            RunResult::Retry => {
                let delay = self.backoff_delay(self.consecutive_retries);
                self.consecutive_retries = self.consecutive_retries.saturating_add(1);
                jittered(delay, self.config.jitter, &mut rand::rng())
            }
        };
        self.next_due = now + delay;
        delay
    }

    /// Swap in new settings; the pending due time is kept.
    pub fn reconfigure(&mut self, config: SchedulerConfig) {
        self.config = config;
    }

    /// Un-jittered delay after the `attempt`-th consecutive retry (0-based).
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let initial = self.config.backoff_initial_secs as f64;
        let cap = self.config.backoff_max_secs as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = (initial * self.config.backoff_multiplier.powi(exponent)).min(cap);
        if secs.is_finite() && secs >= 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::from_secs(self.config.backoff_max_secs)
        }
    }
}

/// Spread `base` uniformly over `base * (1 ± jitter)`.
pub fn jittered(base: Duration, jitter: f64, rng: &mut impl Rng) -> Duration {
    if jitter <= 0.0 || base.is_zero() {
        return base;
    }
    let factor = 1.0 + rng.random_range(-jitter..=jitter);
    base.mul_f64(factor.max(0.0))
}

//! Daemon loop: runs the scheduled scan job on its cadence until signalled.
//!
//! Architecture: the main thread owns the scheduler and polls signal flags
//! each tick; every job run gets a cancel token linked to the shutdown flag;
//! activity goes to the logger thread (via dual.rs).

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::daemon::alerts::AlertPolicy;
use crate::daemon::job::{JobContext, JobOutcome, ScheduledScanJob};
use crate::daemon::notifications::{NotificationEvent, NotificationManager};
use crate::daemon::scheduler::{CancelToken, JobScheduler};
use crate::daemon::signals::{SignalHandler, WatchdogHeartbeat, notify_ready};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle, DualLoggerConfig, spawn_logger};

/// Longest sleep between signal checks.
const MAX_TICK: Duration = Duration::from_millis(500);

/// Daemon launch options.
#[derive(Debug, Clone, Default)]
pub struct DaemonArgs {
    /// Skip the initial delay and run the job right away.
    pub run_immediately: bool,
}

/// The background sentinel: scheduled job, signals, logging, notifications.
pub struct SentinelDaemon {
    config: Config,
    job: ScheduledScanJob,
    scheduler: JobScheduler,
    notifications: Arc<NotificationManager>,
    logger_handle: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    signal_handler: SignalHandler,
    watchdog: WatchdogHeartbeat,
    start_time: Instant,
    runs: u64,
}

impl SentinelDaemon {
    /// Build the daemon with OS signal hooks registered.
    pub fn init(config: Config, args: &DaemonArgs) -> Result<Self> {
        Self::init_with(config, args, SignalHandler::new())
    }

    /// Build the daemon around an existing signal handler.
    pub fn init_with(config: Config, args: &DaemonArgs, signal_handler: SignalHandler) -> Result<Self> {
        let start_time = Instant::now();

        let (logger_handle, logger_join) =
            spawn_logger(DualLoggerConfig::from_paths(&config.paths))?;

        let notifications = Arc::new(NotificationManager::from_config(&config.notifications));
        let ctx = JobContext::from_config(&config, notifications.clone(), logger_handle.clone())?;
        let job = ScheduledScanJob::new(
            ctx,
            AlertPolicy::from_config(&config.alerts),
            config.job.clone(),
        )
        .with_state_file(&config.paths.state_file);

        let mut scheduler = JobScheduler::new(config.scheduler.clone(), start_time)
            .with_consecutive_retries(job.state().consecutive_retries);
        if args.run_immediately {
            scheduler.run_now(start_time);
        }

        Ok(Self {
            config,
            job,
            scheduler,
            notifications,
            logger_handle,
            logger_join: Some(logger_join),
            signal_handler,
            watchdog: WatchdogHeartbeat::from_env(),
            start_time,
            runs: 0,
        })
    }

    /// Job runs completed since start.
    #[must_use]
    pub const fn runs(&self) -> u64 {
        self.runs
    }

    /// Run until shutdown is requested. Entry point for `wsn daemon`.
    pub fn run(&mut self) -> Result<()> {
        let version = env!("CARGO_PKG_VERSION").to_string();
        self.logger_handle.send(ActivityEvent::DaemonStarted {
            version: version.clone(),
            config_hash: self.config.stable_hash().unwrap_or_default(),
        });
        self.notifications
            .notify(&NotificationEvent::DaemonStarted { version });
        notify_ready();
        eprintln!(
            "[WSN-DAEMON] started; first run in {}s",
            self.scheduler.time_until_due(Instant::now()).as_secs()
        );

        loop {
            if self.signal_handler.should_shutdown() {
                eprintln!("[WSN-DAEMON] shutdown requested");
                break;
            }
            if self.signal_handler.should_reload() {
                self.handle_config_reload();
            }
            if self.signal_handler.should_run_now() {
                eprintln!("[WSN-DAEMON] immediate run requested (SIGUSR1)");
                self.scheduler.run_now(Instant::now());
            }

            if self.scheduler.is_due(Instant::now()) {
                self.run_job();
            }

            let status = format!(
                "runs={} next_in={}s",
                self.runs,
                self.scheduler.time_until_due(Instant::now()).as_secs()
            );
            self.watchdog.maybe_notify(&status);

            let nap = self.scheduler.time_until_due(Instant::now()).min(MAX_TICK);
            thread::sleep(nap.max(Duration::from_millis(10)));
        }

        self.shutdown("signal");
        Ok(())
    }

    fn run_job(&mut self) {
        let token = CancelToken::linked(self.signal_handler.shutdown_flag())
            .with_timeout(self.config.job.timeout());
        let outcome = self.job.do_work(&token);
        let delay = self.scheduler.record(outcome.run_result(), Instant::now());
        self.runs += 1;

        match &outcome {
            JobOutcome::Success(report) => eprintln!(
                "[WSN-DAEMON] run {} ok: {} unique, {} new, {} dangerous{}; next in {}s",
                self.runs,
                report.summary.unique,
                report.persisted.len(),
                report.summary.dangerous,
                report
                    .skipped
                    .map(|s| format!(" ({})", s.as_str()))
                    .unwrap_or_default(),
                delay.as_secs()
            ),
            JobOutcome::Retry { reason } => eprintln!(
                "[WSN-DAEMON] run {} needs retry: {reason}; retrying in {}s",
                self.runs,
                delay.as_secs()
            ),
        }
    }

    fn handle_config_reload(&mut self) {
        eprintln!("[WSN-DAEMON] config reload requested (SIGHUP)");

        let reloaded = Config::load(Some(&self.config.paths.config_file)).and_then(|new_config| {
            let old_hash = self.config.stable_hash().unwrap_or_default();
            let new_hash = new_config.stable_hash().unwrap_or_default();
            if old_hash == new_hash {
                return Ok(None);
            }
            let notifications = Arc::new(NotificationManager::from_config(&new_config.notifications));
            let ctx = JobContext::from_config(
                &new_config,
                notifications.clone(),
                self.logger_handle.clone(),
            )?;
            Ok(Some((new_config, notifications, ctx, old_hash, new_hash)))
        });

        match reloaded {
            Ok(None) => eprintln!("[WSN-DAEMON] config unchanged, skipping reload"),
            Ok(Some((new_config, notifications, ctx, old_hash, new_hash))) => {
                self.job.context().classifier.shutdown();
                self.job.reconfigure(
                    ctx,
                    AlertPolicy::from_config(&new_config.alerts),
                    new_config.job.clone(),
                );
                self.scheduler.reconfigure(new_config.scheduler.clone());
                self.notifications = notifications;
                self.config = new_config;
                self.logger_handle.send(ActivityEvent::ConfigReloaded {
                    details: format!("config hash {old_hash} -> {new_hash}"),
                });
                eprintln!("[WSN-DAEMON] config reloaded");
            }
            Err(e) => {
                eprintln!("[WSN-DAEMON] config reload failed, keeping current config: {e}");
                self.logger_handle.send(ActivityEvent::Error {
                    code: e.code().to_string(),
                    message: format!("config reload failed: {e}"),
                });
                self.notifications.notify(&NotificationEvent::Error {
                    code: e.code().to_string(),
                    details: format!("config reload failed: {e}"),
                });
            }
        }
    }

    fn shutdown(&mut self, reason: &str) {
        let uptime_secs = self.start_time.elapsed().as_secs();

        self.job.context().classifier.shutdown();

        self.logger_handle.send(ActivityEvent::DaemonStopped {
            reason: reason.to_string(),
            uptime_secs,
        });
        self.notifications.notify(&NotificationEvent::DaemonStopped {
            reason: reason.to_string(),
            uptime_secs,
        });

        self.logger_handle.shutdown();
        if let Some(logger_join) = self.logger_join.take() {
            let _ = logger_join.join();
        }

        eprintln!("[WSN-DAEMON] shutdown complete (uptime={uptime_secs}s)");
    }
}

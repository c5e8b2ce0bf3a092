//! Foreground scan loop publishing the live, deduplicated view.
//!
//! The loop owns its thread. Callers steer it through [`SessionHandle`];
//! commands arrive over a crossbeam channel and are observed during every
//! wait, so pause and stop take effect without waiting out a delay.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded, unbounded};
use parking_lot::Mutex;
use serde::Serialize;

use crate::classifier::RiskClassifier;
use crate::core::config::SessionConfig;
use crate::core::errors::{Result, WsnError};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};
use crate::pipeline::ingest::{BatchSummary, process_batch};
use crate::pipeline::records::{NetworkRecord, now_seconds};
use crate::platform::location::LocationProvider;
use crate::platform::pal::ScanSource;
use crate::store::network_store::NetworkStore;

const SUBSCRIBER_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Pause,
    Resume,
    Toggle,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Running,
    Paused,
}

/// The live view after one completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveSnapshot {
    pub cycle: u64,
    pub taken_at: NaiveDateTime,
    pub records: Vec<NetworkRecord>,
    pub summary: BatchSummary,
    /// Keys first written to the store during this cycle.
    pub persisted: Vec<String>,
}

impl LiveSnapshot {
    #[must_use]
    pub fn dangerous(&self) -> impl Iterator<Item = &NetworkRecord> {
        self.records.iter().filter(|r| r.is_dangerous())
    }
}

/// Collaborators of the live loop.
#[derive(Clone)]
pub struct SessionContext {
    pub source: Arc<dyn ScanSource>,
    pub classifier: Arc<dyn RiskClassifier>,
    pub location: Arc<dyn LocationProvider>,
    pub store: Arc<NetworkStore>,
    pub logger: ActivityLoggerHandle,
}

/// What interrupted a wait.
enum Wake {
    Elapsed,
    Pause,
    Stop,
}

struct Shared {
    paused: AtomicBool,
    cycles: AtomicU64,
    latest: Mutex<Option<LiveSnapshot>>,
    subscribers: Mutex<Vec<Sender<LiveSnapshot>>>,
}

impl Shared {
    fn publish(&self, snapshot: LiveSnapshot) {
        self.subscribers
            .lock()
            .retain(|tx| match tx.try_send(snapshot.clone()) {
                Ok(()) | Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            });
        self.cycles.store(snapshot.cycle, Ordering::Relaxed);
        *self.latest.lock() = Some(snapshot);
    }
}

pub struct ScanSession {
    ctx: SessionContext,
    config: SessionConfig,
}

impl ScanSession {
    #[must_use]
    pub const fn new(ctx: SessionContext, config: SessionConfig) -> Self {
        Self { ctx, config }
    }

    /// Start the loop in the RUNNING state on a dedicated thread.
    pub fn spawn(self) -> Result<SessionHandle> {
        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared {
            paused: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            latest: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        });
        let loop_shared = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name("wsn-session".to_string())
            .spawn(move || self.run(&rx, &loop_shared))
            .map_err(|e| WsnError::Runtime {
                details: format!("failed to spawn session thread: {e}"),
            })?;

        Ok(SessionHandle {
            commands: tx,
            shared,
            join: Some(join),
        })
    }

    fn run(&self, commands: &Receiver<SessionCommand>, shared: &Shared) {
        let mut cycle: u64 = 0;
        loop {
            if shared.paused.load(Ordering::Relaxed) {
                match commands.recv() {
                    Ok(SessionCommand::Resume | SessionCommand::Toggle) => {
                        shared.paused.store(false, Ordering::Relaxed);
                    }
                    Ok(SessionCommand::Pause) => {}
                    Ok(SessionCommand::Stop) | Err(_) => break,
                }
                continue;
            }

            let started = Instant::now();
            if self.ctx.source.trigger_scan() {
                match wait(commands, self.config.settle()) {
                    Wake::Elapsed => {
                        cycle += 1;
                        self.ingest(cycle, started, shared);
                    }
                    Wake::Pause => {
                        shared.paused.store(true, Ordering::Relaxed);
                        continue;
                    }
                    Wake::Stop => break,
                }
            } else {
                eprintln!("[WSN-SESSION] scan request refused, retrying next cycle");
            }

            match wait(commands, self.config.interval()) {
                Wake::Elapsed => {}
                Wake::Pause => shared.paused.store(true, Ordering::Relaxed),
                Wake::Stop => break,
            }
        }
    }

    /// Read, classify, merge, persist, publish. Missing results skip the cycle.
    fn ingest(&self, cycle: u64, started: Instant, shared: &Shared) {
        let Some(observations) = self.ctx.source.latest_results() else {
            eprintln!("[WSN-SESSION] no scan results available");
            return;
        };
        let batch = process_batch(
            observations,
            self.ctx.classifier.as_ref(),
            self.ctx.location.as_ref(),
        );

        let persisted = match self.ctx.store.append_new(&batch.records) {
            Ok(report) => report.appended,
            Err(e) => {
                eprintln!("[WSN-SESSION] failed to persist new networks: {e}");
                self.ctx.logger.send(ActivityEvent::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
                Vec::new()
            }
        };

        self.ctx.logger.send(ActivityEvent::ScanCycleCompleted {
            origin: "session",
            observed: batch.summary.observed,
            unique: batch.summary.unique,
            persisted: persisted.len(),
            dangerous: batch.summary.dangerous,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        });

        shared.publish(LiveSnapshot {
            cycle,
            taken_at: now_seconds(),
            records: batch.records,
            summary: batch.summary,
            persisted,
        });
    }
}

/// Block for `duration`, returning early on pause or stop.
fn wait(commands: &Receiver<SessionCommand>, duration: Duration) -> Wake {
    let deadline = Instant::now() + duration;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Wake::Elapsed;
        }
        match commands.recv_timeout(remaining) {
            Ok(SessionCommand::Pause | SessionCommand::Toggle) => return Wake::Pause,
            Ok(SessionCommand::Resume) => {}
            Ok(SessionCommand::Stop) | Err(RecvTimeoutError::Disconnected) => return Wake::Stop,
            Err(RecvTimeoutError::Timeout) => return Wake::Elapsed,
        }
    }
}

/// Steering side of a running [`ScanSession`]. Dropping it stops the loop.
pub struct SessionHandle {
    commands: Sender<SessionCommand>,
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn pause(&self) {
        self.send(SessionCommand::Pause);
    }

    pub fn resume(&self) {
        self.send(SessionCommand::Resume);
    }

    pub fn toggle(&self) {
        self.send(SessionCommand::Toggle);
    }

    /// State as last applied by the loop thread.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.shared.paused.load(Ordering::Relaxed) {
            SessionState::Paused
        } else {
            SessionState::Running
        }
    }

    /// Completed cycles so far.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn latest(&self) -> Option<LiveSnapshot> {
        self.shared.latest.lock().clone()
    }

    /// Receive every snapshot published from now on. Slow receivers miss
    /// snapshots rather than stalling the loop.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<LiveSnapshot> {
        let (tx, rx) = bounded(SUBSCRIBER_CAPACITY);
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Stop the loop and wait for its thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn send(&self, command: SessionCommand) {
        let _ = self.commands.send(command);
    }

    fn shutdown(&mut self) {
        self.send(SessionCommand::Stop);
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            eprintln!("[WSN-SESSION] session thread panicked");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::rules::RuleClassifier;
    use crate::pipeline::records::NetworkObservation;
    use crate::platform::location::NoLocation;
    use crate::platform::pal::{ReplayFixture, ReplayScanSource};

    fn batch() -> Vec<NetworkObservation> {
        vec![
            NetworkObservation::now("Cafe", "aa:01", -80, 2437, "[ESS]"),
            NetworkObservation::now("Cafe", "aa:02", -50, 2437, "[ESS]"),
            NetworkObservation::now("Home", "aa:03", -40, 5180, "[WPA2-PSK-CCMP][ESS]"),
        ]
    }

    fn session(
        source: Arc<ReplayScanSource>,
        store: Arc<NetworkStore>,
        interval_ms: u64,
    ) -> ScanSession {
        let ctx = SessionContext {
            source,
            classifier: Arc::new(RuleClassifier),
            location: Arc::new(NoLocation),
            store,
            logger: ActivityLoggerHandle::detached(),
        };
        ScanSession::new(
            ctx,
            SessionConfig {
                settle_ms: 5,
                interval_ms,
            },
        )
    }

    fn repeating() -> Arc<ReplayScanSource> {
        Arc::new(ReplayScanSource::new(ReplayFixture {
            repeat_last: true,
            ..ReplayFixture::new(vec![Some(batch())])
        }))
    }

    #[test]
    fn publishes_deduplicated_snapshots_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NetworkStore::open(dir.path().join("wifis_dataset.csv")));
        let handle = session(repeating(), Arc::clone(&store), 10).spawn().unwrap();
        let rx = handle.subscribe();

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.records.len(), 2);
        let cafe = first.records.iter().find(|r| r.ssid == "Cafe").unwrap();
        assert_eq!(cafe.bssid, "aa:02");
        assert_eq!(first.dangerous().count(), 1);

        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(second.cycle > first.cycle);
        assert!(second.persisted.is_empty());
        handle.stop();

        assert_eq!(store.read_all().unwrap().len(), 2);
    }

    #[test]
    fn pause_stops_cycles_until_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NetworkStore::open(dir.path().join("wifis_dataset.csv")));
        let source = repeating();
        let handle = session(Arc::clone(&source), store, 10).spawn().unwrap();
        let rx = handle.subscribe();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        handle.toggle();
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.state() != SessionState::Paused {
            assert!(Instant::now() < deadline, "session never paused");
            thread::sleep(Duration::from_millis(5));
        }
        while rx.try_recv().is_ok() {}
        let triggers = source.trigger_calls();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(source.trigger_calls(), triggers);
        assert!(rx.try_recv().is_err());

        handle.resume();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert_eq!(handle.state(), SessionState::Running);
        handle.stop();
    }

    #[test]
    fn stop_is_prompt_despite_long_interval() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NetworkStore::open(dir.path().join("wifis_dataset.csv")));
        let handle = session(repeating(), store, 60_000).spawn().unwrap();
        let rx = handle.subscribe();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn missing_results_skip_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NetworkStore::open(dir.path().join("wifis_dataset.csv")));
        let source = Arc::new(ReplayScanSource::with_batches(vec![None, Some(batch())]));
        let handle = session(source, Arc::clone(&store), 5).spawn().unwrap();
        let rx = handle.subscribe();

        let snapshot = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(snapshot.records.len(), 2);
        assert_eq!(handle.latest().unwrap().cycle, snapshot.cycle);
        drop(handle);
        assert_eq!(store.read_all().unwrap().len(), 2);
    }
}

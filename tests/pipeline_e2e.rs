//! End-to-end pipeline scenarios through the library API: replay scan
//! sources, in-memory settings and a recording notification sink.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use wifi_sentinel::classifier::rules::RuleClassifier;
use wifi_sentinel::core::config::{JobConfig, SessionConfig};
use wifi_sentinel::core::settings::{Settings, StaticSettings};
use wifi_sentinel::daemon::alerts::{AlertPolicy, RecordingSink};
use wifi_sentinel::daemon::job::{JobContext, JobOutcome, ScheduledScanJob};
use wifi_sentinel::daemon::scheduler::CancelToken;
use wifi_sentinel::daemon::session::{ScanSession, SessionContext};
use wifi_sentinel::logger::dual::ActivityLoggerHandle;
use wifi_sentinel::pipeline::records::{NetworkObservation, RiskLabel};
use wifi_sentinel::platform::location::NoLocation;
use wifi_sentinel::platform::pal::{ReplayFixture, ReplayScanSource};
use wifi_sentinel::store::network_store::NetworkStore;

fn all_on() -> Settings {
    Settings {
        auto_scan_enabled: true,
        auto_save_enabled: true,
        notifications_enabled: true,
        vibration_enabled: false,
    }
}

fn job_config() -> JobConfig {
    JobConfig {
        radio_enable_wait_ms: 0,
        ..JobConfig::default()
    }
}

fn open_networks(prefix: &str, count: usize) -> Vec<NetworkObservation> {
    (0..count)
        .map(|i| {
            NetworkObservation::now(
                format!("{prefix}-{i}"),
                format!("aa:bb:cc:00:00:{i:02x}"),
                -55,
                2437,
                "[ESS]",
            )
        })
        .collect()
}

fn job_with(
    source: Arc<ReplayScanSource>,
    settings: Settings,
    store: Arc<NetworkStore>,
    sink: Arc<RecordingSink>,
) -> ScheduledScanJob {
    let ctx = JobContext {
        source,
        settings: Arc::new(StaticSettings::new(settings)),
        classifier: Arc::new(RuleClassifier),
        location: Arc::new(NoLocation),
        store,
        sink,
        logger: ActivityLoggerHandle::detached(),
    };
    ScheduledScanJob::new(ctx, AlertPolicy::default(), job_config())
}

#[test]
fn seven_dangerous_networks_make_one_grouped_alert() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(NetworkStore::open(dir.path().join("wifis_dataset.csv")));
    let sink = Arc::new(RecordingSink::new());
    let mut batch = open_networks("Open", 7);
    batch.push(NetworkObservation::now(
        "Home",
        "aa:bb:cc:00:01:00",
        -40,
        5180,
        "[WPA2-PSK-CCMP][ESS]",
    ));
    let source = Arc::new(ReplayScanSource::with_batches(vec![Some(batch)]));

    let job = job_with(source, all_on(), Arc::clone(&store), Arc::clone(&sink));
    let JobOutcome::Success(report) = job.do_work(&CancelToken::new()) else {
        panic!("expected success");
    };

    assert_eq!(report.persisted.len(), 8);
    assert_eq!(sink.len(), 1);
    let alert = &sink.delivered()[0];
    assert_eq!(alert.count, 7);
    assert_eq!(alert.lines.len(), 6);
    assert_eq!(alert.lines[0], "Open-0 (DANGEROUS)");
    assert_eq!(alert.lines[5], "+2 more");
    assert!(!alert.vibrate);

    let stored = store.read_all().unwrap();
    assert_eq!(stored.len(), 8);
    assert_eq!(
        stored.iter().filter(|r| r.label == RiskLabel::Safe).count(),
        1
    );
}

#[test]
fn disabled_auto_scan_leaves_radio_store_and_sink_alone() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(NetworkStore::open(dir.path().join("wifis_dataset.csv")));
    let sink = Arc::new(RecordingSink::new());
    let source = Arc::new(ReplayScanSource::with_batches(vec![Some(open_networks("Open", 3))]));

    let settings = Settings {
        auto_scan_enabled: false,
        ..all_on()
    };
    let job = job_with(Arc::clone(&source), settings, Arc::clone(&store), Arc::clone(&sink));
    assert!(job.do_work(&CancelToken::new()).is_success());

    assert_eq!(source.total_calls(), 0);
    assert!(sink.is_empty());
    assert!(!store.path().exists());
}

#[test]
fn session_and_job_share_one_dataset_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wifis_dataset.csv");
    let batch = open_networks("Shared", 40);

    // Two store handles on one file, as a `watch` process and a `job` process would hold.
    let session_store = Arc::new(NetworkStore::open(&path));
    let job_store = Arc::new(NetworkStore::open(&path));

    let session_source = Arc::new(ReplayScanSource::new(ReplayFixture {
        repeat_last: true,
        ..ReplayFixture::new(vec![Some(batch.clone())])
    }));
    let handle = ScanSession::new(
        SessionContext {
            source: session_source,
            classifier: Arc::new(RuleClassifier),
            location: Arc::new(NoLocation),
            store: Arc::clone(&session_store),
            logger: ActivityLoggerHandle::detached(),
        },
        SessionConfig {
            settle_ms: 1,
            interval_ms: 1,
        },
    )
    .spawn()
    .unwrap();

    let sink = Arc::new(RecordingSink::new());
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let source = Arc::new(ReplayScanSource::with_batches(vec![Some(batch.clone())]));
            let job = job_with(source, all_on(), Arc::clone(&job_store), Arc::clone(&sink));
            thread::spawn(move || job.do_work(&CancelToken::new()))
        })
        .collect();
    for worker in workers {
        assert!(worker.join().unwrap().is_success());
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while handle.cycles() < 3 {
        assert!(Instant::now() < deadline, "session never cycled");
        thread::sleep(Duration::from_millis(5));
    }
    handle.stop();

    let raw = std::fs::read_to_string(&path).unwrap();
    let keys: Vec<&str> = raw.lines().collect();
    let unique: HashSet<&str> = keys.iter().copied().collect();
    assert_eq!(keys.len(), 40, "every network stored exactly once");
    assert_eq!(unique.len(), 40);
    assert_eq!(sink.len(), 4, "one alert per job run that saw insecure networks");
}

#[test]
fn cancelled_job_persists_nothing_and_asks_for_retry() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(NetworkStore::open(dir.path().join("wifis_dataset.csv")));
    let sink = Arc::new(RecordingSink::new());
    let source = Arc::new(ReplayScanSource::with_batches(vec![Some(open_networks("Open", 2))]));
    let job = job_with(source, all_on(), Arc::clone(&store), Arc::clone(&sink));

    let token = CancelToken::new();
    token.cancel();
    assert!(matches!(job.do_work(&token), JobOutcome::Retry { .. }));
    assert!(store.read_all().unwrap().is_empty());
    assert!(sink.is_empty());
}

//! Regression: six-field lines written before labels and coordinates were
//! stored, plus assorted junk, must load without failing the whole dataset.

use std::fs;

use wifi_sentinel::pipeline::records::{NetworkObservation, RiskLabel};
use wifi_sentinel::store::network_store::NetworkStore;

const LEGACY: &str = r"OldCafe;00:aa;-70;2412;[ESS];2023-01-02 03:04:05
garbage line without separators
Broken;00:bb;not-a-number;2412;[ESS];2023-01-02 03:04:05
Future;00:cc;-55;5180;[WPA3-SAE-CCMP][ESS];2023-01-02 03:04:05;SAFE;52.5;13.4;extra;fields

Semi\;Colon;00:dd;-66;2437;[WPA2-PSK-CCMP][ESS];2023-01-02 03:04:05;SAFE;0.0;0.0
";

#[test]
fn legacy_and_malformed_lines_are_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wifis_dataset.csv");
    fs::write(&path, LEGACY).unwrap();
    let store = NetworkStore::open(&path);

    let snapshot = store.snapshot().unwrap();
    assert_eq!(snapshot.records.len(), 3);
    assert_eq!(snapshot.skipped.len(), 2);

    let old = &snapshot.records[0];
    assert_eq!(old.label, RiskLabel::Dangerous);
    assert!(old.location.is_none());

    let future = &snapshot.records[1];
    assert_eq!(future.label, RiskLabel::Safe);
    assert!(future.location.is_some());

    assert_eq!(snapshot.records[2].ssid, "Semi;Colon");

    let keys = store.known_keys().unwrap();
    assert!(keys.contains("OldCafe:00:aa"));
    assert!(keys.contains("Semi;Colon:00:dd"));
    assert!(!keys.contains("Broken:00:bb"));
}

#[test]
fn deleting_one_record_keeps_the_rest_byte_for_byte() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wifis_dataset.csv");
    fs::write(&path, LEGACY).unwrap();
    let store = NetworkStore::open(&path);

    assert!(store.delete_one("OldCafe", "00:aa").unwrap());
    assert!(!store.delete_one("OldCafe", "00:aa").unwrap());

    let raw = fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("OldCafe"));
    assert!(raw.contains("Future;00:cc;-55;5180;[WPA3-SAE-CCMP][ESS];2023-01-02 03:04:05;SAFE;52.5;13.4;extra;fields\n"));
    assert_eq!(store.read_all().unwrap().len(), 2);

    // A fresh sighting of the deleted network is new again.
    let report = store
        .append_new(&[NetworkObservation::now("OldCafe", "00:aa", -60, 2412, "[ESS]")
            .into_record(RiskLabel::Dangerous)])
        .unwrap();
    assert_eq!(report.appended.len(), 1);
}

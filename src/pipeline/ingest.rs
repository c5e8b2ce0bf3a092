//! One scan batch through extraction, classification and merge.

#![allow(missing_docs)]

use serde::Serialize;

use crate::classifier::{ClassifierInput, RiskClassifier};
use crate::pipeline::dedup::{MergeOutcome, ObservationDeduplicator};
use crate::pipeline::records::{NetworkObservation, NetworkRecord};
use crate::platform::location::LocationProvider;

/// Counters for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub observed: usize,
    pub blank_dropped: usize,
    pub unique: usize,
    pub replaced: usize,
    pub dangerous: usize,
}

/// Deduplicated, classified output of one batch.
#[derive(Debug, Clone, Default)]
pub struct ProcessedBatch {
    pub records: Vec<NetworkRecord>,
    pub summary: BatchSummary,
}

impl ProcessedBatch {
    /// Records labeled DANGEROUS, ordered by SSID.
    #[must_use]
    pub fn dangerous(&self) -> Vec<NetworkRecord> {
        self.records
            .iter()
            .filter(|r| r.is_dangerous())
            .cloned()
            .collect()
    }
}

/// Classify every observation, then merge by SSID.
///
/// Each observation is fully labeled before it is offered to the merge, so a
/// record that wins the merge always carries its own label.
#[must_use]
pub fn process_batch(
    observations: Vec<NetworkObservation>,
    classifier: &dyn RiskClassifier,
    location: &dyn LocationProvider,
) -> ProcessedBatch {
    let mut summary = BatchSummary {
        observed: observations.len(),
        ..BatchSummary::default()
    };
    let fix = location.current();
    let mut dedup = ObservationDeduplicator::new();

    for mut obs in observations {
        if obs.has_blank_ssid() {
            summary.blank_dropped += 1;
            continue;
        }
        if obs.location.is_none() {
            obs.location = fix;
        }
        let label = classifier.classify(&ClassifierInput::from_observation(&obs));
        match dedup.offer(obs.into_record(label)) {
            MergeOutcome::Replaced => summary.replaced += 1,
            MergeOutcome::DroppedBlankSsid => summary.blank_dropped += 1,
            MergeOutcome::Inserted | MergeOutcome::Kept => {}
        }
    }

    let records = dedup.into_records();
    summary.unique = records.len();
    summary.dangerous = records.iter().filter(|r| r.is_dangerous()).count();
    ProcessedBatch { records, summary }
}

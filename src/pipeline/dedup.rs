//! In-batch merge of repeated sightings of the same SSID.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::pipeline::records::NetworkRecord;

/// Replacement needs a strictly larger gap than this, in dB.
pub const RSSI_REPLACE_MARGIN_DB: i32 = 5;

/// What happened to one offered record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Replaced,
    Kept,
    DroppedBlankSsid,
}

/// Canonical record per SSID for one scan batch.
#[derive(Debug, Default)]
pub struct ObservationDeduplicator {
    by_ssid: BTreeMap<String, NetworkRecord>,
}

impl ObservationDeduplicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one record.
    ///
    /// The incoming record replaces the stored one only when it is stronger
    /// by more than [`RSSI_REPLACE_MARGIN_DB`]; small fluctuations keep the
    /// first sighting.
    pub fn offer(&mut self, record: NetworkRecord) -> MergeOutcome {
        if record.ssid.trim().is_empty() {
            return MergeOutcome::DroppedBlankSsid;
        }
        match self.by_ssid.entry(record.ssid.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                MergeOutcome::Inserted
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get();
                let diff = existing.rssi.abs_diff(record.rssi);
                if diff > RSSI_REPLACE_MARGIN_DB.unsigned_abs() && record.rssi > existing.rssi {
                    slot.insert(record);
                    MergeOutcome::Replaced
                } else {
                    MergeOutcome::Kept
                }
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_ssid.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_ssid.is_empty()
    }

    /// Canonical records ordered by SSID.
    #[must_use]
    pub fn into_records(self) -> Vec<NetworkRecord> {
        self.by_ssid.into_values().collect()
    }
}

/// Merge a whole batch.
#[must_use]
pub fn deduplicate(records: impl IntoIterator<Item = NetworkRecord>) -> Vec<NetworkRecord> {
    let mut dedup = ObservationDeduplicator::new();
    for record in records {
        dedup.offer(record);
    }
    dedup.into_records()
}

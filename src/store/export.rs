//! JSON export of stored records.

#![allow(missing_docs)]

use std::path::Path;

use serde::Serialize;

use crate::core::errors::Result;
use crate::core::fsio::write_atomic;
use crate::pipeline::records::{NetworkRecord, RiskLabel};

const EXPORT_MODE: u32 = 0o644;

/// Export document: label counts up front, then every record.
#[derive(Debug, Serialize)]
pub struct ExportDocument<'a> {
    pub exported_at: String,
    pub total: usize,
    pub safe: usize,
    pub medium: usize,
    pub dangerous: usize,
    pub records: &'a [NetworkRecord],
}

impl<'a> ExportDocument<'a> {
    #[must_use]
    pub fn new(records: &'a [NetworkRecord]) -> Self {
        let count = |label: RiskLabel| records.iter().filter(|r| r.label == label).count();
        Self {
            exported_at: chrono::Local::now().to_rfc3339(),
            total: records.len(),
            safe: count(RiskLabel::Safe),
            medium: count(RiskLabel::Medium),
            dangerous: count(RiskLabel::Dangerous),
            records,
        }
    }
}

/// Write `records` as pretty JSON to `path`, replacing it atomically.
pub fn export_json(records: &[NetworkRecord], path: &Path) -> Result<usize> {
    let doc = ExportDocument::new(records);
    let mut bytes = serde_json::to_vec_pretty(&doc)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes, EXPORT_MODE)?;
    Ok(records.len())
}

//! Scan-batch pipeline: records, in-batch dedup, batch processing.

pub mod dedup;
pub mod ingest;
pub mod records;

//! Durable network dataset: line codec, append-only store, export.

pub mod export;
pub mod format;
pub mod network_store;

//! Dual-write activity logging: SQLite (WAL) + JSONL with graceful degradation.

pub mod dual;
pub mod jsonl;
#[cfg(feature = "sqlite")]
pub mod sqlite;

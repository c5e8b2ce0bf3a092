//! SQLite activity database: WAL mode, cached statements, retention pruning.
//!
//! Two tables: `activity_log` mirrors every JSONL entry for ad-hoc queries and
//! `scan_cycles` keeps one row per completed scan cycle for `wsn status`.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags, params};

use crate::classifier::rules::label_for_capabilities;
use crate::core::errors::{Result, WsnError};

pub struct SqliteLogger {
    conn: Connection,
    path: PathBuf,
}

impl SqliteLogger {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| WsnError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // `risk_label('[WEP][ESS]')` -> 'MEDIUM', for ad-hoc queries over logged details.
        conn.create_scalar_function(
            "risk_label",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let capabilities: String = ctx.get(0)?;
                Ok(label_for_capabilities(&capabilities).as_str())
            },
        )?;

        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ──────────────────── activity_log ────────────────────

    pub fn log_activity(&self, row: &ActivityRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO activity_log (
                timestamp, event_type, severity, origin, count, duration_ms,
                success, error_code, error_message, details
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            )?
            .execute(params![
                row.timestamp,
                row.event_type,
                row.severity,
                row.origin,
                row.count,
                row.duration_ms,
                row.success,
                row.error_code,
                row.error_message,
                row.details,
            ])?;
        Ok(())
    }

    /// Newest first.
    pub fn recent_activity(&self, limit: u32) -> Result<Vec<ActivityRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, event_type, severity, origin, count, duration_ms,
                    success, error_code, error_message, details
             FROM activity_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(ActivityRow {
                    timestamp: row.get(0)?,
                    event_type: row.get(1)?,
                    severity: row.get(2)?,
                    origin: row.get(3)?,
                    count: row.get(4)?,
                    duration_ms: row.get(5)?,
                    success: row.get(6)?,
                    error_code: row.get(7)?,
                    error_message: row.get(8)?,
                    details: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_events_since(&self, event_type: &str, since: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM activity_log WHERE event_type = ?1 AND timestamp >= ?2",
            params![event_type, since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ──────────────────── scan_cycles ────────────────────

    pub fn log_cycle(&self, row: &CycleRow) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO scan_cycles (
                timestamp, origin, observed, unique_count, persisted, dangerous, duration_ms
            ) VALUES (?1,?2,?3,?4,?5,?6,?7)",
            )?
            .execute(params![
                row.timestamp,
                row.origin,
                row.observed,
                row.unique_count,
                row.persisted,
                row.dangerous,
                row.duration_ms,
            ])?;
        Ok(())
    }

    /// Newest first.
    pub fn recent_cycles(&self, limit: u32) -> Result<Vec<CycleRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, origin, observed, unique_count, persisted, dangerous, duration_ms
             FROM scan_cycles ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(CycleRow {
                    timestamp: row.get(0)?,
                    origin: row.get(1)?,
                    observed: row.get(2)?,
                    unique_count: row.get(3)?,
                    persisted: row.get(4)?,
                    dangerous: row.get(5)?,
                    duration_ms: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `(cycles, persisted, dangerous)` summed since `since`.
    pub fn cycle_totals_since(&self, since: &str) -> Result<(i64, i64, i64)> {
        let totals = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(persisted), 0), COALESCE(SUM(dangerous), 0)
             FROM scan_cycles WHERE timestamp >= ?1",
            params![since],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(totals)
    }

    // ──────────────────── retention ────────────────────

    pub fn prune_activity_log(&self, retention_days: u32) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM activity_log WHERE timestamp < ?1",
            params![retention_cutoff(retention_days)],
        )?;
        Ok(deleted)
    }

    pub fn prune_scan_cycles(&self, retention_days: u32) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM scan_cycles WHERE timestamp < ?1",
            params![retention_cutoff(retention_days)],
        )?;
        Ok(deleted)
    }

    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .is_ok_and(|mode| mode.eq_ignore_ascii_case("wal"))
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

// ──────────────────── row types ────────────────────

#[derive(Debug, Clone, Default)]
pub struct ActivityRow {
    pub timestamp: String,
    pub event_type: String,
    pub severity: String,
    pub origin: Option<String>,
    /// Event-specific count: alert size, records rewritten, failures.
    pub count: Option<i64>,
    pub duration_ms: Option<i64>,
    pub success: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleRow {
    pub timestamp: String,
    pub origin: String,
    pub observed: i64,
    pub unique_count: i64,
    pub persisted: i64,
    pub dangerous: i64,
    pub duration_ms: i64,
}

fn retention_cutoff(retention_days: u32) -> String {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days));
    cutoff.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[WSN-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            origin TEXT,
            count INTEGER,
            duration_ms INTEGER,
            success INTEGER NOT NULL DEFAULT 1,
            error_code TEXT,
            error_message TEXT,
            details TEXT
        );

        CREATE TABLE IF NOT EXISTS scan_cycles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            origin TEXT NOT NULL,
            observed INTEGER NOT NULL,
            unique_count INTEGER NOT NULL,
            persisted INTEGER NOT NULL,
            dangerous INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_activity_type_time ON activity_log(event_type, timestamp);
        CREATE INDEX IF NOT EXISTS idx_cycles_timestamp ON scan_cycles(timestamp);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, SqliteLogger) {
        let dir = tempfile::tempdir().unwrap();
        let logger = SqliteLogger::open(&dir.path().join("activity.sqlite3")).unwrap();
        (dir, logger)
    }

    fn cycle(ts: &str, persisted: i64, dangerous: i64) -> CycleRow {
        CycleRow {
            timestamp: ts.to_string(),
            origin: "job".to_string(),
            observed: 12,
            unique_count: 9,
            persisted,
            dangerous,
            duration_ms: 3100,
        }
    }

    #[test]
    fn schema_created_and_wal_active() {
        let (_dir, logger) = temp_db();
        assert!(logger.is_wal_mode());
    }

    #[test]
    fn activity_round_trip_newest_first() {
        let (_dir, logger) = temp_db();
        for (i, event) in ["daemon_start", "alert_raised"].iter().enumerate() {
            logger
                .log_activity(&ActivityRow {
                    timestamp: format!("2026-03-01T10:0{i}:00.000Z"),
                    event_type: (*event).to_string(),
                    severity: "info".to_string(),
                    count: Some(3),
                    success: 1,
                    ..ActivityRow::default()
                })
                .unwrap();
        }
        let rows = logger.recent_activity(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].event_type, "alert_raised");
        assert_eq!(rows[0].count, Some(3));
        assert_eq!(
            logger
                .count_events_since("alert_raised", "2026-01-01T00:00:00Z")
                .unwrap(),
            1
        );
    }

    #[test]
    fn cycle_totals_sum_persisted_and_dangerous() {
        let (_dir, logger) = temp_db();
        logger.log_cycle(&cycle("2026-03-01T10:00:00.000Z", 4, 1)).unwrap();
        logger.log_cycle(&cycle("2026-03-01T10:15:00.000Z", 2, 2)).unwrap();
        logger.log_cycle(&cycle("2025-01-01T00:00:00.000Z", 50, 50)).unwrap();

        assert_eq!(
            logger.cycle_totals_since("2026-01-01T00:00:00Z").unwrap(),
            (2, 6, 3)
        );
        let recent = logger.recent_cycles(1).unwrap();
        assert_eq!(recent[0], cycle("2025-01-01T00:00:00.000Z", 50, 50));
    }

    #[test]
    fn prune_drops_only_old_rows() {
        let (_dir, logger) = temp_db();
        logger.log_cycle(&cycle("2000-01-01T00:00:00.000Z", 1, 0)).unwrap();
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        logger.log_cycle(&cycle(&now, 1, 0)).unwrap();
        assert_eq!(logger.prune_scan_cycles(30).unwrap(), 1);
        assert_eq!(logger.recent_cycles(10).unwrap().len(), 1);
        assert_eq!(logger.prune_activity_log(30).unwrap(), 0);
    }

    #[test]
    fn risk_label_function_matches_rules() {
        let (_dir, logger) = temp_db();
        let label: String = logger
            .connection()
            .query_row("SELECT risk_label('[WEP][ESS]')", [], |row| row.get(0))
            .unwrap();
        assert_eq!(label, "MEDIUM");
        let label: String = logger
            .connection()
            .query_row("SELECT risk_label('')", [], |row| row.get(0))
            .unwrap();
        assert_eq!(label, "DANGEROUS");
    }

    #[test]
    fn reopening_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twice.sqlite3");
        drop(SqliteLogger::open(&path).unwrap());
        let logger = SqliteLogger::open(&path).unwrap();
        assert!(logger.is_wal_mode());
        assert_eq!(logger.path(), path);
    }
}

//! Append-only dataset of every network ever persisted, keyed by `ssid:bssid`.
//!
//! Writers are serialized twice: a `parking_lot` mutex inside the process and
//! an advisory `flock` on a sidecar `.lock` file across processes, so a live
//! `watch` session and a timer-driven `job` can share one file.
//!
//! The known-key index lives as long as the store. Each call stats the file
//! and indexes only bytes appended since the last look. A full rebuild
//! happens when the file shrank, changed inode, changed mtime without
//! growing, or grew while the head or tail of the already indexed prefix no
//! longer reads the same (someone rewrote it in place).

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Serialize;

use crate::core::errors::{Result, WsnError};
use crate::core::fsio::write_atomic;
use crate::pipeline::records::{NetworkRecord, RiskLabel, record_key};
use crate::store::format::{LineError, decode_key, decode_line, encode_line};

const DATASET_MODE: u32 = 0o644;

/// Bytes sampled at each end of the indexed prefix.
const ANCHOR_LEN: u64 = 256;

/// Outcome of [`NetworkStore::append_new`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppendReport {
    /// Keys written by this call, in input order.
    pub appended: Vec<String>,
    /// Records skipped because the key was already stored or repeated in the batch.
    pub already_known: usize,
}

/// Parsed file contents plus what had to be skipped.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub records: Vec<NetworkRecord>,
    /// `(1-based line number, reason)` for every rejected line.
    pub skipped: Vec<(usize, LineError)>,
}

/// Viewer-side filter: SSID substring (case-insensitive) and exact label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreQuery {
    pub ssid_contains: Option<String>,
    pub label: Option<RiskLabel>,
}

impl StoreQuery {
    #[must_use]
    pub fn matches(&self, record: &NetworkRecord) -> bool {
        let ssid_ok = self.ssid_contains.as_deref().is_none_or(|needle| {
            record
                .ssid
                .to_lowercase()
                .contains(&needle.to_lowercase())
        });
        let label_ok = self.label.is_none_or(|label| record.label == label);
        ssid_ok && label_ok
    }
}

#[derive(Debug, Default)]
struct KeyIndex {
    keys: HashSet<String>,
    indexed_bytes: u64,
    file_id: Option<FileId>,
    modified: Option<SystemTime>,
    /// First and last `ANCHOR_LEN` bytes of `[0, indexed_bytes)`.
    head: Vec<u8>,
    tail: Vec<u8>,
}

impl KeyIndex {
    fn reset(&mut self) {
        self.keys.clear();
        self.indexed_bytes = 0;
        self.file_id = None;
        self.modified = None;
        self.head.clear();
        self.tail.clear();
    }

    fn tail_offset(&self) -> u64 {
        self.indexed_bytes.saturating_sub(ANCHOR_LEN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
}

impl FileId {
    #[cfg(unix)]
    fn of(meta: &fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt as _;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(_meta: &fs::Metadata) -> Self {
        Self {}
    }
}

/// Durable network dataset backed by a semicolon-delimited file.
#[derive(Debug)]
pub struct NetworkStore {
    path: PathBuf,
    lock_path: PathBuf,
    index: Mutex<KeyIndex>,
}

impl NetworkStore {
    /// Open a store at `path`. No IO happens until the first operation.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self {
            path,
            lock_path,
            index: Mutex::new(KeyIndex::default()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keys of every well-formed line currently in the file.
    pub fn known_keys(&self) -> Result<HashSet<String>> {
        let mut index = self.index.lock();
        self.refresh_index(&mut index)?;
        Ok(index.keys.clone())
    }

    /// Whether a `(ssid, bssid)` pair is already stored.
    pub fn contains(&self, ssid: &str, bssid: &str) -> Result<bool> {
        let mut index = self.index.lock();
        self.refresh_index(&mut index)?;
        Ok(index.keys.contains(&record_key(ssid, bssid)))
    }

    /// Every parseable record; malformed lines are logged and skipped.
    pub fn read_all(&self) -> Result<Vec<NetworkRecord>> {
        let snapshot = self.snapshot()?;
        for (line_no, reason) in &snapshot.skipped {
            eprintln!(
                "[WSN-STORE] skipping malformed line {line_no} in {}: {reason}",
                self.path.display()
            );
        }
        Ok(snapshot.records)
    }

    /// Every parseable record plus the reasons other lines were rejected.
    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        let Some(raw) = self.read_text()? else {
            return Ok(StoreSnapshot::default());
        };
        let mut snapshot = StoreSnapshot::default();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match decode_line(line) {
                Ok(record) => snapshot.records.push(record),
                Err(reason) => snapshot.skipped.push((idx + 1, reason)),
            }
        }
        Ok(snapshot)
    }

    /// Filtered view over [`Self::read_all`].
    pub fn query(&self, query: &StoreQuery) -> Result<Vec<NetworkRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|record| query.matches(record))
            .collect())
    }

    /// Append records whose key is not yet stored. Existing lines are never touched.
    pub fn append_new(&self, records: &[NetworkRecord]) -> Result<AppendReport> {
        let mut index = self.index.lock();
        let _file_lock = self.lock_file()?;
        self.refresh_index(&mut index)?;
        // With the writer lock held, a torn final line is not still being
        // written, so its key counts as stored.
        self.index_partial_tail(&mut index)?;

        let mut report = AppendReport::default();
        let mut batch = String::new();
        for record in records {
            let key = record.key();
            if index.keys.contains(&key) || report.appended.contains(&key) {
                report.already_known += 1;
                continue;
            }
            batch.push_str(&encode_line(record));
            batch.push('\n');
            report.appended.push(key);
        }
        if report.appended.is_empty() {
            return Ok(report);
        }

        let result = self.append_bytes(batch.as_bytes());
        match result {
            Ok(meta) => {
                index.keys.extend(report.appended.iter().cloned());
                index.indexed_bytes = meta.len();
                index.file_id = Some(FileId::of(&meta));
                index.modified = meta.modified().ok();
                if self.capture_anchors(&mut index).is_err() {
                    index.reset();
                }
                Ok(report)
            }
            Err(err) => {
                // Part of the batch may have landed; rebuild from disk next time.
                index.reset();
                Err(err)
            }
        }
    }

    /// Remove the record stored under `(ssid, bssid)`. Returns whether one existed.
    pub fn delete_one(&self, ssid: &str, bssid: &str) -> Result<bool> {
        let mut index = self.index.lock();
        let _file_lock = self.lock_file()?;

        let Some(raw) = self.read_text()? else {
            index.reset();
            return Ok(false);
        };
        let mut removed = false;
        let mut kept = String::with_capacity(raw.len());
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            // Compare fields, not the joined key: `ssid:bssid` is ambiguous
            // when the SSID itself holds a colon.
            if decode_line(line).is_ok_and(|r| r.ssid == ssid && r.bssid == bssid) {
                removed = true;
                continue;
            }
            kept.push_str(line);
            kept.push('\n');
        }
        if !removed {
            return Ok(false);
        }

        self.rewrite(&mut index, kept.as_bytes())?;
        Ok(true)
    }

    /// Remove every record. Returns how many parseable records were dropped.
    pub fn clear_all(&self) -> Result<usize> {
        let mut index = self.index.lock();
        let _file_lock = self.lock_file()?;
        let dropped = self
            .read_text()?
            .map_or(0, |raw| raw.lines().filter(|l| decode_line(l).is_ok()).count());
        self.rewrite(&mut index, b"")?;
        Ok(dropped)
    }

    fn rewrite(&self, index: &mut KeyIndex, bytes: &[u8]) -> Result<()> {
        if let Err(err) = write_atomic(&self.path, bytes, DATASET_MODE) {
            index.reset();
            return Err(err);
        }
        index.reset();
        self.refresh_index(index)
    }

    fn append_bytes(&self, batch: &[u8]) -> Result<fs::Metadata> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| WsnError::io(parent, source))?;
        }
        let mut opts = OpenOptions::new();
        opts.create(true).read(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            opts.mode(DATASET_MODE);
        }
        let mut file = opts
            .open(&self.path)
            .map_err(|source| WsnError::io(&self.path, source))?;

        // A crash mid-write can leave a final line without its newline.
        // Terminate it so the new rows start on a line of their own.
        let write = |file: &mut File| -> std::io::Result<()> {
            if ends_unterminated(file)? {
                file.write_all(b"\n")?;
            }
            file.write_all(batch)?;
            file.sync_data()
        };
        write(&mut file).map_err(|source| WsnError::io(&self.path, source))?;
        file.metadata()
            .map_err(|source| WsnError::io(&self.path, source))
    }

    /// Index the key of a final line that has no newline yet.
    fn index_partial_tail(&self, index: &mut KeyIndex) -> Result<()> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(WsnError::io(&self.path, source)),
        };
        let mut tail = Vec::new();
        file.seek(SeekFrom::Start(index.indexed_bytes))
            .and_then(|_| file.read_to_end(&mut tail))
            .map_err(|source| WsnError::io(&self.path, source))?;
        if tail.is_empty() || memchr::memchr(b'\n', &tail).is_some() {
            return Ok(());
        }
        if let Some(key) = decode_key(&String::from_utf8_lossy(&tail)) {
            index.keys.insert(key);
        }
        Ok(())
    }

    fn read_text(&self) -> Result<Option<String>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(WsnError::io(&self.path, source)),
        }
    }

    fn refresh_index(&self, index: &mut KeyIndex) -> Result<()> {
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                index.reset();
                return Ok(());
            }
            Err(source) => return Err(WsnError::io(&self.path, source)),
        };

        let id = FileId::of(&meta);
        let modified = meta.modified().ok();
        let len = meta.len();
        let stale = if index.file_id != Some(id) || len < index.indexed_bytes {
            true
        } else if len == index.indexed_bytes {
            // Same size but touched: rewritten, since appends always grow.
            index.modified != modified
        } else {
            !self.prefix_intact(index)?
        };
        if stale {
            index.reset();
        }
        index.file_id = Some(id);
        index.modified = modified;
        if len == index.indexed_bytes {
            return Ok(());
        }

        let mut file = File::open(&self.path).map_err(|source| WsnError::io(&self.path, source))?;
        let mut tail = Vec::new();
        file.seek(SeekFrom::Start(index.indexed_bytes))
            .and_then(|_| file.read_to_end(&mut tail))
            .map_err(|source| WsnError::io(&self.path, source))?;

        // Only whole lines; an unterminated tail is picked up once completed.
        let complete = memchr::memrchr(b'\n', &tail).map_or(0, |pos| pos + 1);
        for line in tail[..complete].split(|byte| *byte == b'\n') {
            if line.is_empty() {
                continue;
            }
            if let Some(key) = decode_key(&String::from_utf8_lossy(line)) {
                index.keys.insert(key);
            }
        }
        index.indexed_bytes += complete as u64;
        self.capture_anchors(index)
    }

    /// Whether the indexed prefix still starts and ends with the sampled bytes.
    fn prefix_intact(&self, index: &KeyIndex) -> Result<bool> {
        if index.indexed_bytes == 0 {
            return Ok(true);
        }
        let mut file = File::open(&self.path).map_err(|source| WsnError::io(&self.path, source))?;
        let head = read_window(&mut file, 0, index.head.len())
            .map_err(|source| WsnError::io(&self.path, source))?;
        let tail = read_window(&mut file, index.tail_offset(), index.tail.len())
            .map_err(|source| WsnError::io(&self.path, source))?;
        Ok(head == index.head && tail == index.tail)
    }

    fn capture_anchors(&self, index: &mut KeyIndex) -> Result<()> {
        if index.indexed_bytes == 0 {
            index.head.clear();
            index.tail.clear();
            return Ok(());
        }
        let mut file = File::open(&self.path).map_err(|source| WsnError::io(&self.path, source))?;
        let span = usize::try_from(index.indexed_bytes.min(ANCHOR_LEN)).unwrap_or(0);
        index.head = read_window(&mut file, 0, span)
            .map_err(|source| WsnError::io(&self.path, source))?;
        index.tail = read_window(&mut file, index.tail_offset(), span)
            .map_err(|source| WsnError::io(&self.path, source))?;
        Ok(())
    }

    #[cfg(unix)]
    fn lock_file(&self) -> Result<nix::fcntl::Flock<File>> {
        use nix::fcntl::{Flock, FlockArg};

        if let Some(parent) = self.lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| WsnError::io(parent, source))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|source| WsnError::io(&self.lock_path, source))?;
        Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            WsnError::io(&self.lock_path, std::io::Error::from(errno))
        })
    }

    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps)]
    fn lock_file(&self) -> Result<()> {
        Ok(())
    }
}

/// Up to `len` bytes starting at `offset`; shorter if the file ends first.
fn read_window(file: &mut File, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len);
    file.seek(SeekFrom::Start(offset))?;
    Read::by_ref(file).take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Whether a non-empty file lacks a trailing newline.
fn ends_unterminated(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0_u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

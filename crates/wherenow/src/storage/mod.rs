//! Storage layer for wherenow.
//!
//! The location log is a single JSON Lines file. Records are appended under
//! an exclusive advisory lock, read back newest-first with a backward tail
//! scan, and patched in place by rewriting the file through a scratch copy.
//!
//! Readers never take the lock. A read that overlaps a patch's
//! truncate-and-copy window can observe a shortened file; callers accept this
//! and retry if they care. A writer that never releases the lock blocks every
//! later append and patch; there is no timeout.

pub mod lock;
pub mod tail;

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::record::{now_iso8601, LocationRecord, RecordPatch, DEFAULT_REASON};

pub use lock::LockedFile;
pub use tail::TailScan;

/// Number of entries returned when no usable limit is given.
pub const DEFAULT_LIST_LIMIT: usize = 200;

/// Upper bound on the number of entries returned by one read.
pub const MAX_LIST_LIMIT: usize = 200;

/// Clamp a requested list size: absent, zero or negative means the default,
/// anything above the maximum is capped.
#[must_use]
pub fn clamp_limit(requested: Option<i64>) -> usize {
    match requested {
        Some(n) if n > 0 => usize::try_from(n).map_or(MAX_LIST_LIMIT, |n| n.min(MAX_LIST_LIMIT)),
        _ => DEFAULT_LIST_LIMIT,
    }
}

/// The public projection of a stored line, as returned by the read path.
///
/// Values are copied from the stored JSON; missing fields become `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentEntry {
    /// Stored identifier; absent for lines written before ids existed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Latitude.
    pub lat: Value,
    /// Longitude.
    pub lon: Value,
    /// Client timestamp.
    pub timestamp: Value,
    /// Accuracy in metres.
    pub accuracy: Value,
    /// Label.
    pub label: Value,
    /// Note.
    pub note: Value,
    /// Category.
    pub category: Value,
    /// Effective reason; always `upload` for returned entries.
    pub reason: String,
}

impl RecentEntry {
    /// Project one stored line, or `None` if it should not be listed.
    ///
    /// Lines that are blank, are not JSON objects, or carry a reason other
    /// than `upload` are skipped. A missing or `null` reason counts as
    /// `upload`.
    #[must_use]
    pub fn from_line(line: &[u8]) -> Option<Self> {
        let Ok(mut entry) = serde_json::from_slice::<Map<String, Value>>(line) else {
            return None;
        };

        match entry.get("reason") {
            None | Some(Value::Null) => {}
            Some(Value::String(reason)) if reason == DEFAULT_REASON => {}
            Some(_) => return None,
        }

        let mut take = |key: &str| entry.remove(key).unwrap_or(Value::Null);
        let id = Some(take("id")).filter(|id| !id.is_null());
        Some(Self {
            id,
            lat: take("lat"),
            lon: take("lon"),
            timestamp: take("timestamp"),
            accuracy: take("accuracy"),
            label: take("label"),
            note: take("note"),
            category: take("category"),
            reason: DEFAULT_REASON.to_string(),
        })
    }
}

/// Handle on the JSON Lines location log.
#[derive(Debug, Clone)]
pub struct LocationLog {
    /// Path to the log file.
    path: PathBuf,
}

impl LocationLog {
    /// Prepare a log at the given path.
    ///
    /// Creates the parent directories if they don't exist. The file itself is
    /// created by the first append.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        info!("Location log at {}", path.display());
        Ok(Self { path })
    }

    /// Get the path to the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line.
    ///
    /// The line is written with one `write_all` under the exclusive lock. A
    /// crash mid-write can leave a partial last line, which readers skip.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded, or the log cannot be
    /// opened, locked or written.
    pub fn append(&self, record: &LocationRecord) -> Result<()> {
        let line = record.to_line()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.open_error(source))?;
        let locked = LockedFile::acquire(file).map_err(|source| self.lock_error(source))?;

        let mut file = locked.file();
        file.write_all(&line).map_err(Error::LogWrite)?;
        file.flush().map_err(Error::LogWrite)?;
        drop(locked);

        debug!(id = %record.id, bytes = line.len(), "appended location");
        Ok(())
    }

    /// Read up to `limit` upload entries, newest first.
    ///
    /// Takes no lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the log does not exist, cannot be opened, or a
    /// read fails part-way.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<RecentEntry>> {
        std::fs::metadata(&self.path).map_err(|source| Error::LogNotReadable {
            path: self.path.clone(),
            source,
        })?;
        let file = File::open(&self.path).map_err(|source| self.open_error(source))?;

        let mut entries = Vec::new();
        if limit == 0 {
            return Ok(entries);
        }
        for line in TailScan::new(file).map_err(Error::LogRead)? {
            if let Some(entry) = RecentEntry::from_line(&line.map_err(Error::LogRead)?) {
                entries.push(entry);
                if entries.len() >= limit {
                    break;
                }
            }
        }

        debug!(limit, returned = entries.len(), "listed recent locations");
        Ok(entries)
    }

    /// Update label, note and category of the first record with the patch's id.
    ///
    /// The whole file is copied line by line into a scratch file next to it,
    /// with the matching line replaced; the log is then truncated and the
    /// scratch copy written back. The exclusive lock is held throughout and
    /// the scratch file is removed on every exit path. Returns the rewritten
    /// entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdNotFound`] if no line carries the id (the log is left
    /// untouched), or an I/O error for any failed step.
    pub fn patch(&self, patch: &RecordPatch) -> Result<Map<String, Value>> {
        let file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::IdNotFound {
                    id: patch.id.clone(),
                })
            }
            Err(source) => return Err(self.open_error(source)),
        };
        let locked = LockedFile::acquire(file).map_err(|source| self.lock_error(source))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut scratch = NamedTempFile::new_in(dir).map_err(Error::TempFile)?;

        let updated_at = now_iso8601();
        let (updated, written) = rewrite(locked.file(), scratch.as_file_mut(), patch, &updated_at)?;
        let Some((line_no, entry)) = updated else {
            debug!(id = %patch.id, "patch target not found");
            return Err(Error::IdNotFound {
                id: patch.id.clone(),
            });
        };

        let mut log = locked.file();
        log.set_len(0).map_err(Error::LogTruncate)?;
        log.seek(SeekFrom::Start(0)).map_err(Error::LogTruncate)?;

        let source = scratch.as_file_mut();
        source.seek(SeekFrom::Start(0)).map_err(Error::TempFile)?;
        let copied = io::copy(source, &mut log).map_err(|err| Error::log_copy(err.to_string()))?;
        if copied != written {
            return Err(Error::log_copy(format!(
                "copied {copied} of {written} bytes"
            )));
        }
        log.sync_data()
            .map_err(|err| Error::log_copy(err.to_string()))?;

        drop(locked);
        info!(id = %patch.id, line = line_no, "patched location");
        Ok(entry)
    }

    fn open_error(&self, source: io::Error) -> Error {
        Error::LogOpen {
            path: self.path.clone(),
            source,
        }
    }

    fn lock_error(&self, source: io::Error) -> Error {
        Error::LogLock {
            path: self.path.clone(),
            source,
        }
    }
}

/// The first matched line (1-based) with its rewritten entry, if any.
type Rewritten = Option<(usize, Map<String, Value>)>;

/// Copy `log` into `scratch`, replacing the first line whose id matches.
///
/// Returns the match and the number of bytes written.
fn rewrite(
    log: &File,
    scratch: &mut File,
    patch: &RecordPatch,
    updated_at: &str,
) -> Result<(Rewritten, u64)> {
    let mut reader = BufReader::new(log);
    let mut writer = BufWriter::new(scratch);
    let mut updated: Rewritten = None;
    let mut written = 0_u64;
    let mut line = Vec::new();
    let mut line_no = 0;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).map_err(Error::LogRead)? == 0 {
            break;
        }
        line_no += 1;

        let replacement = if updated.is_none() {
            patched_entry(&line, patch, updated_at)
        } else {
            None
        };

        let bytes = match replacement {
            Some(entry) => {
                let mut out = serde_json::to_vec(&entry)?;
                out.push(b'\n');
                updated = Some((line_no, entry));
                out
            }
            None => std::mem::take(&mut line),
        };
        writer.write_all(&bytes).map_err(Error::TempFile)?;
        written += bytes.len() as u64;
        line = bytes;
    }

    writer.flush().map_err(Error::TempFile)?;
    Ok((updated, written))
}

/// The patched form of `line` if it is the patch target.
fn patched_entry(line: &[u8], patch: &RecordPatch, updated_at: &str) -> Option<Map<String, Value>> {
    let mut entry = serde_json::from_slice::<Map<String, Value>>(line).ok()?;
    if !patch.matches(&entry) {
        return None;
    }
    patch.apply(&mut entry, updated_at);
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NewLocation;
    use serde_json::json;
    use tempfile::TempDir;

    const ID: &str = "123e4567-e89b-42d3-a456-426614174000";

    fn create_test_log() -> (LocationLog, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = LocationLog::open(dir.path().join("locations.jsonl")).unwrap();
        (log, dir)
    }

    fn uuid(n: u32) -> String {
        format!("00000000-0000-4000-8000-{n:012x}")
    }

    fn record(id: &str, lat: f64, body: serde_json::Value) -> LocationRecord {
        let mut json = json!({"lat": lat, "lon": 10.0, "id": id});
        for (k, v) in body.as_object().unwrap() {
            json[k] = v.clone();
        }
        NewLocation::from_json(&json)
            .unwrap()
            .into_record(Some("test-agent".to_string()), "2024-05-01T12:00:00+00:00")
    }

    fn patch(body: serde_json::Value) -> RecordPatch {
        RecordPatch::from_json(&body).unwrap()
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), 200);
        assert_eq!(clamp_limit(Some(0)), 200);
        assert_eq!(clamp_limit(Some(-5)), 200);
        assert_eq!(clamp_limit(Some(1)), 1);
        assert_eq!(clamp_limit(Some(200)), 200);
        assert_eq!(clamp_limit(Some(10_000)), 200);
        assert_eq!(clamp_limit(Some(i64::MAX)), 200);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/locations.jsonl");

        let log = LocationLog::open(&path).unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert!(!path.exists());
        assert_eq!(log.path(), path);
    }

    #[test]
    fn test_list_missing_file_is_not_readable() {
        let (log, _dir) = create_test_log();
        let err = log.list_recent(10).unwrap_err();
        assert_eq!(err.code(), "log_not_readable");
    }

    #[test]
    fn test_append_then_list() {
        let (log, _dir) = create_test_log();
        log.append(&record(ID, 37.5, json!({"lon": -122.3}))).unwrap();

        let entries = log.list_recent(200).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, Some(json!(ID)));
        assert_eq!(entries[0].lat, json!(37.5));
        assert_eq!(entries[0].lon, json!(-122.3));
        assert_eq!(entries[0].reason, "upload");
    }

    #[test]
    fn test_list_newest_first_across_chunks() {
        let (log, _dir) = create_test_log();
        // Long notes push the file well past one chunk
        let note = "n".repeat(400);
        for i in 0..40 {
            log.append(&record(&uuid(i), f64::from(i), json!({"note": note})))
                .unwrap();
        }

        let entries = log.list_recent(40).unwrap();
        let lats: Vec<f64> = entries.iter().map(|e| e.lat.as_f64().unwrap()).collect();
        let expected: Vec<f64> = (0..40).rev().map(f64::from).collect();
        assert_eq!(lats, expected);
    }

    #[test]
    fn test_list_respects_limit() {
        let (log, _dir) = create_test_log();
        for i in 0..5 {
            log.append(&record(&uuid(i), f64::from(i), json!({}))).unwrap();
        }

        let entries = log.list_recent(2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].lat, json!(4.0));
        assert_eq!(entries[1].lat, json!(3.0));
    }

    #[test]
    fn test_list_filters_reasons() {
        let (log, _dir) = create_test_log();
        log.append(&record(&uuid(1), 1.0, json!({}))).unwrap();
        log.append(&record(&uuid(2), 2.0, json!({"reason": "debug"})))
            .unwrap();
        log.append(&record(&uuid(3), 3.0, json!({"reason": "upload"})))
            .unwrap();

        let entries = log.list_recent(10).unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.id.clone().unwrap()).collect();
        assert_eq!(ids, vec![json!(uuid(3)), json!(uuid(1))]);
    }

    #[test]
    fn test_list_skips_garbage_and_keeps_legacy_lines() {
        let (log, _dir) = create_test_log();
        std::fs::write(
            log.path(),
            concat!(
                "{\"lat\":1.0,\"lon\":2.0,\"timestamp\":\"t0\",\"accuracy\":null,\"reason\":null}\n",
                "not json\n",
                "[1,2,3]\n",
                "\n",
                "{\"lat\":3.0,\"lon\":4.0,\"reason\":7}\n",
                "{\"lat\":5.0,\"lon\":6.0,\"timest"
            ),
        )
        .unwrap();

        let entries = log.list_recent(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, None);
        assert_eq!(entries[0].timestamp, json!("t0"));
        assert_eq!(entries[0].label, Value::Null);
    }

    #[test]
    fn test_list_empty_file() {
        let (log, _dir) = create_test_log();
        std::fs::write(log.path(), "").unwrap();
        assert!(log.list_recent(10).unwrap().is_empty());
    }

    #[test]
    fn test_recent_entry_serialization_omits_missing_id() {
        let entry = RecentEntry::from_line(br#"{"lat":1,"lon":2}"#).unwrap();
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["reason"], "upload");
        assert_eq!(json["accuracy"], Value::Null);
    }

    #[test]
    fn test_patch_updates_only_matching_line() {
        let (log, _dir) = create_test_log();
        log.append(&record(&uuid(1), 1.0, json!({"label": "One"}))).unwrap();
        log.append(&record(ID, 2.0, json!({"note": "keep", "category": "cat"})))
            .unwrap();
        log.append(&record(&uuid(3), 3.0, json!({}))).unwrap();
        let before = std::fs::read_to_string(log.path()).unwrap();

        let entry = log
            .patch(&patch(json!({
                "id": "123E4567-E89B-42D3-A456-426614174000",
                "label": "Home",
                "category": null
            })))
            .unwrap();
        assert_eq!(entry["label"], "Home");
        assert_eq!(entry["note"], "keep");
        assert_eq!(entry["category"], Value::Null);
        assert!(entry["updatedAt"].is_string());

        let after = std::fs::read_to_string(log.path()).unwrap();
        let before_lines: Vec<&str> = before.lines().collect();
        let after_lines: Vec<&str> = after.lines().collect();
        assert_eq!(after_lines.len(), 3);
        assert_eq!(after_lines[0], before_lines[0]);
        assert_eq!(after_lines[2], before_lines[2]);

        let patched: Value = serde_json::from_str(after_lines[1]).unwrap();
        assert_eq!(patched["id"], ID);
        assert_eq!(patched["lat"], json!(2.0));
        assert_eq!(patched["ua"], "test-agent");
        assert_eq!(patched["receivedAt"], "2024-05-01T12:00:00+00:00");
        assert_eq!(patched["label"], "Home");
        // Key order is preserved, updatedAt goes last
        assert!(after_lines[1].starts_with(&format!("{{\"id\":\"{ID}\",\"lat\":2.0")));
        assert!(after_lines[1].contains("\"updatedAt\""));
    }

    #[test]
    fn test_patch_only_first_duplicate() {
        let (log, _dir) = create_test_log();
        log.append(&record(ID, 1.0, json!({}))).unwrap();
        log.append(&record(ID, 2.0, json!({}))).unwrap();

        log.patch(&patch(json!({"id": ID, "label": "first"}))).unwrap();

        let lines: Vec<Value> = std::fs::read_to_string(log.path())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0]["label"], "first");
        assert_eq!(lines[1]["label"], Value::Null);
    }

    #[test]
    fn test_patch_is_idempotent() {
        let (log, _dir) = create_test_log();
        log.append(&record(&uuid(1), 1.0, json!({}))).unwrap();
        log.append(&record(ID, 2.0, json!({}))).unwrap();
        let body = json!({"id": ID, "label": "L", "note": "N", "category": "C"});

        log.patch(&patch(body.clone())).unwrap();
        let strip = |text: String| -> Vec<Value> {
            text.lines()
                .map(|l| {
                    let mut v: Value = serde_json::from_str(l).unwrap();
                    v.as_object_mut().unwrap().remove("updatedAt");
                    v
                })
                .collect()
        };
        let first = strip(std::fs::read_to_string(log.path()).unwrap());

        log.patch(&patch(body)).unwrap();
        let second = strip(std::fs::read_to_string(log.path()).unwrap());

        assert_eq!(first, second);
        assert_eq!(second.len(), 2);
        assert_eq!(second[1]["id"], ID);
    }

    #[test]
    fn test_patch_unknown_id_leaves_file_unchanged() {
        let (log, dir) = create_test_log();
        log.append(&record(&uuid(1), 1.0, json!({}))).unwrap();
        let before = std::fs::read(log.path()).unwrap();

        let err = log
            .patch(&patch(json!({"id": ID, "label": "x"})))
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(std::fs::read(log.path()).unwrap(), before);

        // No scratch file left behind
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_patch_missing_log_is_not_found() {
        let (log, _dir) = create_test_log();
        let err = log
            .patch(&patch(json!({"id": ID, "label": "x"})))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!log.path().exists());
    }

    #[test]
    fn test_patch_removes_scratch_file() {
        let (log, dir) = create_test_log();
        log.append(&record(ID, 1.0, json!({}))).unwrap();
        log.patch(&patch(json!({"id": ID, "note": "n"}))).unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_patch_keeps_unparseable_lines() {
        let (log, _dir) = create_test_log();
        std::fs::write(log.path(), "garbage\n").unwrap();
        log.append(&record(ID, 1.0, json!({}))).unwrap();

        log.patch(&patch(json!({"id": ID, "label": "x"}))).unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        assert!(text.starts_with("garbage\n"));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_appends_from_many_threads_stay_line_delimited() {
        let (log, _dir) = create_test_log();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let id = uuid(t * 100 + i);
                        log.append(&record(&id, 1.0, json!({"note": "x".repeat(300)})))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let text = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(text.lines().count(), 200);
        for line in text.lines() {
            serde_json::from_str::<Value>(line).unwrap();
        }
    }
}

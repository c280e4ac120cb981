//! Append-only JSONL progress log.
//!
//! Each entry is a single line of JSON terminated by `\n`, so a partial write
//! from a crash is detectable: on open, anything after the last well-formed
//! line is truncated away before new entries are appended.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::types::ProgressEntry;

#[derive(Debug, Error)]
pub enum ProgressLogError {
    #[error("progress log i/o on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serialize progress entry: {0}")]
    Json(#[from] serde_json::Error),
    #[error("iteration {iteration} does not follow last logged iteration {last}")]
    NonMonotonic { iteration: u32, last: u32 },
}

impl ProgressLogError {
    fn io(path: &Path, source: io::Error) -> Self {
        ProgressLogError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Handle to the progress log file.
#[derive(Debug)]
pub struct ProgressLog {
    path: PathBuf,
    file: File,
    last_iteration: u32,
    len: usize,
}

impl ProgressLog {
    /// Open (creating if missing) and recover the log at `path`.
    pub fn open(path: &Path) -> Result<Self, ProgressLogError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| ProgressLogError::io(parent, err))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|err| ProgressLogError::io(path, err))?;

        let bytes = fs::read(path).map_err(|err| ProgressLogError::io(path, err))?;
        let scan = scan_entries(&bytes);
        if scan.valid_len < bytes.len() {
            warn!(
                path = %path.display(),
                valid_entries = scan.entries.len(),
                dropped_bytes = bytes.len() - scan.valid_len,
                "truncating progress log to last well-formed entry"
            );
            file.set_len(scan.valid_len as u64)
                .map_err(|err| ProgressLogError::io(path, err))?;
            file.sync_all().map_err(|err| ProgressLogError::io(path, err))?;
        }

        let last_iteration = scan.entries.last().map_or(0, |entry| entry.iteration);
        debug!(
            path = %path.display(),
            entries = scan.entries.len(),
            last_iteration,
            "progress log opened"
        );
        Ok(Self {
            path: path.to_path_buf(),
            file,
            last_iteration,
            len: scan.entries.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iteration number of the newest entry, or 0 for an empty log.
    pub fn last_iteration(&self) -> u32 {
        self.last_iteration
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append one entry and sync it to disk before returning.
    pub fn append(&mut self, entry: &ProgressEntry) -> Result<(), ProgressLogError> {
        if entry.iteration <= self.last_iteration {
            return Err(ProgressLogError::NonMonotonic {
                iteration: entry.iteration,
                last: self.last_iteration,
            });
        }
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .map_err(|err| ProgressLogError::io(&self.path, err))?;
        self.file
            .sync_data()
            .map_err(|err| ProgressLogError::io(&self.path, err))?;
        self.last_iteration = entry.iteration;
        self.len += 1;
        debug!(iteration = entry.iteration, task_id = %entry.task_id, "progress entry appended");
        Ok(())
    }

    /// The most recent `n` entries in chronological order.
    pub fn tail(&self, n: usize) -> Result<Vec<ProgressEntry>, ProgressLogError> {
        let mut entries = self.entries()?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }

    /// Every well-formed entry currently on disk.
    pub fn entries(&self) -> Result<Vec<ProgressEntry>, ProgressLogError> {
        let bytes = fs::read(&self.path).map_err(|err| ProgressLogError::io(&self.path, err))?;
        Ok(scan_entries(&bytes).entries)
    }
}

/// Read entries from a log without opening it for writing.
///
/// A missing file reads as empty; malformed trailing data is ignored.
pub fn read_entries(path: &Path) -> Result<Vec<ProgressEntry>, ProgressLogError> {
    match fs::read(path) {
        Ok(bytes) => Ok(scan_entries(&bytes).entries),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(ProgressLogError::io(path, err)),
    }
}

struct Scan {
    entries: Vec<ProgressEntry>,
    /// Byte length of the well-formed prefix.
    valid_len: usize,
}

fn scan_entries(bytes: &[u8]) -> Scan {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let Some(newline) = bytes[offset..].iter().position(|b| *b == b'\n') else {
            // Unterminated final line: a write that never finished.
            break;
        };
        let line = &bytes[offset..offset + newline];
        if !line.iter().all(u8::is_ascii_whitespace) {
            match serde_json::from_slice::<ProgressEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(_) => break,
            }
        }
        offset += newline + 1;
    }

    Scan {
        entries,
        valid_len: offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Outcome;
    use crate::test_support::progress_entry;

    #[test]
    fn tail_returns_last_n_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut log = ProgressLog::open(&temp.path().join("progress.jsonl")).expect("open");
        for iteration in 1..=5 {
            log.append(&progress_entry(iteration, "a", Outcome::Failed))
                .expect("append");
        }

        let tail: Vec<u32> = log
            .tail(3)
            .expect("tail")
            .iter()
            .map(|entry| entry.iteration)
            .collect();
        assert_eq!(tail, vec![3, 4, 5]);
    }

    #[test]
    fn tail_longer_than_log_returns_everything() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut log = ProgressLog::open(&temp.path().join("progress.jsonl")).expect("open");
        assert!(log.tail(4).expect("tail").is_empty());

        log.append(&progress_entry(1, "a", Outcome::Succeeded))
            .expect("append");
        log.append(&progress_entry(2, "b", Outcome::Error))
            .expect("append");
        let ids: Vec<String> = log
            .tail(10)
            .expect("tail")
            .into_iter()
            .map(|entry| entry.task_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn append_rejects_non_monotonic_iterations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut log = ProgressLog::open(&temp.path().join("progress.jsonl")).expect("open");
        log.append(&progress_entry(2, "a", Outcome::Failed))
            .expect("append");

        let err = log
            .append(&progress_entry(2, "a", Outcome::Failed))
            .unwrap_err();
        assert!(matches!(
            err,
            ProgressLogError::NonMonotonic {
                iteration: 2,
                last: 2
            }
        ));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn reopen_continues_numbering() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("progress.jsonl");
        {
            let mut log = ProgressLog::open(&path).expect("open");
            log.append(&progress_entry(1, "a", Outcome::Failed))
                .expect("append");
            log.append(&progress_entry(2, "a", Outcome::Succeeded))
                .expect("append");
        }
        let log = ProgressLog::open(&path).expect("reopen");
        assert_eq!(log.last_iteration(), 2);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn open_truncates_partial_trailing_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("progress.jsonl");
        {
            let mut log = ProgressLog::open(&path).expect("open");
            log.append(&progress_entry(1, "a", Outcome::Failed))
                .expect("append");
        }
        let intact = fs::read(&path).expect("read");

        // Crash mid-append: half a line with no terminator.
        let mut torn = intact.clone();
        torn.extend_from_slice(br#"{"iteration":2,"timestamp":"2026-"#);
        fs::write(&path, &torn).expect("write torn");

        let mut log = ProgressLog::open(&path).expect("recover");
        assert_eq!(log.last_iteration(), 1);
        assert_eq!(fs::read(&path).expect("read"), intact);

        log.append(&progress_entry(2, "a", Outcome::Succeeded))
            .expect("append after recovery");
        assert_eq!(log.entries().expect("entries").len(), 2);
    }

    #[test]
    fn open_truncates_garbage_lines_and_everything_after() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("progress.jsonl");
        {
            let mut log = ProgressLog::open(&path).expect("open");
            log.append(&progress_entry(1, "a", Outcome::Failed))
                .expect("append");
        }
        let mut contents = fs::read_to_string(&path).expect("read");
        contents.push_str("not json\n");
        fs::write(&path, contents).expect("write");

        let log = ProgressLog::open(&path).expect("recover");
        assert_eq!(log.len(), 1);
        assert!(!fs::read_to_string(&path).expect("read").contains("not json"));
    }

    #[test]
    fn read_entries_treats_missing_file_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let entries = read_entries(&temp.path().join("missing.jsonl")).expect("read");
        assert!(entries.is_empty());
    }
}

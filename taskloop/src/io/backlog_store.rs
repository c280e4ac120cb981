//! Backlog load/save with schema + invariant validation.
//!
//! Every mutation rewrites the whole file through a synced temp file and an
//! atomic rename, so a crash leaves either the previous or the new backlog on
//! disk, never a torn one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use jsonschema::validator_for;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::backlog::{Backlog, TaskItem, TaskStatus};
use crate::core::invariants::validate_invariants;
use crate::core::selector::{next_pending, select_next};
use crate::core::types::RetryPolicy;

const BACKLOG_SCHEMA: &str = include_str!("../../schemas/backlog.schema.json");

#[derive(Debug, Error)]
pub enum BacklogError {
    #[error("backlog not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("corrupt backlog {}: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },
    #[error("unknown task id '{0}'")]
    UnknownId(String),
    #[error("backlog i/o on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BacklogError {
    fn io(path: &Path, source: io::Error) -> Self {
        BacklogError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn corrupt(path: &Path, message: impl Into<String>) -> Self {
        BacklogError::Corrupt {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// File-backed backlog owned by the loop.
#[derive(Debug)]
pub struct BacklogStore {
    path: PathBuf,
    backlog: Backlog,
}

impl BacklogStore {
    /// Load and validate the backlog at `path`.
    pub fn load(path: &Path) -> Result<Self, BacklogError> {
        let backlog = load_backlog(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            backlog,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backlog(&self) -> &Backlog {
        &self.backlog
    }

    pub fn next_pending(&self) -> Option<&TaskItem> {
        next_pending(&self.backlog)
    }

    pub fn select_next(&self, policy: &RetryPolicy) -> Option<&TaskItem> {
        select_next(&self.backlog, policy)
    }

    /// Set the status of `id` and persist the whole backlog before returning.
    ///
    /// The in-memory copy only changes once the write succeeded, so memory and
    /// disk never diverge.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn update_status(&mut self, id: &str, status: TaskStatus) -> Result<(), BacklogError> {
        let mut candidate = self.backlog.clone();
        let item = candidate
            .get_mut(id)
            .ok_or_else(|| BacklogError::UnknownId(id.to_string()))?;
        item.transition(status);
        debug!(
            consecutive_failures = item.consecutive_failures,
            "status updated"
        );
        write_backlog(&self.path, &candidate)?;
        self.backlog = candidate;
        Ok(())
    }

    /// Persist the current backlog in canonical form.
    pub fn save(&self) -> Result<(), BacklogError> {
        write_backlog(&self.path, &self.backlog)
    }
}

/// Read, schema-check and invariant-check a backlog file.
pub fn load_backlog(path: &Path) -> Result<Backlog, BacklogError> {
    debug!(path = %path.display(), "loading backlog");
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(BacklogError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(err) => return Err(BacklogError::io(path, err)),
    };
    parse_backlog(path, &contents)
}

fn parse_backlog(path: &Path, contents: &str) -> Result<Backlog, BacklogError> {
    let value: Value = serde_json::from_str(contents)
        .map_err(|err| BacklogError::corrupt(path, format!("parse json: {err}")))?;
    validate_schema(path, &value)?;
    let backlog: Backlog = serde_json::from_value(value)
        .map_err(|err| BacklogError::corrupt(path, format!("deserialize: {err}")))?;
    let errors = validate_invariants(&backlog);
    if !errors.is_empty() {
        return Err(BacklogError::corrupt(path, errors.join("; ")));
    }
    debug!(items = backlog.len(), "backlog loaded");
    Ok(backlog)
}

fn validate_schema(path: &Path, value: &Value) -> Result<(), BacklogError> {
    let schema: Value = serde_json::from_str(BACKLOG_SCHEMA)
        .map_err(|err| BacklogError::corrupt(path, format!("parse schema: {err}")))?;
    let compiled = validator_for(&schema)
        .map_err(|err| BacklogError::corrupt(path, format!("invalid schema: {err}")))?;
    if compiled.is_valid(value) {
        return Ok(());
    }
    let messages = compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(BacklogError::corrupt(
        path,
        format!("schema validation failed: {}", messages.join("; ")),
    ))
}

/// Canonical serialization: pretty JSON array with trailing newline.
pub fn render_backlog(backlog: &Backlog) -> serde_json::Result<String> {
    let mut buf = serde_json::to_string_pretty(backlog)?;
    buf.push('\n');
    Ok(buf)
}

/// Atomically write the backlog to disk (synced temp file + rename).
pub fn write_backlog(path: &Path, backlog: &Backlog) -> Result<(), BacklogError> {
    debug!(path = %path.display(), items = backlog.len(), "writing backlog");
    let contents = render_backlog(backlog)
        .map_err(|err| BacklogError::corrupt(path, format!("serialize: {err}")))?;
    write_atomic(path, &contents)
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), BacklogError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|err| BacklogError::io(&parent, err))?;
    let tmp_path = path.with_extension("json.tmp");

    let mut file = File::create(&tmp_path).map_err(|err| BacklogError::io(&tmp_path, err))?;
    file.write_all(contents.as_bytes())
        .map_err(|err| BacklogError::io(&tmp_path, err))?;
    file.sync_all().map_err(|err| BacklogError::io(&tmp_path, err))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|err| BacklogError::io(path, err))?;
    sync_dir(&parent).map_err(|err| BacklogError::io(&parent, err))?;
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

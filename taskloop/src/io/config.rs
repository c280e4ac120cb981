//! Loop configuration, read from an optional `taskloop.toml`.
//!
//! Every field has a default so the file may be partial or absent; command-line
//! flags are applied on top by the CLI before `validate()` runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{Attribution, RetryPolicy, StopPolicy};
use crate::io::process::RunLimits;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "taskloop.toml";
pub const DEFAULT_BACKLOG_PATH: &str = "plans/prd.json";
pub const DEFAULT_PROGRESS_PATH: &str = "progress.jsonl";
pub const DEFAULT_COMPLETION_MARKER: &str = "<promise>COMPLETE</promise>";
pub const DEFAULT_TASK_MARKER: &str = "<task-done>{{ id }}</task-done>";

/// Invalid arguments or configuration. Nothing has been attempted yet.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    pub backlog_path: PathBuf,
    pub progress_path: PathBuf,

    /// Literal sentinel that signals the worker considers everything done.
    pub completion_marker: String,

    /// Only stop on the completion marker once every item has passed.
    pub require_all_passed: bool,

    /// Give up on a task after this many failures in a row.
    pub max_consecutive_failures: u32,

    /// Retry failed items automatically (otherwise they need a manual reset).
    pub retry_failed: bool,

    /// Exit with failure when only failed items that may not be retried are
    /// left. By default such a run halts successfully and leaves them for a
    /// manual reset.
    pub fail_when_blocked: bool,

    pub attribution: Attribution,

    /// Marker template used by `attribution = "task-marker"`.
    pub task_marker: String,

    /// Number of recent progress entries handed to the worker.
    pub context_entries: usize,

    /// Bytes of worker stdout kept as progress notes.
    pub notes_limit_bytes: usize,

    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Command template, e.g. `agent -p {{ task.description | quote }}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Per-iteration wall-clock budget in seconds; 0 disables the timeout.
    pub timeout_secs: u64,

    /// Cap on stored stdout/stderr bytes per stream (unbounded when unset).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_limit_bytes: Option<usize>,

    /// Working directory for the worker (inherited when unset).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: 30 * 60,
            output_limit_bytes: None,
            workdir: None,
        }
    }
}

impl WorkerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn limits(&self) -> RunLimits {
        RunLimits {
            timeout: self.timeout(),
            output_limit_bytes: self.output_limit_bytes,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            backlog_path: PathBuf::from(DEFAULT_BACKLOG_PATH),
            progress_path: PathBuf::from(DEFAULT_PROGRESS_PATH),
            completion_marker: DEFAULT_COMPLETION_MARKER.to_string(),
            require_all_passed: true,
            max_consecutive_failures: 3,
            retry_failed: true,
            fail_when_blocked: false,
            attribution: Attribution::default(),
            task_marker: DEFAULT_TASK_MARKER.to_string(),
            context_entries: 5,
            notes_limit_bytes: 2_000,
            worker: WorkerConfig::default(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.completion_marker.is_empty() {
            return Err(ConfigError::new("completion_marker must not be empty"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::new("max_consecutive_failures must be > 0"));
        }
        if self.notes_limit_bytes == 0 {
            return Err(ConfigError::new("notes_limit_bytes must be > 0"));
        }
        if self.worker.output_limit_bytes == Some(0) {
            return Err(ConfigError::new("worker.output_limit_bytes must be > 0"));
        }
        match &self.worker.command {
            Some(command) if !command.trim().is_empty() => {}
            _ => {
                return Err(ConfigError::new(
                    "worker command is required (--command or worker.command)",
                ));
            }
        }
        if self.backlog_path == self.progress_path {
            return Err(ConfigError::new(
                "backlog and progress log must be different files",
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_failed: self.retry_failed,
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }

    pub fn stop_policy(&self) -> StopPolicy {
        StopPolicy {
            completion_marker: self.completion_marker.clone(),
            require_all_passed: self.require_all_passed,
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }
}

/// Load config from a TOML file.
///
/// With `explicit = false` a missing file yields `LoopConfig::default()`; a
/// file named on the command line must exist.
pub fn load_config(path: &Path, explicit: bool) -> Result<LoopConfig, ConfigError> {
    if !path.exists() {
        if explicit {
            return Err(ConfigError::new(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        return Ok(LoopConfig::default());
    }
    let contents = fs::read_to_string(path)
        .map_err(|err| ConfigError::new(format!("read {}: {err}", path.display())))?;
    toml::from_str(&contents)
        .map_err(|err| ConfigError::new(format!("parse {}: {err}", path.display())))
}

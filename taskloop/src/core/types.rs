//! Shared deterministic types for the loop core.
//!
//! These types define stable contracts between core components. They carry no
//! I/O handles and serialize deterministically.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one iteration as recorded in the progress log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The worker completed the task.
    Succeeded,
    /// The worker ran but did not complete the task.
    Failed,
    /// The worker could not be launched or was killed on timeout.
    Error,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
            Outcome::Error => "error",
        }
    }
}

/// How a worker invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The process exited on its own. `code` is `None` when killed by a signal.
    Exited { code: Option<i32> },
    /// The process exceeded its wall-clock budget and was killed.
    TimedOut,
    /// The process could not be started.
    LaunchFailed { message: String },
}

/// Transient record of one worker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationRecord {
    pub task_id: String,
    pub termination: Termination,
    pub stdout: String,
    pub stderr: String,
    /// Bytes dropped from stdout because of the configured cap.
    pub stdout_truncated: usize,
    /// Bytes dropped from stderr because of the configured cap.
    pub stderr_truncated: usize,
    pub duration: Duration,
}

impl IterationRecord {
    pub fn launch_failed(task_id: &str, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            termination: Termination::LaunchFailed {
                message: message.into(),
            },
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: 0,
            stderr_truncated: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited { code } => code,
            _ => None,
        }
    }

    /// True if the process exited on its own with status 0.
    pub fn exited_successfully(&self) -> bool {
        self.exit_code() == Some(0)
    }

    /// Literal substring search over both captured streams.
    pub fn output_contains(&self, needle: &str) -> bool {
        self.stdout.contains(needle) || self.stderr.contains(needle)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// One line of the progress log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub outcome: Outcome,
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Why the detector asked the loop to stop with failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopFailureReason {
    /// The worker command could not be started.
    LaunchFailed,
    /// The task reached the consecutive failure limit.
    TaskExhausted,
}

/// Stop-condition decision after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    StopSuccess,
    StopFailure(StopFailureReason),
}

/// Inputs the stop-condition detector evaluates against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopPolicy {
    /// Literal sentinel whose presence in worker output signals completion.
    pub completion_marker: String,
    /// Only honour the marker once every backlog item has passed.
    pub require_all_passed: bool,
    pub max_consecutive_failures: u32,
}

/// Selection policy for items that previously failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Make failed items eligible again until their streak hits the limit.
    pub retry_failed: bool,
    pub max_consecutive_failures: u32,
}

/// How a worker invocation is credited to the selected task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Attribution {
    /// The task passes when the worker exits with status 0.
    #[default]
    ExitCode,
    /// The task passes when the worker exits 0 and echoes the task marker.
    TaskMarker,
}

impl Attribution {
    pub fn as_str(self) -> &'static str {
        match self {
            Attribution::ExitCode => "exit-code",
            Attribution::TaskMarker => "task-marker",
        }
    }
}

impl fmt::Display for Attribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Attribution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exit-code" => Ok(Attribution::ExitCode),
            "task-marker" => Ok(Attribution::TaskMarker),
            other => Err(format!(
                "unknown attribution '{other}' (expected exit-code or task-marker)"
            )),
        }
    }
}

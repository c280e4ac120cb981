//! Crediting a worker invocation to the selected task.

use crate::backlog::TaskStatus;
use crate::core::types::{IterationRecord, Outcome, Termination};

/// Outcome and status update derived from one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributed {
    pub outcome: Outcome,
    pub status: TaskStatus,
}

/// Classify an invocation.
///
/// `task_marker` is the rendered per-task marker when the task-marker policy is
/// active; the worker must then print it on stdout in addition to exiting 0.
pub fn attribute(record: &IterationRecord, task_marker: Option<&str>) -> Attributed {
    let failed = Attributed {
        outcome: Outcome::Failed,
        status: TaskStatus::Failed,
    };
    match record.termination {
        Termination::LaunchFailed { .. } | Termination::TimedOut => Attributed {
            outcome: Outcome::Error,
            status: TaskStatus::Failed,
        },
        Termination::Exited { .. } if !record.exited_successfully() => failed,
        Termination::Exited { .. } => match task_marker {
            Some(marker) if !record.stdout.contains(marker) => failed,
            _ => Attributed {
                outcome: Outcome::Succeeded,
                status: TaskStatus::Passed,
            },
        },
    }
}

/// Notes to store in the progress log for this invocation.
///
/// Uses the tail of stdout (at most `limit_bytes`, cut on a char boundary);
/// falls back to a description of how the worker ended.
pub fn notes_for(record: &IterationRecord, limit_bytes: usize) -> String {
    let summary = match &record.termination {
        Termination::LaunchFailed { message } => return format!("launch failed: {message}"),
        Termination::TimedOut => Some(format!(
            "timed out after {}s",
            record.duration.as_secs()
        )),
        Termination::Exited { code: Some(0) } => None,
        Termination::Exited { code: Some(code) } => Some(format!("exit status {code}")),
        Termination::Exited { code: None } => Some("terminated by signal".to_string()),
    };

    let tail = tail_on_char_boundary(record.stdout.trim(), limit_bytes);
    match (summary, tail.is_empty()) {
        (Some(summary), true) => summary,
        (Some(summary), false) => format!("{summary}\n{tail}"),
        (None, true) => "no output".to_string(),
        (None, false) => tail.to_string(),
    }
}

fn tail_on_char_boundary(text: &str, limit_bytes: usize) -> &str {
    if text.len() <= limit_bytes {
        return text;
    }
    let mut start = text.len() - limit_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

//! Test-only helpers: backlog fixtures and a scripted worker.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::backlog::{Backlog, TaskItem, TaskStatus};
use crate::core::types::{IterationRecord, Outcome, ProgressEntry, Termination};
use crate::io::backlog_store::write_backlog;
use crate::io::worker::{Worker, WorkerRequest};

/// Create a backlog from items in file order.
pub fn backlog_of(items: Vec<TaskItem>) -> Backlog {
    Backlog::new(items)
}

/// Create an item with an explicit status and a deterministic description.
pub fn item_with_status(id: &str, priority: i64, status: TaskStatus) -> TaskItem {
    TaskItem {
        status,
        ..TaskItem::new(id, format!("{id} description"), priority)
    }
}

/// Create an iteration record with empty stderr and zero duration.
pub fn record_with(task_id: &str, termination: Termination, stdout: &str) -> IterationRecord {
    IterationRecord {
        task_id: task_id.to_string(),
        termination,
        stdout: stdout.to_string(),
        stderr: String::new(),
        stdout_truncated: 0,
        stderr_truncated: 0,
        duration: Duration::ZERO,
    }
}

/// Create a progress entry with a fixed timestamp.
pub fn progress_entry(iteration: u32, task_id: &str, outcome: Outcome) -> ProgressEntry {
    let timestamp = DateTime::from_timestamp(1_767_225_600, 0).unwrap_or_else(Utc::now);
    ProgressEntry {
        iteration,
        timestamp,
        task_id: task_id.to_string(),
        outcome,
        notes: format!("{} notes", outcome.as_str()),
        exit_code: None,
        duration_ms: 0,
    }
}

/// Write `items` to `<dir>/backlog.json` in canonical form and return the path.
pub fn write_backlog_file(dir: &Path, items: Vec<TaskItem>) -> PathBuf {
    let path = dir.join("backlog.json");
    write_backlog(&path, &backlog_of(items)).expect("write backlog fixture");
    path
}

/// Canned result for one scripted invocation.
#[derive(Debug, Clone)]
pub struct ScriptedStep {
    pub termination: Termination,
    pub stdout: String,
}

impl ScriptedStep {
    pub fn exit(code: i32, stdout: &str) -> Self {
        Self {
            termination: Termination::Exited { code: Some(code) },
            stdout: stdout.to_string(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            termination: Termination::TimedOut,
            stdout: String::new(),
        }
    }

    pub fn launch_failure(message: &str) -> Self {
        Self {
            termination: Termination::LaunchFailed {
                message: message.to_string(),
            },
            stdout: String::new(),
        }
    }
}

/// What a scripted worker was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedCall {
    pub iteration: u32,
    pub task_id: String,
    pub context_len: usize,
}

/// Worker returning queued results without spawning processes.
///
/// Once the queue is empty it repeats the fallback step, or reports a launch
/// failure if none was given.
#[derive(Debug, Default)]
pub struct ScriptedWorker {
    steps: RefCell<VecDeque<ScriptedStep>>,
    fallback: Option<ScriptedStep>,
    calls: RefCell<Vec<ScriptedCall>>,
}

impl ScriptedWorker {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: RefCell::new(steps.into()),
            ..Self::default()
        }
    }

    pub fn always(step: ScriptedStep) -> Self {
        Self {
            fallback: Some(step),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.borrow().clone()
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|call| call.task_id.clone())
            .collect()
    }
}

impl Worker for ScriptedWorker {
    fn invoke(&self, request: &WorkerRequest<'_>) -> IterationRecord {
        self.calls.borrow_mut().push(ScriptedCall {
            iteration: request.iteration,
            task_id: request.task.id.clone(),
            context_len: request.context.len(),
        });
        let step = self
            .steps
            .borrow_mut()
            .pop_front()
            .or_else(|| self.fallback.clone());
        match step {
            Some(step) => record_with(&request.task.id, step.termination, &step.stdout),
            None => IterationRecord::launch_failed(&request.task.id, "scripted worker exhausted"),
        }
    }
}

//! Worker abstraction for one iteration of work.
//!
//! The [`Worker`] trait decouples the loop from the actual worker backend (an
//! arbitrary shell command). Tests use scripted workers that return
//! predetermined records without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Instant;

use tracing::{info, instrument, warn};

use crate::backlog::TaskItem;
use crate::core::types::{IterationRecord, ProgressEntry, Termination, duration_millis};
use crate::io::process::{RunLimits, spawn_isolated, wait_with_limits};
use crate::io::template::{CommandTemplate, render_context};

/// Parameters for a single worker invocation.
#[derive(Debug, Clone, Copy)]
pub struct WorkerRequest<'a> {
    pub task: &'a TaskItem,
    /// Most recent progress entries, oldest first.
    pub context: &'a [ProgressEntry],
    /// Iteration number this invocation will be logged under.
    pub iteration: u32,
}

/// Abstraction over worker backends.
///
/// Invocation never fails as a Rust error: launch failures, timeouts and
/// non-zero exits are all described by the returned record.
pub trait Worker {
    fn invoke(&self, request: &WorkerRequest<'_>) -> IterationRecord;
}

/// Worker that renders a command template and runs it with `sh -c`.
#[derive(Debug, Clone)]
pub struct ShellWorker {
    template: CommandTemplate,
    workdir: Option<PathBuf>,
    limits: RunLimits,
}

impl ShellWorker {
    pub fn new(template: CommandTemplate, workdir: Option<PathBuf>, limits: RunLimits) -> Self {
        Self {
            template,
            workdir,
            limits,
        }
    }
}

impl Worker for ShellWorker {
    #[instrument(skip_all, fields(task_id = %request.task.id, iteration = request.iteration))]
    fn invoke(&self, request: &WorkerRequest<'_>) -> IterationRecord {
        let task = request.task;
        let context_text = render_context(request.context);
        let command_line = match self
            .template
            .render(task, request.iteration, &context_text)
        {
            Ok(line) => line,
            Err(err) => {
                warn!(err = %err, "failed to render worker command");
                return IterationRecord::launch_failed(
                    &task.id,
                    format!("render command: {err:#}"),
                );
            }
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&command_line)
            .env("TASKLOOP_TASK_ID", &task.id)
            .env("TASKLOOP_TASK_DESCRIPTION", &task.description)
            .env("TASKLOOP_ITERATION", request.iteration.to_string())
            .env("TASKLOOP_CONTEXT", &context_text);
        if let Some(workdir) = &self.workdir {
            cmd.current_dir(workdir);
        }

        info!(command = %command_line, "starting worker");
        let start = Instant::now();
        let child = match spawn_isolated(cmd) {
            Ok(child) => child,
            Err(err) => {
                warn!(err = %err, "failed to spawn worker");
                return IterationRecord::launch_failed(
                    &task.id,
                    format!("spawn worker: {err}"),
                );
            }
        };

        let output = match wait_with_limits(child, self.limits) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %err, "failed while waiting for worker");
                return IterationRecord {
                    duration: start.elapsed(),
                    ..IterationRecord::launch_failed(
                        &task.id,
                        format!("wait for worker: {err:#}"),
                    )
                };
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let termination = if output.timed_out {
            Termination::TimedOut
        } else {
            classify_exit(output.status.code(), &stderr)
        };
        let record = IterationRecord {
            task_id: task.id.clone(),
            termination,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
            stdout_truncated: output.stdout_truncated,
            stderr_truncated: output.stderr_truncated,
            duration: start.elapsed(),
        };
        info!(
            termination = ?record.termination,
            duration_ms = duration_millis(record.duration),
            "worker finished"
        );
        record
    }
}

/// `sh` exits 127 when the command is not found and 126 when it cannot be
/// executed; both mean the worker never started.
fn classify_exit(code: Option<i32>, stderr: &str) -> Termination {
    match code {
        Some(code @ (126 | 127)) => {
            let reason = stderr.trim().lines().last().unwrap_or_default().trim();
            let message = if reason.is_empty() {
                format!("worker command could not be executed (exit status {code})")
            } else {
                format!("{reason} (exit status {code})")
            };
            Termination::LaunchFailed { message }
        }
        code => Termination::Exited { code },
    }
}

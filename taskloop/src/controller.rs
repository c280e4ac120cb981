//! Iteration controller for `taskloop run`.
//!
//! Drives the loop `Selecting -> Invoking -> Recording -> Deciding` until a
//! stop condition halts it. All state lives in the backlog and the progress
//! log, so a fresh process resumes where the previous one stopped.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::backlog::{TaskItem, TaskStatus};
use crate::core::attribution::{attribute, notes_for};
use crate::core::detector::evaluate;
use crate::core::types::{
    Attribution, Decision, IterationRecord, Outcome, ProgressEntry, RetryPolicy,
    StopFailureReason, StopPolicy, Termination, duration_millis,
};
use crate::exit_codes;
use crate::io::backlog_store::BacklogStore;
use crate::io::config::{ConfigError, LoopConfig};
use crate::io::progress_log::ProgressLog;
use crate::io::template::TaskMarkerTemplate;
use crate::io::worker::{Worker, WorkerRequest};

/// Resolved, validated inputs for one `run_loop` call.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Hard cap on worker invocations in this process run.
    pub max_iterations: u32,
    pub retry: RetryPolicy,
    pub stop: StopPolicy,
    /// Present only under the task-marker attribution policy.
    pub task_marker: Option<TaskMarkerTemplate>,
    pub context_entries: usize,
    pub notes_limit_bytes: usize,
    /// Report `Blocked` instead of success when only unretryable failed items
    /// are left.
    pub fail_when_blocked: bool,
}

impl LoopSettings {
    pub fn from_config(config: &LoopConfig, max_iterations: u32) -> Result<Self, ConfigError> {
        let task_marker = match config.attribution {
            Attribution::ExitCode => None,
            Attribution::TaskMarker => Some(
                TaskMarkerTemplate::new(&config.task_marker)
                    .map_err(|err| ConfigError::new(format!("{err:#}")))?,
            ),
        };
        Ok(Self {
            max_iterations,
            retry: config.retry_policy(),
            stop: config.stop_policy(),
            task_marker,
            context_entries: config.context_entries,
            notes_limit_bytes: config.notes_limit_bytes,
            fail_when_blocked: config.fail_when_blocked,
        })
    }
}

/// Reason why `run_loop` halted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Nothing left to select (includes an empty backlog).
    BacklogComplete,
    /// The worker printed the completion marker and the backlog allowed it.
    CompletionMarker { task_id: String },
    /// Only failed items remain, none may be retried, and `fail_when_blocked`
    /// is set.
    Blocked { failed: Vec<String> },
    /// A task reached the consecutive failure limit.
    TaskExhausted { task_id: String, failures: u32 },
    /// The worker command could not be started.
    LaunchFailed { task_id: String, message: String },
    /// Work remained but the iteration budget was used up.
    MaxIterationsReached { max_iterations: u32 },
}

impl LoopStop {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            LoopStop::BacklogComplete | LoopStop::CompletionMarker { .. }
        )
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            exit_codes::OK
        } else {
            exit_codes::FAILURE
        }
    }
}

impl fmt::Display for LoopStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopStop::BacklogComplete => write!(f, "backlog complete"),
            LoopStop::CompletionMarker { task_id } => {
                write!(f, "completion marker seen after task '{task_id}'")
            }
            LoopStop::Blocked { failed } => {
                write!(f, "blocked: failed items need attention ({})", failed.join(", "))
            }
            LoopStop::TaskExhausted { task_id, failures } => write!(
                f,
                "task '{task_id}' failed {failures} consecutive times; giving up"
            ),
            LoopStop::LaunchFailed { task_id, message } => {
                write!(f, "worker failed to launch for task '{task_id}': {message}")
            }
            LoopStop::MaxIterationsReached { max_iterations } => {
                write!(f, "max iterations reached ({max_iterations})")
            }
        }
    }
}

/// Summary of a `run_loop` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Worker invocations performed by this call.
    pub iterations: u32,
    pub stop: LoopStop,
}

/// One finished iteration, reported to the caller's callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub iteration: u32,
    pub task_id: String,
    pub outcome: Outcome,
    pub status: TaskStatus,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub decision: Decision,
}

enum State {
    Selecting,
    Invoking(TaskItem),
    Recording(TaskItem, IterationRecord),
    Deciding(IterationRecord, Outcome),
    Halted(LoopStop),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Selecting => "selecting",
            State::Invoking(..) => "invoking",
            State::Recording(..) => "recording",
            State::Deciding(..) => "deciding",
            State::Halted(..) => "halted",
        }
    }
}

struct Controller<'a, W: Worker, F: FnMut(&IterationReport)> {
    store: &'a mut BacklogStore,
    log: &'a mut ProgressLog,
    worker: &'a W,
    settings: &'a LoopSettings,
    on_iteration: F,
    executed: u32,
    /// Iteration number of the invocation in flight (or the next one).
    iteration: u32,
}

/// Run the loop until it halts.
///
/// Returns `Err` only for persistence failures; every worker failure is
/// recorded and handled by the stop-condition detector. Before a persistence
/// error is returned, an `Error` entry describing it is appended to the
/// progress log on a best-effort basis.
pub fn run_loop<W: Worker, F: FnMut(&IterationReport)>(
    store: &mut BacklogStore,
    log: &mut ProgressLog,
    worker: &W,
    settings: &LoopSettings,
    on_iteration: F,
) -> Result<LoopOutcome> {
    let iteration = log.last_iteration() + 1;
    info!(
        backlog = %store.path().display(),
        progress = %log.path().display(),
        first_iteration = iteration,
        max_iterations = settings.max_iterations,
        "loop starting"
    );
    let mut controller = Controller {
        store,
        log,
        worker,
        settings,
        on_iteration,
        executed: 0,
        iteration,
    };

    let mut state = State::Selecting;
    loop {
        debug!(state = state.name(), iteration = controller.iteration, "loop state");
        let current_task = match &state {
            State::Invoking(task) | State::Recording(task, _) => Some(task.id.clone()),
            State::Deciding(record, _) => Some(record.task_id.clone()),
            State::Selecting | State::Halted(_) => None,
        };
        state = match state {
            State::Halted(stop) => {
                info!(iterations = controller.executed, stop = %stop, "loop halted");
                return Ok(LoopOutcome {
                    iterations: controller.executed,
                    stop,
                });
            }
            other => match controller.advance(other) {
                Ok(next) => next,
                Err(err) => {
                    controller.record_failure(current_task.as_deref(), &err);
                    return Err(err);
                }
            },
        };
    }
}

impl<W: Worker, F: FnMut(&IterationReport)> Controller<'_, W, F> {
    fn advance(&mut self, state: State) -> Result<State> {
        match state {
            State::Selecting => self.select(),
            State::Invoking(task) => self.invoke(task),
            State::Recording(task, record) => self.record(task, record),
            State::Deciding(record, outcome) => Ok(self.decide(record, outcome)),
            State::Halted(stop) => Ok(State::Halted(stop)),
        }
    }

    fn select(&mut self) -> Result<State> {
        let Some(task) = self.store.select_next(&self.settings.retry).cloned() else {
            let failed = self.store.backlog().failed_ids();
            if failed.is_empty() {
                return Ok(State::Halted(LoopStop::BacklogComplete));
            }
            if self.settings.fail_when_blocked {
                return Ok(State::Halted(LoopStop::Blocked { failed }));
            }
            warn!(
                failed = %failed.join(", "),
                "no task is selectable; failed tasks are left for manual attention"
            );
            return Ok(State::Halted(LoopStop::BacklogComplete));
        };
        if self.executed >= self.settings.max_iterations {
            return Ok(State::Halted(LoopStop::MaxIterationsReached {
                max_iterations: self.settings.max_iterations,
            }));
        }

        if task.status == TaskStatus::Failed {
            debug!(
                task_id = %task.id,
                consecutive_failures = task.consecutive_failures,
                "retrying failed task"
            );
            self.store
                .update_status(&task.id, TaskStatus::Pending)
                .with_context(|| format!("reset task '{}' to pending", task.id))?;
        }
        info!(task_id = %task.id, priority = task.priority, "task selected");
        Ok(State::Invoking(task))
    }

    fn invoke(&mut self, task: TaskItem) -> Result<State> {
        let context = self
            .log
            .tail(self.settings.context_entries)
            .context("read progress context")?;
        self.executed += 1;
        let record = self.worker.invoke(&WorkerRequest {
            task: &task,
            context: &context,
            iteration: self.iteration,
        });
        if record.stdout_truncated > 0 || record.stderr_truncated > 0 {
            warn!(
                stdout_truncated = record.stdout_truncated,
                stderr_truncated = record.stderr_truncated,
                "worker output exceeded the configured limit"
            );
        }
        Ok(State::Recording(task, record))
    }

    fn record(&mut self, task: TaskItem, record: IterationRecord) -> Result<State> {
        let marker = match &self.settings.task_marker {
            Some(template) => Some(
                template
                    .render(&task.id)
                    .with_context(|| format!("render task marker for '{}'", task.id))?,
            ),
            None => None,
        };
        let attributed = attribute(&record, marker.as_deref());

        let entry = ProgressEntry {
            iteration: self.iteration,
            timestamp: Utc::now(),
            task_id: task.id.clone(),
            outcome: attributed.outcome,
            notes: notes_for(&record, self.settings.notes_limit_bytes),
            exit_code: record.exit_code(),
            duration_ms: duration_millis(record.duration),
        };
        self.log
            .append(&entry)
            .with_context(|| format!("append progress entry {}", entry.iteration))?;
        self.store
            .update_status(&task.id, attributed.status)
            .with_context(|| format!("mark task '{}' {}", task.id, attributed.status.as_str()))?;
        Ok(State::Deciding(record, attributed.outcome))
    }

    fn decide(&mut self, record: IterationRecord, outcome: Outcome) -> State {
        let decision = evaluate(&record, self.store.backlog(), &self.settings.stop);
        let item = self.store.backlog().get(&record.task_id);
        let status = item.map_or(TaskStatus::Pending, |item| item.status);
        let failures = item.map_or(0, |item| item.consecutive_failures);

        (self.on_iteration)(&IterationReport {
            iteration: self.iteration,
            task_id: record.task_id.clone(),
            outcome,
            status,
            exit_code: record.exit_code(),
            duration: record.duration,
            decision,
        });
        self.iteration += 1;

        match decision {
            Decision::Continue => State::Selecting,
            Decision::StopSuccess => State::Halted(LoopStop::CompletionMarker {
                task_id: record.task_id,
            }),
            Decision::StopFailure(StopFailureReason::TaskExhausted) => {
                State::Halted(LoopStop::TaskExhausted {
                    task_id: record.task_id,
                    failures,
                })
            }
            Decision::StopFailure(StopFailureReason::LaunchFailed) => {
                let message = match record.termination {
                    Termination::LaunchFailed { message } => message,
                    _ => String::new(),
                };
                State::Halted(LoopStop::LaunchFailed {
                    task_id: record.task_id,
                    message,
                })
            }
        }
    }

    fn record_failure(&mut self, task_id: Option<&str>, err: &anyhow::Error) {
        let entry = ProgressEntry {
            iteration: self.iteration.max(self.log.last_iteration() + 1),
            timestamp: Utc::now(),
            task_id: task_id.unwrap_or_default().to_string(),
            outcome: Outcome::Error,
            notes: format!("orchestrator error: {err:#}"),
            exit_code: None,
            duration_ms: 0,
        };
        if let Err(log_err) = self.log.append(&entry) {
            warn!(err = %log_err, "could not record persistence failure in progress log");
        }
    }
}

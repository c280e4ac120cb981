//! MiniJinja rendering for the worker command and the per-task marker.
//!
//! Templates see `task.id`, `task.description`, `task.priority`, `iteration`
//! and `context`. The `quote` filter shell-quotes a value so task text can be
//! spliced into a `sh -c` command line safely. Undefined variables are errors.

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, ErrorKind, UndefinedBehavior, context};
use serde::Serialize;

use crate::backlog::TaskItem;
use crate::core::types::ProgressEntry;

/// Task fields exposed to templates.
#[derive(Debug, Clone, Serialize)]
struct TaskContext<'a> {
    id: &'a str,
    description: &'a str,
    priority: i64,
}

impl<'a> TaskContext<'a> {
    fn from_item(item: &'a TaskItem) -> Self {
        Self {
            id: &item.id,
            description: &item.description,
            priority: item.priority,
        }
    }
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_filter("quote", quote);
    env
}

fn quote(value: String) -> Result<String, minijinja::Error> {
    shlex::try_quote(&value)
        .map(|quoted| quoted.into_owned())
        .map_err(|err| minijinja::Error::new(ErrorKind::InvalidOperation, err.to_string()))
}

/// Worker command line template, validated on construction.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    source: String,
}

impl CommandTemplate {
    /// Parse `source` and check it renders for a sample task.
    pub fn new(source: &str) -> Result<Self> {
        if source.trim().is_empty() {
            return Err(anyhow!("worker command must not be empty"));
        }
        let template = Self {
            source: source.to_string(),
        };
        let sample = TaskItem::new("sample-task", "sample description", 0);
        let rendered = template
            .render(&sample, 1, "")
            .with_context(|| format!("invalid worker command template '{source}'"))?;
        if rendered.trim().is_empty() {
            return Err(anyhow!("worker command template renders to an empty command"));
        }
        Ok(template)
    }

    /// Render the command line for one invocation.
    pub fn render(&self, task: &TaskItem, iteration: u32, context_text: &str) -> Result<String> {
        let env = environment();
        let rendered = env.render_str(
            &self.source,
            context! {
                task => TaskContext::from_item(task),
                iteration => iteration,
                context => context_text,
            },
        )?;
        Ok(rendered)
    }
}

/// Marker a worker prints to claim it completed `task` (only `id` is in scope).
#[derive(Debug, Clone)]
pub struct TaskMarkerTemplate {
    source: String,
}

impl TaskMarkerTemplate {
    pub fn new(source: &str) -> Result<Self> {
        let template = Self {
            source: source.to_string(),
        };
        let sample = template
            .render("sample-task")
            .with_context(|| format!("invalid task marker template '{source}'"))?;
        if !sample.contains("sample-task") {
            return Err(anyhow!(
                "task marker template '{source}' must include {{{{ id }}}}"
            ));
        }
        Ok(template)
    }

    pub fn render(&self, id: &str) -> Result<String> {
        let env = environment();
        Ok(env.render_str(&self.source, context! { id => id })?)
    }
}

/// Plain-text rendering of recent progress entries, oldest first.
pub fn render_context(entries: &[ProgressEntry]) -> String {
    let mut buf = String::new();
    for entry in entries {
        buf.push_str(&format!(
            "#{} {} [{}] {}: {}\n",
            entry.iteration,
            entry.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
            entry.outcome.as_str(),
            entry.task_id,
            entry.notes.trim().replace('\n', " / "),
        ));
    }
    buf
}

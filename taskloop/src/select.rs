//! Selection helper for `taskloop select`.

use std::path::Path;

use anyhow::{Context, Result};

use crate::backlog::{Backlog, TaskStatus};
use crate::core::selector::{next_pending, select_next};
use crate::core::types::RetryPolicy;
use crate::io::backlog_store::load_backlog;

/// Structured selection outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Nothing is selectable (the backlog may still hold failed items).
    NonePending,
    /// Highest-priority selectable item.
    Pending(SelectedTask),
}

/// Minimal selected item metadata for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedTask {
    pub id: String,
    pub priority: i64,
    /// `Failed` when the item is up for a retry.
    pub status: TaskStatus,
}

/// Select the next item from an in-memory backlog.
///
/// Without a retry policy only `Pending` items count. With one, the choice is
/// the same one `taskloop run` would make, failed items included.
pub fn select_task(backlog: &Backlog, retry: Option<&RetryPolicy>) -> SelectOutcome {
    let item = match retry {
        Some(policy) => select_next(backlog, policy),
        None => next_pending(backlog),
    };
    match item {
        Some(item) => SelectOutcome::Pending(SelectedTask {
            id: item.id.clone(),
            priority: item.priority,
            status: item.status,
        }),
        None => SelectOutcome::NonePending,
    }
}

/// Load the backlog from disk and select the next item.
pub fn select_from_path(path: &Path, retry: Option<&RetryPolicy>) -> Result<SelectOutcome> {
    let backlog =
        load_backlog(path).with_context(|| format!("load {} for selection", path.display()))?;
    Ok(select_task(&backlog, retry))
}

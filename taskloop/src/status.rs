//! Read-only report for `taskloop status`.

use std::path::Path;

use anyhow::{Context, Result};

use crate::backlog::TaskItem;
use crate::core::selector::next_pending;
use crate::core::types::ProgressEntry;
use crate::io::backlog_store::load_backlog;
use crate::io::progress_log::read_entries;
use crate::validate::BacklogSummary;

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub items: Vec<TaskItem>,
    pub summary: BacklogSummary,
    pub next_pending: Option<String>,
    /// Last entries of the progress log, oldest first.
    pub recent: Vec<ProgressEntry>,
}

/// Build a status report without modifying either file.
pub fn status_report(backlog_path: &Path, progress_path: &Path, tail: usize) -> Result<StatusReport> {
    let backlog = load_backlog(backlog_path)
        .with_context(|| format!("load {}", backlog_path.display()))?;
    let mut recent = read_entries(progress_path)
        .with_context(|| format!("read {}", progress_path.display()))?;
    let skip = recent.len().saturating_sub(tail);
    let recent = recent.split_off(skip);

    Ok(StatusReport {
        summary: BacklogSummary::of(&backlog),
        next_pending: next_pending(&backlog).map(|item| item.id.clone()),
        items: backlog.items().to_vec(),
        recent,
    })
}

/// Human-readable rendering, one item or entry per line.
pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    let summary = report.summary;
    out.push_str(&format!(
        "backlog: {} items ({} passed, {} pending, {} failed)\n",
        summary.total, summary.passed, summary.pending, summary.failed
    ));
    for item in &report.items {
        let marker = if report.next_pending.as_deref() == Some(item.id.as_str()) {
            "*"
        } else {
            " "
        };
        out.push_str(&format!(
            "{marker} [{:<7}] {} (priority {})",
            item.status.as_str(),
            item.id,
            item.priority
        ));
        if item.consecutive_failures > 0 {
            out.push_str(&format!(" failures={}", item.consecutive_failures));
        }
        out.push('\n');
    }

    if report.recent.is_empty() {
        out.push_str("progress: no entries\n");
        return out;
    }
    out.push_str(&format!("progress: last {} entries\n", report.recent.len()));
    for entry in &report.recent {
        let first_line = entry.notes.lines().next().unwrap_or_default();
        out.push_str(&format!(
            "  #{} {} {} {}: {}\n",
            entry.iteration,
            entry.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
            entry.outcome.as_str(),
            entry.task_id,
            first_line
        ));
    }
    out
}

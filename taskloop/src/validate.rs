//! Backlog validation for `taskloop validate`.

use std::path::Path;

use crate::backlog::{Backlog, TaskStatus};
use crate::io::backlog_store::{BacklogError, load_backlog};

/// Item counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BacklogSummary {
    pub total: usize,
    pub pending: usize,
    pub passed: usize,
    pub failed: usize,
}

impl BacklogSummary {
    pub fn of(backlog: &Backlog) -> Self {
        Self {
            total: backlog.len(),
            pending: backlog.count(TaskStatus::Pending),
            passed: backlog.count(TaskStatus::Passed),
            failed: backlog.count(TaskStatus::Failed),
        }
    }
}

/// Check the backlog at `path` against the schema and invariants.
pub fn validate_backlog(path: &Path) -> Result<BacklogSummary, BacklogError> {
    let backlog = load_backlog(path)?;
    Ok(BacklogSummary::of(&backlog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{item_with_status, write_backlog_file};

    #[test]
    fn validate_counts_statuses() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_backlog_file(
            temp.path(),
            vec![
                item_with_status("a", 0, TaskStatus::Passed),
                item_with_status("b", 0, TaskStatus::Pending),
                item_with_status("c", 0, TaskStatus::Failed),
                item_with_status("d", 0, TaskStatus::Pending),
            ],
        );
        let summary = validate_backlog(&path).expect("validate");
        assert_eq!(
            summary,
            BacklogSummary {
                total: 4,
                pending: 2,
                passed: 1,
                failed: 1,
            }
        );
    }

    #[test]
    fn validate_errors_on_missing_backlog() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = validate_backlog(&temp.path().join("prd.json")).expect_err("missing");
        assert!(matches!(err, BacklogError::NotFound { .. }));
    }
}

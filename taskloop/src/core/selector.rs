//! Deterministic selection logic for the backlog.

use crate::backlog::{Backlog, TaskItem, TaskStatus};
use crate::core::types::RetryPolicy;

/// Highest-priority item with status `Pending`.
///
/// Lower `priority` wins; ties go to the item that appears first in the file.
pub fn next_pending(backlog: &Backlog) -> Option<&TaskItem> {
    best_by_priority(
        backlog
            .items()
            .iter()
            .filter(|item| item.status == TaskStatus::Pending),
    )
}

/// Next item the loop should work on under `policy`.
///
/// With retries enabled, failed items whose streak is below the limit compete
/// with pending items on priority.
pub fn select_next<'a>(backlog: &'a Backlog, policy: &RetryPolicy) -> Option<&'a TaskItem> {
    if !policy.retry_failed {
        return next_pending(backlog);
    }
    best_by_priority(
        backlog
            .items()
            .iter()
            .filter(|item| is_eligible(item, policy)),
    )
}

/// True if a failed item may still be retried under `policy`.
pub fn is_retryable(item: &TaskItem, policy: &RetryPolicy) -> bool {
    policy.retry_failed
        && item.status == TaskStatus::Failed
        && item.consecutive_failures < policy.max_consecutive_failures
}

fn is_eligible(item: &TaskItem, policy: &RetryPolicy) -> bool {
    item.status == TaskStatus::Pending || is_retryable(item, policy)
}

// `min_by_key` keeps the first of equal elements, which gives the file-order tie-break.
fn best_by_priority<'a>(items: impl Iterator<Item = &'a TaskItem>) -> Option<&'a TaskItem> {
    items.min_by_key(|item| item.priority)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{backlog_of, item_with_status};

    fn policy(retry_failed: bool) -> RetryPolicy {
        RetryPolicy {
            retry_failed,
            max_consecutive_failures: 3,
        }
    }

    #[test]
    fn next_pending_prefers_lowest_priority_then_file_order() {
        let backlog = backlog_of(vec![
            item_with_status("late", 5, TaskStatus::Pending),
            item_with_status("first", 1, TaskStatus::Pending),
            item_with_status("second", 1, TaskStatus::Pending),
        ]);
        assert_eq!(next_pending(&backlog).map(|item| item.id.as_str()), Some("first"));
    }

    #[test]
    fn next_pending_is_deterministic_and_moves_on_after_status_change() {
        let mut backlog = backlog_of(vec![
            item_with_status("a", 0, TaskStatus::Pending),
            item_with_status("b", 1, TaskStatus::Pending),
        ]);
        let first = next_pending(&backlog).map(|item| item.id.clone());
        let again = next_pending(&backlog).map(|item| item.id.clone());
        assert_eq!(first, again);

        backlog
            .get_mut("a")
            .expect("item a")
            .transition(TaskStatus::Passed);
        assert_eq!(next_pending(&backlog).map(|item| item.id.as_str()), Some("b"));

        backlog
            .get_mut("b")
            .expect("item b")
            .transition(TaskStatus::Failed);
        assert!(next_pending(&backlog).is_none());
    }

    #[test]
    fn select_next_retries_failed_items_by_priority() {
        let mut failed = item_with_status("broken", 0, TaskStatus::Failed);
        failed.consecutive_failures = 1;
        let backlog = backlog_of(vec![
            item_with_status("open", 1, TaskStatus::Pending),
            failed,
        ]);

        let with_retry = select_next(&backlog, &policy(true)).expect("selection");
        assert_eq!(with_retry.id, "broken");

        let manual = select_next(&backlog, &policy(false)).expect("selection");
        assert_eq!(manual.id, "open");
    }

    #[test]
    fn select_next_skips_items_that_exhausted_their_retries() {
        let mut exhausted = item_with_status("broken", 0, TaskStatus::Failed);
        exhausted.consecutive_failures = 3;
        let backlog = backlog_of(vec![exhausted]);

        assert!(select_next(&backlog, &policy(true)).is_none());
    }
}

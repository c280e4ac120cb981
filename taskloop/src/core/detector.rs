//! Stop-condition detector.
//!
//! A pure function of the iteration record, the backlog as persisted after the
//! iteration, and the policy. No hidden state: identical inputs always yield
//! identical decisions.

use crate::backlog::Backlog;
use crate::core::types::{Decision, IterationRecord, StopFailureReason, StopPolicy, Termination};

/// Decide whether the loop continues after an iteration.
///
/// Checked in order: launch failure, completion marker (optionally gated on
/// every item having passed), then the consecutive failure limit of the
/// record's task.
pub fn evaluate(record: &IterationRecord, backlog: &Backlog, policy: &StopPolicy) -> Decision {
    if matches!(record.termination, Termination::LaunchFailed { .. }) {
        return Decision::StopFailure(StopFailureReason::LaunchFailed);
    }

    if record.output_contains(&policy.completion_marker)
        && (!policy.require_all_passed || backlog.all_passed())
    {
        return Decision::StopSuccess;
    }

    let exhausted = backlog
        .get(&record.task_id)
        .is_some_and(|item| item.consecutive_failures >= policy.max_consecutive_failures);
    if exhausted {
        return Decision::StopFailure(StopFailureReason::TaskExhausted);
    }

    Decision::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::TaskStatus;
    use crate::test_support::{backlog_of, item_with_status, record_with};

    const MARKER: &str = "<promise>COMPLETE</promise>";

    fn policy(require_all_passed: bool) -> StopPolicy {
        StopPolicy {
            completion_marker: MARKER.to_string(),
            require_all_passed,
            max_consecutive_failures: 2,
        }
    }

    fn ok_record(stdout: &str) -> IterationRecord {
        record_with("a", Termination::Exited { code: Some(0) }, stdout)
    }

    #[test]
    fn marker_with_all_passed_stops_successfully() {
        let backlog = backlog_of(vec![item_with_status("a", 0, TaskStatus::Passed)]);
        let decision = evaluate(&ok_record(MARKER), &backlog, &policy(true));
        assert_eq!(decision, Decision::StopSuccess);
    }

    #[test]
    fn marker_is_ignored_while_items_remain_when_gated() {
        let backlog = backlog_of(vec![
            item_with_status("a", 0, TaskStatus::Passed),
            item_with_status("b", 1, TaskStatus::Pending),
        ]);
        assert_eq!(
            evaluate(&ok_record(MARKER), &backlog, &policy(true)),
            Decision::Continue
        );
        assert_eq!(
            evaluate(&ok_record(MARKER), &backlog, &policy(false)),
            Decision::StopSuccess
        );
    }

    #[test]
    fn marker_match_is_literal() {
        let backlog = backlog_of(vec![item_with_status("a", 0, TaskStatus::Passed)]);
        let decision = evaluate(
            &ok_record("<promise>complete</promise>"),
            &backlog,
            &policy(true),
        );
        assert_eq!(decision, Decision::Continue);
    }

    #[test]
    fn marker_on_stderr_counts() {
        let backlog = backlog_of(vec![item_with_status("a", 0, TaskStatus::Passed)]);
        let mut record = ok_record("");
        record.stderr = format!("log line\n{MARKER}\n");
        assert_eq!(evaluate(&record, &backlog, &policy(true)), Decision::StopSuccess);
    }

    #[test]
    fn launch_failure_stops_with_failure() {
        let backlog = backlog_of(vec![item_with_status("a", 0, TaskStatus::Failed)]);
        let record = IterationRecord::launch_failed("a", "not found");
        assert_eq!(
            evaluate(&record, &backlog, &policy(true)),
            Decision::StopFailure(StopFailureReason::LaunchFailed)
        );
    }

    #[test]
    fn failure_limit_stops_with_failure() {
        let mut item = item_with_status("a", 0, TaskStatus::Failed);
        item.consecutive_failures = 1;
        let record = record_with("a", Termination::Exited { code: Some(1) }, "");
        assert_eq!(
            evaluate(&record, &backlog_of(vec![item.clone()]), &policy(true)),
            Decision::Continue
        );

        item.consecutive_failures = 2;
        assert_eq!(
            evaluate(&record, &backlog_of(vec![item]), &policy(true)),
            Decision::StopFailure(StopFailureReason::TaskExhausted)
        );
    }

    #[test]
    fn evaluation_is_pure() {
        let backlog = backlog_of(vec![
            item_with_status("a", 0, TaskStatus::Failed),
            item_with_status("b", 1, TaskStatus::Pending),
        ]);
        let record = record_with("a", Termination::TimedOut, "partial");
        let first = evaluate(&record, &backlog, &policy(true));
        for _ in 0..5 {
            assert_eq!(evaluate(&record, &backlog, &policy(true)), first);
        }
    }
}

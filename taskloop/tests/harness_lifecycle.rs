//! Loop-level harness tests for full lifecycle scenarios.
//!
//! These tests drive `run_loop` with a scripted worker against real files in a
//! temp dir, then reload both files the way a fresh process would.

use taskloop::backlog::{TaskItem, TaskStatus};
use taskloop::controller::{LoopSettings, LoopStop, run_loop};
use taskloop::core::types::Outcome;
use taskloop::io::backlog_store::{BacklogStore, load_backlog};
use taskloop::io::config::LoopConfig;
use taskloop::io::progress_log::{ProgressLog, read_entries};
use taskloop::test_support::{ScriptedStep, ScriptedWorker, write_backlog_file};

fn settings(max_iterations: u32) -> LoopSettings {
    LoopSettings::from_config(&LoopConfig::default(), max_iterations).expect("settings")
}

/// Interrupted run resumed by a second "process".
///
/// Backlog: `setup` (priority 0), `feature` (priority 1), `docs` (priority 2).
///
/// 1. Run 1 (max 2): setup fails, setup is retried and passes. Halts on budget.
/// 2. Run 2 (max 10), fresh handles: feature passes, docs passes and prints
///    the completion marker. Halts with success.
///
/// Tests: retry by priority, iteration numbering across restarts, the
/// completion marker gate, and that the files alone carry the state.
#[test]
fn interrupted_run_resumes_from_persisted_state() {
    let temp = tempfile::tempdir().expect("tempdir");
    let backlog_path = write_backlog_file(
        temp.path(),
        vec![
            TaskItem::new("setup", "prepare workspace", 0),
            TaskItem::new("feature", "build the feature", 1),
            TaskItem::new("docs", "write docs", 2),
        ],
    );
    let progress_path = temp.path().join("logs/progress.jsonl");

    {
        let mut store = BacklogStore::load(&backlog_path).expect("load");
        let mut log = ProgressLog::open(&progress_path).expect("open");
        let worker = ScriptedWorker::new(vec![
            ScriptedStep::exit(1, "tests failed"),
            ScriptedStep::exit(0, "setup done"),
        ]);
        let outcome = run_loop(&mut store, &mut log, &worker, &settings(2), |_| {}).expect("run 1");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(
            outcome.stop,
            LoopStop::MaxIterationsReached { max_iterations: 2 }
        );
        assert_eq!(worker.task_ids(), vec!["setup", "setup"]);
    }

    let backlog = load_backlog(&backlog_path).expect("reload");
    let setup = backlog.get("setup").expect("setup");
    assert_eq!(setup.status, TaskStatus::Passed);
    assert_eq!(setup.consecutive_failures, 0);

    {
        let mut store = BacklogStore::load(&backlog_path).expect("load");
        let mut log = ProgressLog::open(&progress_path).expect("open");
        let worker = ScriptedWorker::new(vec![
            ScriptedStep::exit(0, "<promise>COMPLETE</promise>"),
            ScriptedStep::exit(0, "all done <promise>COMPLETE</promise>"),
        ]);
        let outcome =
            run_loop(&mut store, &mut log, &worker, &settings(10), |_| {}).expect("run 2");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(
            outcome.stop,
            LoopStop::CompletionMarker {
                task_id: "docs".to_string()
            }
        );
        let calls = worker.calls();
        assert_eq!(calls[0].iteration, 3);
        assert_eq!(calls[0].task_id, "feature");
        assert_eq!(calls[1].iteration, 4);
    }

    let entries = read_entries(&progress_path).expect("entries");
    let summary: Vec<(u32, &str, Outcome)> = entries
        .iter()
        .map(|entry| (entry.iteration, entry.task_id.as_str(), entry.outcome))
        .collect();
    assert_eq!(
        summary,
        vec![
            (1, "setup", Outcome::Failed),
            (2, "setup", Outcome::Succeeded),
            (3, "feature", Outcome::Succeeded),
            (4, "docs", Outcome::Succeeded),
        ]
    );
    assert!(load_backlog(&backlog_path).expect("reload").all_passed());
}

/// A task that keeps failing is given up on and stays failed on disk. A later
/// run has nothing it may select, so it halts successfully without invoking the
/// worker; with `fail_when_blocked` the same state is reported as blocked.
#[test]
fn exhausted_task_is_left_for_manual_attention() {
    let temp = tempfile::tempdir().expect("tempdir");
    let backlog_path = write_backlog_file(temp.path(), vec![TaskItem::new("flaky", "f", 0)]);
    let progress_path = temp.path().join("progress.jsonl");

    let mut store = BacklogStore::load(&backlog_path).expect("load");
    let mut log = ProgressLog::open(&progress_path).expect("open");
    let worker = ScriptedWorker::always(ScriptedStep::exit(3, ""));
    let outcome = run_loop(&mut store, &mut log, &worker, &settings(10), |_| {}).expect("run");
    assert_eq!(outcome.iterations, 3);
    assert!(matches!(outcome.stop, LoopStop::TaskExhausted { failures: 3, .. }));

    let mut store = BacklogStore::load(&backlog_path).expect("load");
    let mut log = ProgressLog::open(&progress_path).expect("open");
    let worker = ScriptedWorker::always(ScriptedStep::exit(0, ""));
    let outcome = run_loop(&mut store, &mut log, &worker, &settings(10), |_| {}).expect("run");
    assert_eq!(outcome.iterations, 0);
    assert_eq!(outcome.stop, LoopStop::BacklogComplete);
    assert!(worker.calls().is_empty());

    let config = LoopConfig {
        fail_when_blocked: true,
        ..LoopConfig::default()
    };
    let strict = LoopSettings::from_config(&config, 10).expect("settings");
    let outcome = run_loop(&mut store, &mut log, &worker, &strict, |_| {}).expect("run");
    assert_eq!(
        outcome.stop,
        LoopStop::Blocked {
            failed: vec!["flaky".to_string()]
        }
    );
    assert!(worker.calls().is_empty());
    assert_eq!(read_entries(&progress_path).expect("entries").len(), 3);
}

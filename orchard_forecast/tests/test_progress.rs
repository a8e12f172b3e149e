use orchard_forecast::progress::{read_snapshot, COMPLETED_RUN_TTL, MESSAGE_HISTORY};
use orchard_forecast::ProgressRegistry;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_initial_snapshot() {
    let registry = ProgressRegistry::new();
    let _ctx = registry.start_run("run-1", 5);

    let snapshot = registry.snapshot("run-1").unwrap();
    assert_eq!(snapshot.current_step, 0);
    assert_eq!(snapshot.total_steps, 5);
    assert_eq!(snapshot.current_message, "Starting run-1...");
    assert_eq!(snapshot.messages.len(), 1);
    assert!(!snapshot.is_complete);
    assert!(!snapshot.failed);
    assert!(registry.snapshot("unknown").is_none());
}

#[test]
fn test_step_update_resets_substeps() {
    let registry = ProgressRegistry::new();
    let ctx = registry.start_run("run-2", 5);

    ctx.update(1, "Loading");
    ctx.substep("a", Some(6));
    ctx.substep("b", None);
    ctx.substep("c", Some(0));
    let snapshot = registry.snapshot("run-2").unwrap();
    assert_eq!(snapshot.current_substep, 3);
    assert_eq!(snapshot.total_substeps, 6);
    assert_eq!(snapshot.current_message, "Loading");

    ctx.update(2, "Splitting");
    let snapshot = registry.snapshot("run-2").unwrap();
    assert_eq!(snapshot.current_step, 2);
    assert_eq!(snapshot.current_substep, 0);
    assert_eq!(snapshot.total_substeps, 0);
    assert_eq!(snapshot.messages.last().unwrap().message, "Splitting");
}

#[test]
fn test_message_history_is_bounded() {
    let registry = ProgressRegistry::new();
    let ctx = registry.start_run("run-3", 5);
    for i in 0..MESSAGE_HISTORY + 20 {
        ctx.substep(format!("message {}", i), None);
    }

    let snapshot = registry.snapshot("run-3").unwrap();
    assert_eq!(snapshot.messages.len(), MESSAGE_HISTORY);
    assert_eq!(
        snapshot.messages.last().unwrap().message,
        format!("message {}", MESSAGE_HISTORY + 19)
    );
    // timestamps are HH:MM:SS
    assert_eq!(snapshot.messages[0].timestamp.len(), 8);
}

#[test]
fn test_completion_freezes_elapsed_time() {
    let registry = ProgressRegistry::new();
    let ctx = registry.start_run("run-4", 5);
    ctx.complete(true);

    let first = registry.snapshot("run-4").unwrap();
    thread::sleep(Duration::from_millis(20));
    let second = registry.snapshot("run-4").unwrap();
    assert!(first.is_complete);
    assert!(first.failed);
    assert_eq!(first.elapsed_secs, second.elapsed_secs);
}

#[test]
fn test_runs_are_independent() {
    let registry = ProgressRegistry::new();
    let a = registry.start_run("run-a", 5);
    let _b = registry.start_run("run-b", 6);
    a.update(3, "Predicting");

    assert_eq!(registry.snapshot("run-a").unwrap().current_step, 3);
    assert_eq!(registry.snapshot("run-b").unwrap().current_step, 0);
    assert_eq!(registry.run_ids(), vec!["run-a", "run-b"]);
}

#[test]
fn test_only_completed_runs_expire() {
    let registry = ProgressRegistry::new();
    let running = registry.start_run("run-running", 5);
    let done = registry.start_run("run-done", 5);
    done.complete(false);

    // a long fit reports nothing for a while
    thread::sleep(Duration::from_millis(20));
    assert_eq!(registry.evict_expired(Duration::from_secs(3600)), 0);
    assert_eq!(registry.evict_expired(Duration::from_millis(1)), 1);
    assert_eq!(registry.run_ids(), vec!["run-running"]);

    running.update(4, "Unifying");
    assert_eq!(registry.snapshot("run-running").unwrap().current_step, 4);

    running.complete(false);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(registry.evict_expired(Duration::from_millis(1)), 1);
    assert!(registry.snapshot("run-running").is_none());
}

#[test]
fn test_completed_run_stays_pollable_within_ttl() {
    let registry = ProgressRegistry::new();
    let ctx = registry.start_run("run-polled", 5);
    ctx.complete(false);

    // starting another run sweeps only runs older than the completion TTL
    let _next = registry.start_run("run-next", 5);
    assert!(COMPLETED_RUN_TTL > Duration::from_secs(60));
    assert!(registry.snapshot("run-polled").unwrap().is_complete);

    assert!(registry.remove("run-polled").is_some());
    assert!(registry.snapshot("run-polled").is_none());
}

#[test]
fn test_notes_do_not_advance_substeps() {
    let registry = ProgressRegistry::new();
    let ctx = registry.start_run("run-notes", 5);
    ctx.update(4, "Training 1 models...");
    ctx.note("Training var_multivariate");
    ctx.substep("var_multivariate trained", Some(2));
    ctx.note("var_multivariate [wind]: MAE 0.1");

    let snapshot = registry.snapshot("run-notes").unwrap();
    assert_eq!(snapshot.current_substep, 1);
    assert_eq!(snapshot.total_substeps, 2);
    assert_eq!(snapshot.current_message, "Training 1 models...");
    assert_eq!(
        snapshot.messages.last().unwrap().message,
        "var_multivariate [wind]: MAE 0.1"
    );
}

#[test]
fn test_mirrored_snapshots() {
    let dir = tempdir().unwrap();
    let registry = ProgressRegistry::new();
    let ctx = registry.start_mirrored_run("run-5", 6, dir.path());

    let snapshot = read_snapshot(dir.path(), "run-5").unwrap();
    assert_eq!(snapshot.current_message, "Starting run-5...");

    ctx.update(2, "Loading latest data");
    ctx.complete(false);
    let snapshot = read_snapshot(dir.path(), "run-5").unwrap();
    assert_eq!(snapshot, registry.snapshot("run-5").unwrap());
    assert!(snapshot.is_complete);

    assert!(read_snapshot(dir.path(), "missing").is_err());
}

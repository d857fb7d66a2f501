//! Plan polling against a paused tokio clock.

use mtrack_common::{
    EndpointId, ExecOutput, PlanMonitor, PlanState, ScriptedExecutor, ScriptedReply, TrackerError,
    WaitOutcome, WaitPolicy,
};
use std::time::Duration;
use tokio::time::Instant;

fn status(text: &str) -> ExecOutput {
    ExecOutput::ok(&["Phase 1", "    Task: configure node1", "", &format!("Plan Status: {text}")])
}

fn monitor() -> PlanMonitor {
    PlanMonitor::new("litp", Duration::from_secs(30))
}

fn policy(timeout_secs: u64) -> WaitPolicy {
    WaitPolicy::new(Duration::from_secs(timeout_secs), Duration::from_secs(3))
}

fn ms1() -> EndpointId {
    EndpointId::new("ms1")
}

#[tokio::test(start_paused = true)]
async fn test_in_progress_then_complete_is_reached() {
    let exec = ScriptedExecutor::new();
    exec.push_sequence(
        "show_plan -a",
        [status("Running"), status("Running"), status("Successful")],
    );

    let start = Instant::now();
    let outcome = monitor()
        .wait_for(&exec, &ms1(), PlanState::Complete, policy(60))
        .await;

    assert_eq!(outcome, WaitOutcome::Reached);
    assert_eq!(start.elapsed(), Duration::from_secs(6));
    assert_eq!(exec.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_endless_in_progress_times_out_with_final_poll() {
    let exec = ScriptedExecutor::new();
    exec.always("show_plan", status("Running"));

    let start = Instant::now();
    let outcome = monitor()
        .wait_for(&exec, &ms1(), PlanState::Complete, policy(10))
        .await;

    assert_eq!(
        outcome,
        WaitOutcome::TimedOut {
            last: PlanState::InProgress
        }
    );
    assert_eq!(start.elapsed(), Duration::from_secs(10));
    let commands = exec.commands();
    assert_eq!(commands.last().map(String::as_str), Some("litp show_plan"));
    assert!(commands[..commands.len() - 1].iter().all(|c| c == "litp show_plan -a"));
}

#[tokio::test(start_paused = true)]
async fn test_not_running_tolerated_before_start() {
    let exec = ScriptedExecutor::new();
    exec.push_sequence(
        "show_plan -a",
        [
            status("Initial"),
            status("Running"),
            status("Successful"),
        ],
    );

    let outcome = monitor()
        .wait_for(&exec, &ms1(), PlanState::Complete, policy(60))
        .await;
    assert!(outcome.is_reached());
}

#[tokio::test(start_paused = true)]
async fn test_not_running_too_long_is_unexpected() {
    let exec = ScriptedExecutor::new();
    exec.always("show_plan", status("Initial"));

    let outcome = monitor()
        .wait_for(&exec, &ms1(), PlanState::Complete, policy(600))
        .await;
    assert_eq!(
        outcome,
        WaitOutcome::Unexpected {
            state: PlanState::NotRunning
        }
    );
    assert_eq!(exec.calls().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_transport_errors_are_transient() {
    let exec = ScriptedExecutor::new();
    exec.push("show_plan -a", ScriptedReply::ConnectionFailure("reset".into()));
    exec.push("show_plan -a", ScriptedReply::Timeout);
    exec.push("show_plan -a", ExecOutput::failed(1, &["ServerUnavailableError"]));
    exec.push("show_plan -a", status("Successful"));

    let outcome = monitor()
        .wait_for(&exec, &ms1(), PlanState::Complete, policy(60))
        .await;
    assert!(outcome.is_reached());
}

#[tokio::test(start_paused = true)]
async fn test_failed_plan_is_unexpected_and_maps_to_error() {
    let exec = ScriptedExecutor::new();
    exec.push("show_plan -a", status("Failed"));

    let outcome = monitor()
        .wait_for(&exec, &ms1(), PlanState::Complete, policy(60))
        .await;
    let err = outcome.into_result(&ms1(), PlanState::Complete).unwrap_err();
    assert!(matches!(
        err,
        TrackerError::UnexpectedPlanState {
            observed: PlanState::Failed,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stopping_plan_is_not_stopped_twice() {
    let exec = ScriptedExecutor::new();
    exec.push_sequence(
        "show_plan -a",
        [status("Stopping"), status("Stopping"), status("Stopped")],
    );

    let outcome = monitor().stop(&exec, &ms1(), policy(60)).await.unwrap();
    assert_eq!(outcome, Some(WaitOutcome::Reached));
    assert!(!exec.commands().iter().any(|c| c == "litp stop_plan"));
}

#[tokio::test(start_paused = true)]
async fn test_plan_cycle_with_nothing_to_do() {
    let exec = ScriptedExecutor::new();
    exec.push(
        "create_plan",
        ExecOutput::failed(1, &["DoNothingPlanError    Create plan failed: no tasks were generated"]),
    );

    monitor().run_plan_cycle(&exec, &ms1(), policy(60)).await.unwrap();
    assert_eq!(exec.commands(), vec!["litp create_plan"]);
}

use std::sync::Arc;

use serde_json::json;

use super::{Probe, probe_factory, standalone_job};
use crate::core::delivery::{Flow, UpdateType};
use crate::core::job::{JobConfig, JobOutcome, JobState, can_transition};
use crate::logging::AgentEvent;

#[test]
fn lifecycle_happy_path_transitions_are_allowed() {
    let path = [
        (JobState::Created, JobState::Initializing),
        (JobState::Initializing, JobState::Running),
        (JobState::Running, JobState::Terminating),
        (JobState::Terminating, JobState::Terminated),
    ];
    for (from, to) in path {
        assert!(
            can_transition(from, to),
            "expected transition {:?} -> {:?} to be allowed",
            from,
            to
        );
    }
}

#[test]
fn init_failure_is_terminal() {
    assert!(can_transition(JobState::Initializing, JobState::Failed));
    assert!(!can_transition(JobState::Running, JobState::Failed));
    for to in [JobState::Initializing, JobState::Running, JobState::Terminating] {
        assert!(!can_transition(JobState::Failed, to));
        assert!(!can_transition(JobState::Terminated, to));
    }
}

#[test]
fn run_requires_initialization() {
    assert!(!can_transition(JobState::Created, JobState::Running));
    assert!(!can_transition(JobState::Terminating, JobState::Running));
    assert!(can_transition(JobState::Running, JobState::Running));
}

#[tokio::test]
async fn single_pass_runs_the_task_once_and_terminates() {
    let probe = Arc::new(Probe::default());
    let (job, stream, _rx) = standalone_job("probe", probe_factory(&probe, false));

    let outcome = Arc::clone(&job).execute(true).await;

    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(job.state(), JobState::Terminated);
    assert_eq!(Probe::count(&probe.inits), 1);
    assert_eq!(Probe::count(&probe.runs), 1);
    assert_eq!(Probe::count(&probe.terminations), 1);
    assert_eq!(stream.sent.lock().unwrap()[0].0, "probe");
}

#[tokio::test]
async fn init_failure_skips_run_and_reports() {
    let probe = Arc::new(Probe::default());
    let (job, _stream, mut rx) = standalone_job("broken", probe_factory(&probe, true));

    let outcome = Arc::clone(&job).execute(false).await;

    assert!(matches!(outcome, JobOutcome::Failed(ref reason) if reason.contains("probe refused")));
    assert_eq!(job.state(), JobState::Failed);
    assert_eq!(Probe::count(&probe.runs), 0);
    assert_eq!(Probe::count(&probe.terminations), 0);

    let mut reported = false;
    while let Ok(event) = rx.try_recv() {
        if let AgentEvent::Error(message) = event {
            assert!(message.starts_with("broken -> Error initializing the job"));
            reported = true;
        }
    }
    assert!(reported);
}

#[tokio::test]
async fn a_terminated_job_cannot_start_again() {
    let probe = Arc::new(Probe::default());
    let (job, _stream, _rx) = standalone_job("probe", probe_factory(&probe, false));

    job.terminate().await;
    assert_eq!(job.state(), JobState::Terminating);

    let outcome = Arc::clone(&job).execute(false).await;
    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(job.state(), JobState::Terminated);
    assert_eq!(Probe::count(&probe.inits), 0);
}

#[tokio::test]
async fn log_messages_carry_the_job_id() {
    let probe = Arc::new(Probe::default());
    let (job, _stream, mut rx) = standalone_job("cpu", probe_factory(&probe, false));

    job.log("hello");
    match rx.try_recv().unwrap() {
        AgentEvent::Entry { message, .. } => assert_eq!(message, "cpu -> hello"),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn flow_updates_reach_the_stream_as_replacements() {
    let probe = Arc::new(Probe::default());
    let (job, stream, _rx) = standalone_job("flows", probe_factory(&probe, false));

    job.post_flow_update(Flow::new("gauge", json!({"value": 1})));
    job.post_immediate_flow_update(Flow::new("gauge", json!({"value": 2})))
        .await
        .unwrap();

    let sent = stream.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].2, UpdateType::Post);
}

#[tokio::test]
async fn reconfigure_needs_a_running_instance() {
    let probe = Arc::new(Probe::default());
    let (job, _stream, _rx) = standalone_job("idle", probe_factory(&probe, false));

    let err = job.reconfigure(JobConfig::new()).await.unwrap_err();
    assert!(err.to_string().contains("is not running"));
}

//! Test: Failure handling - failed jobs keep their dependents locked

use crate::helpers::*;
use lockstep::core::JobStatus;
use lockstep::execution::CoordinatorEvent;
use std::sync::{Arc, Mutex};

const MEAN_INCOME: &str = r#"
name: "mean income"
components: ["node-a", "node-b"]
iterations: 2
features:
  - name: income
    dtype: numeric
plan:
  estimate:
    estimator: mean
    feature: income
"#;

#[tokio::test]
async fn test_failed_job_blocks_next_round() {
    let harness = Harness::new();
    let failures = Arc::new(Mutex::new(Vec::new()));
    let seen = failures.clone();
    harness
        .coordinator
        .add_event_handler(move |event| {
            if let CoordinatorEvent::JobFailed { component_id, reason, .. } = event {
                seen.lock().unwrap().push((component_id, reason));
            }
        })
        .await;

    let artifact = artifact(MEAN_INCOME);
    harness.coordinator.submit(&artifact).await.unwrap();

    let (node_a, workspace_a) = harness.node("node-a", r#"[{"income": 10}, {"income": 30}]"#, 2);
    // node-b holds no income column
    let (node_b, _) = harness.node("node-b", r#"[{"age": 40}]"#, 2);

    let id = artifact.id.clone();
    let (a, b) = tokio::join!(node_a.run(&id), node_b.run(&id));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!((a.completed, a.failed), (2, 0));
    assert_eq!((b.completed, b.failed), (1, 1));

    let status = harness.coordinator.status(&artifact.id).await.unwrap();
    assert!(status.has_failed());
    assert!(!status.is_complete());
    assert!(status.is_settled());
    assert_eq!(status.error, 1);
    assert_eq!(status.waiting, 4);

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "node-b");
    assert!(failures[0].1.contains("income"));

    // node-a's first round still produced its estimate
    let env = workspace_a.snapshot(&artifact.id).await.unwrap();
    assert_eq!(env.scalar("estimate").unwrap().as_f64(), Some(20.0));

    for job in harness.coordinator.jobs(&artifact.id).await.unwrap() {
        if job.iteration == 1 {
            assert_eq!(job.status, JobStatus::Waiting);
            assert!(harness.coordinator.locks().is_locked(&job).await.unwrap());
        }
    }
}

#[tokio::test]
async fn test_stalled_job_is_reaped_without_requeue() {
    let harness = Harness::new();
    let artifact = artifact(
        r#"
name: "single"
components: ["node-a"]
features:
  - name: x
    dtype: numeric
stages:
  - filter:
      feature: x
      operation: NUM_LESS_THAN
      value: 5
"#,
    );
    harness.coordinator.submit(&artifact).await.unwrap();

    let job = harness.coordinator.dispatch("node-a").await.unwrap().unwrap();
    let reaped = harness.coordinator.reap(chrono::Duration::zero()).await.unwrap();
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].id, job.id);

    // the node reports late
    let err = harness.coordinator.complete(&job.id, "node-a").await.unwrap_err();
    assert!(err.is_conflict());

    let jobs = harness.jobs_of(&artifact.id, "node-a").await;
    assert_eq!(statuses(&jobs), vec![JobStatus::Error, JobStatus::Waiting]);
    assert!(harness.coordinator.dispatch("node-a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_only_the_owner_can_report() {
    let harness = Harness::new();
    let artifact = artifact(MEAN_INCOME);
    harness.coordinator.submit(&artifact).await.unwrap();

    let job = harness.coordinator.dispatch("node-a").await.unwrap().unwrap();
    let err = harness
        .coordinator
        .fail(&job.id, "node-b", "not mine")
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let job = harness.coordinator.get_job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
}

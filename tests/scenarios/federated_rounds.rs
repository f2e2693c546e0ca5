//! Test: Federated rounds - several nodes, several iterations, one barrier per round

use crate::helpers::*;
use lockstep::core::{JobStatus, Value};

const TRAINING: &str = r#"
name: "income model"
components: ["node-a", "node-b"]
iterations: 3
features:
  - name: age
    dtype: numeric
  - name: income
    dtype: numeric
stages:
  - filter:
      feature: age
      operation: NUM_GREATER_EQUAL
      value: 18
  - transform:
      kind: scale
      inputs: [income]
      outputs: [income_k]
      factor: 0.001
plan:
  train:
    label: income_k
    test_fraction: 0.25
    random_seed: 7
"#;

const NODE_A: &str = r#"[
    {"age": 16, "income": 0},
    {"age": 20, "income": 20000}, {"age": 30, "income": 30000},
    {"age": 40, "income": 40000}, {"age": 50, "income": 50000},
    {"age": 60, "income": 60000}
]"#;

const NODE_B: &str = r#"[
    {"age": 22, "income": 22000}, {"age": 33, "income": 33000},
    {"age": 44, "income": 44000}, {"age": 55, "income": 55000}
]"#;

#[tokio::test]
async fn test_rounds_complete_on_every_node() {
    let harness = Harness::new();
    let artifact = artifact(TRAINING);
    let jobs = harness.coordinator.submit(&artifact).await.unwrap();
    assert_eq!(jobs.len(), 2 * 3 * 4);

    let (node_a, workspace_a) = harness.node("node-a", NODE_A, 2);
    let (node_b, workspace_b) = harness.node("node-b", NODE_B, 2);

    let id = artifact.id.clone();
    let (a, b) = tokio::join!(node_a.run(&id), node_b.run(&id));
    assert_eq!(a.unwrap().completed, 12);
    assert_eq!(b.unwrap().completed, 12);

    let status = harness.coordinator.status(&artifact.id).await.unwrap();
    assert!(status.is_complete());
    assert_eq!(status.completed, 24);

    for workspace in [&workspace_a, &workspace_b] {
        let env = workspace.snapshot(&artifact.id).await.unwrap();
        let model = env.model("model").unwrap();
        assert_eq!(model.label, "income_k");
        assert_eq!(model.predictor.as_deref(), Some("age"));
        assert!((model.slope - 1.0).abs() < 1e-9);
        assert!(matches!(env.scalar("metrics").unwrap(), Value::Numeric(_)));
    }

    // the minor on node-a was filtered out before training
    let env = workspace_a.snapshot(&artifact.id).await.unwrap();
    assert_eq!(env.dataset("data").unwrap().len(), 5);
}

#[tokio::test]
async fn test_next_round_waits_for_every_component() {
    let harness = Harness::new();
    let artifact = artifact(TRAINING);
    harness.coordinator.submit(&artifact).await.unwrap();

    let (node_a, _) = harness.node("node-a", NODE_A, 1);
    let (node_b, _) = harness.node("node-b", NODE_B, 1);
    let id = artifact.id.clone();
    let (a, b) = tokio::join!(node_a.run(&id), node_b.run(&id));
    a.unwrap();
    b.unwrap();

    let jobs = harness.coordinator.jobs(&artifact.id).await.unwrap();
    for iteration in 1..artifact.iterations {
        let previous_end = jobs
            .iter()
            .filter(|j| j.iteration == iteration - 1)
            .filter_map(|j| j.termination_time)
            .max()
            .unwrap();
        for job in jobs.iter().filter(|j| j.iteration == iteration) {
            assert!(job.scheduling_time.unwrap() >= previous_end);
        }
    }
}

#[tokio::test]
async fn test_second_round_is_locked_until_barrier_clears() {
    let harness = Harness::new();
    let artifact = artifact(TRAINING);
    harness.coordinator.submit(&artifact).await.unwrap();

    // node-a finishes its whole first round alone
    while let Some(job) = harness.coordinator.dispatch("node-a").await.unwrap() {
        assert_eq!(job.iteration, 0);
        harness.coordinator.complete(&job.id, "node-a").await.unwrap();
    }

    let second_round: Vec<_> = harness
        .jobs_of(&artifact.id, "node-a")
        .await
        .into_iter()
        .filter(|j| j.iteration == 1)
        .collect();
    assert_eq!(second_round[0].lock_counter, 2);
    assert!(harness.coordinator.locks().is_locked(&second_round[0]).await.unwrap());
    assert!(statuses(&second_round).iter().all(|s| *s == JobStatus::Waiting));

    // node-b catches up, releasing the barrier for both
    while let Some(job) = harness.coordinator.dispatch("node-b").await.unwrap() {
        if job.iteration > 0 {
            break;
        }
        harness.coordinator.complete(&job.id, "node-b").await.unwrap();
    }

    let next = harness.coordinator.dispatch("node-a").await.unwrap().unwrap();
    assert_eq!((next.iteration, next.stage), (1, 0));
}

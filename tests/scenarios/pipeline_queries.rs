//! Test: Pipeline queries - filters and transforms from configuration to node data

use crate::helpers::*;
use lockstep::core::{Pipeline, Value};

const ADULTS: &str = r#"
name: "adults"
components: ["node-a"]
features:
  - name: age
    dtype: numeric
stages:
  - filter:
      feature: age
      operation: NUM_GREATER_THAN
      value: 30
"#;

#[test]
fn test_filter_keeps_rows_over_threshold() {
    let artifact = artifact(ADULTS);
    let filtered = artifact
        .pipeline
        .apply(rows(r#"[{"age": 25}, {"age": 31}, {"age": 45}]"#));

    let ages = filtered.numeric_column("age");
    assert_eq!(ages, vec![31.0, 45.0]);
}

#[test]
fn test_filter_on_absent_column_leaves_data_unchanged() {
    let artifact = artifact(ADULTS);
    let data = rows(r#"[{"height": 180}, {"height": 165}]"#);
    assert_eq!(artifact.pipeline.apply(data.clone()), data);
}

#[test]
fn test_transform_replaces_features() {
    let artifact = artifact(
        r#"
name: "scaled"
components: ["node-a"]
features:
  - name: raw_x
    dtype: numeric
  - name: label
    dtype: numeric
stages:
  - transform:
      kind: scale
      inputs: [raw_x]
      outputs: [scaled_x]
      factor: 2
"#,
    );

    let names: Vec<&str> = artifact
        .pipeline
        .features()
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(names, vec!["label", "scaled_x"]);
    assert!(artifact.pipeline.feature("raw_x").unwrap_err().is_not_found());

    let scaled = artifact.pipeline.apply(rows(r#"[{"raw_x": 1.5, "label": 1}]"#));
    assert_eq!(scaled.rows[0].get("scaled_x"), Some(&Value::Numeric(3.0)));
    assert!(scaled.rows[0].get("raw_x").is_none());
}

#[test]
fn test_pipeline_survives_json_round_trip() {
    let artifact = artifact(ADULTS);
    let json = artifact.pipeline.to_json().unwrap();
    let parsed = Pipeline::from_json(&json).unwrap();

    assert_eq!(parsed, artifact.pipeline);
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed.current().index, 1);
}

#[tokio::test]
async fn test_node_applies_query_to_local_data() {
    let harness = Harness::new();
    let artifact = artifact(ADULTS);
    harness.coordinator.submit(&artifact).await.unwrap();

    let (node, workspace) = harness.node("node-a", r#"[{"age": 25}, {"age": 31}, {"age": 45}]"#, 1);
    let summary = node.run(&artifact.id).await.unwrap();
    assert_eq!(summary.completed, 2);

    let env = workspace.snapshot(&artifact.id).await.unwrap();
    assert_eq!(env.dataset("data").unwrap().numeric_column("age"), vec![31.0, 45.0]);
}
